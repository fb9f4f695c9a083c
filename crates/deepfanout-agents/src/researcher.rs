//! Researcher agent: fans one sub-query out across every search provider.

use crate::agent_context::{Agent, AgentContext, AgentResult};
use crate::payloads::{ResearchOutput, encode};
use deepfanout_core::{AgentRole, FanoutEngine, FanoutError, Query, TaskError};
use tracing::{info, warn};

pub struct ResearcherAgent {
    engine: FanoutEngine,
}

impl ResearcherAgent {
    pub fn new(engine: FanoutEngine) -> Self {
        Self { engine }
    }
}

#[async_trait::async_trait]
impl Agent for ResearcherAgent {
    async fn execute(&self, context: &AgentContext) -> Result<AgentResult, TaskError> {
        let topic = context.require_str("topic")?;
        let sub_query = context.require_str("query")?;
        info!(task_id = %context.task_id, query = %sub_query, "Researcher agent executing");

        let query =
            Query::new(topic, [sub_query]).map_err(|err| TaskError::terminal(err.to_string()))?;
        let fanout = self.engine.run(&query).await.map_err(|err| match err {
            FanoutError::NoProviders(_) => TaskError::terminal(err.to_string()),
            other => TaskError::new(other.to_string(), true),
        })?;

        if fanout.all_failed() {
            // Provider-level retries already ran inside the engine.
            return Err(TaskError::terminal(format!(
                "every provider request failed for '{sub_query}'"
            )));
        }
        for failure in &fanout.failures {
            warn!(
                task_id = %context.task_id,
                provider = %failure.provider,
                error = %failure.error,
                "Provider failed; continuing with remaining results"
            );
        }

        context.send_message(
            None,
            format!(
                "Found {} sources for '{}' ({} below threshold, {} duplicates)",
                fanout.records.len(),
                sub_query,
                fanout.discarded_below_threshold,
                fanout.duplicates
            ),
            serde_json::json!({
                "stage": "research",
                "requests": fanout.requests,
                "failures": fanout.failures.len(),
            }),
        );

        let confidence = if fanout.requests == 0 {
            0.0
        } else {
            1.0 - fanout.failures.len() as f64 / fanout.requests as f64
        };
        let output = ResearchOutput {
            query: sub_query.to_string(),
            fanout,
        };

        Ok(AgentResult {
            task_id: context.task_id.clone(),
            role: AgentRole::Researcher,
            output: encode(&output)?,
            confidence,
        })
    }

    fn role(&self) -> AgentRole {
        AgentRole::Researcher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepfanout_core::search::StaticProvider;
    use deepfanout_core::{EventCollector, FanoutSettings, SearchError, TaskNode};
    use std::sync::Arc;

    fn context(query: &str) -> AgentContext {
        let node = TaskNode::new("research_1", "Research", AgentRole::Researcher)
            .with_param("topic", serde_json::json!("heat pumps"))
            .with_param("query", serde_json::json!(query));
        AgentContext::from_node(&node, &[], EventCollector::default())
    }

    #[tokio::test]
    async fn returns_filtered_records() {
        let provider = StaticProvider::new("tavily")
            .with_hit("https://a.io/cop", Some(0.9))
            .with_hit("https://b.io/noise", Some(0.2));
        let engine = FanoutEngine::new(vec![Arc::new(provider)], FanoutSettings::default());
        let agent = ResearcherAgent::new(engine);

        let result = agent.execute(&context("heat pump efficiency")).await.unwrap();
        let output: ResearchOutput = serde_json::from_value(result.output).unwrap();
        assert_eq!(output.query, "heat pump efficiency");
        assert_eq!(output.fanout.records.len(), 1);
        assert_eq!(output.fanout.records[0].url, "https://a.io/cop");
        assert_eq!(result.confidence, 1.0);
    }

    #[tokio::test]
    async fn total_provider_failure_is_terminal() {
        let provider = StaticProvider::new("tavily").failing_with(vec![
            SearchError::Status {
                status: 401,
                body: "bad key".into(),
            },
        ]);
        let engine = FanoutEngine::new(vec![Arc::new(provider)], FanoutSettings::default());
        let agent = ResearcherAgent::new(engine);

        let err = agent.execute(&context("anything")).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn missing_query_parameter_fails() {
        let engine = FanoutEngine::new(vec![], FanoutSettings::default());
        let agent = ResearcherAgent::new(engine);
        let node = TaskNode::new("research_1", "Research", AgentRole::Researcher);
        let context = AgentContext::from_node(&node, &[], EventCollector::default());

        assert!(agent.execute(&context).await.is_err());
    }
}
