//! Supervisor agent: turns a topic into sub-queries or a report outline.

use deepfanout_core::llm::parse_json_reply;
use deepfanout_core::{DynLlmClient, FanoutError, LlmRequest, Query, Section};
use tracing::{info, warn};

/// Plans the research before any task graph exists.
pub struct SupervisorAgent {
    llm: DynLlmClient,
    model: String,
}

impl SupervisorAgent {
    pub fn new(llm: DynLlmClient, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }

    /// Ask the model for `count` search queries. Any failure falls back to
    /// researching the topic itself.
    pub async fn plan_queries(&self, topic: &str, count: usize) -> Result<Query, FanoutError> {
        let count = count.max(1);
        let prompt = format!(
            "Act as a Research Planner. Decompose this topic into {count} distinct, \
             high-signal search queries for a deep research task: '{topic}'. \
             Cover different angles and avoid overlapping wording. \
             Return ONLY a JSON list of strings."
        );

        let planned = match self.llm.complete(LlmRequest::new(&self.model, prompt)).await {
            Ok(reply) => match parse_json_reply::<Vec<String>>(&reply) {
                Ok(queries) => queries,
                Err(err) => {
                    warn!(error = %err, "Supervisor reply was not a JSON list; using topic");
                    Vec::new()
                }
            },
            Err(err) => {
                warn!(error = %err, "Supervisor planning failed; using topic");
                Vec::new()
            }
        };

        let query = Query::new(topic, planned.into_iter().take(count))?;
        info!(topic = %query.topic, sub_queries = query.len(), "Sub-queries planned");
        Ok(query)
    }

    /// Ask the model for a 6-10 section outline. Falls back to a single
    /// section covering the whole topic.
    pub async fn plan_outline(&self, topic: &str) -> Result<Vec<Section>, FanoutError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(FanoutError::InvalidInput("topic must not be empty".into()));
        }
        let prompt = format!(
            "You are a Research Director. Deconstruct '{topic}' into a detailed \
             6-10 section report outline. Each section needs a title and a specific \
             research objective phrased as a search query. \
             Return ONLY a JSON list of objects with 'title' and 'objective' keys."
        );

        let request = LlmRequest::new(&self.model, prompt);
        let sections: Vec<Section> = match self.llm.complete(request).await {
            Ok(reply) => parse_json_reply::<Vec<Section>>(&reply)
                .map_err(|err| warn!(error = %err, "Outline reply was not valid JSON"))
                .unwrap_or_default(),
            Err(err) => {
                warn!(error = %err, "Outline planning failed");
                Vec::new()
            }
        };

        let mut sections: Vec<Section> = sections
            .into_iter()
            .filter(|section| {
                !section.title.trim().is_empty() && !section.objective.trim().is_empty()
            })
            .map(|section| Section {
                title: section.title.trim().to_string(),
                objective: section.objective.trim().to_string(),
            })
            .collect();
        sections.truncate(10);

        if sections.is_empty() {
            sections.push(Section {
                title: topic.to_string(),
                objective: topic.to_string(),
            });
        }
        info!(topic = %topic, sections = sections.len(), "Outline planned");
        Ok(sections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepfanout_core::LlmError;
    use deepfanout_core::llm::ScriptedLlm;
    use std::sync::Arc;

    #[tokio::test]
    async fn parses_fenced_query_list() {
        let llm = ScriptedLlm::new().on(
            "Research Planner",
            "```json\n[\"solid state battery cost\", \"Solid State Battery Cost\", \
             \"sodium ion\", \"extra\"]\n```",
        );
        let supervisor = SupervisorAgent::new(Arc::new(llm), "o4-mini");

        let query = supervisor.plan_queries("battery tech", 3).await.unwrap();
        assert_eq!(query.sub_queries, vec!["solid state battery cost", "sodium ion"]);
    }

    #[tokio::test]
    async fn parses_single_line_fenced_query_list() {
        let llm = ScriptedLlm::new().on(
            "Research Planner",
            "```json [\"sodium ion cost\", \"sodium ion cycle life\"]```",
        );
        let supervisor = SupervisorAgent::new(Arc::new(llm), "o4-mini");

        let query = supervisor.plan_queries("sodium ion", 2).await.unwrap();
        assert_eq!(query.sub_queries, vec!["sodium ion cost", "sodium ion cycle life"]);
    }

    #[tokio::test]
    async fn falls_back_to_topic_on_failure() {
        let llm = ScriptedLlm::new().fail_on("Research Planner", LlmError::Timeout);
        let supervisor = SupervisorAgent::new(Arc::new(llm), "o4-mini");

        let query = supervisor.plan_queries("grid storage", 4).await.unwrap();
        assert_eq!(query.sub_queries, vec!["grid storage"]);
    }

    #[tokio::test]
    async fn blank_topic_is_rejected() {
        let supervisor = SupervisorAgent::new(Arc::new(ScriptedLlm::new()), "o4-mini");
        assert!(supervisor.plan_queries("  ", 2).await.is_err());
        assert!(supervisor.plan_outline("").await.is_err());
    }

    #[tokio::test]
    async fn outline_drops_incomplete_sections() {
        let llm = ScriptedLlm::new().on(
            "Research Director",
            r#"[{"title": "Market", "objective": "battery market size 2024"},
                {"title": "", "objective": "ignored"},
                {"title": "Policy", "objective": "battery subsidies EU"}]"#,
        );
        let supervisor = SupervisorAgent::new(Arc::new(llm), "o4-mini");

        let sections = supervisor.plan_outline("batteries").await.unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[1].title, "Policy");
    }

    #[tokio::test]
    async fn outline_falls_back_to_single_section() {
        let llm = ScriptedLlm::new().on("Research Director", "not json");
        let supervisor = SupervisorAgent::new(Arc::new(llm), "o4-mini");

        let sections = supervisor.plan_outline("heat pumps").await.unwrap();
        assert_eq!(
            sections,
            vec![Section {
                title: "heat pumps".into(),
                objective: "heat pumps".into()
            }]
        );
    }
}
