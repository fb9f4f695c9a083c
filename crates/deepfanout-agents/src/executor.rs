//! Executor agent: condenses each retrieved source with the cheap model.

use crate::agent_context::{Agent, AgentContext, AgentResult};
use crate::payloads::{ResearchOutput, SummaryOutput, decode_inputs, encode};
use deepfanout_core::config::ExecutorConfig;
use deepfanout_core::source::{rank_by_score, truncate_chars};
use deepfanout_core::{AgentRole, DynLlmClient, LlmRequest, SourceRecord, TaskError};
use futures::StreamExt;
use tracing::{debug, info, warn};

const SOURCE_PROMPT_CHARS: usize = 6_000;

pub struct ExecutorAgent {
    llm: DynLlmClient,
    model: String,
    settings: ExecutorConfig,
}

impl ExecutorAgent {
    pub fn new(llm: DynLlmClient, model: impl Into<String>, settings: ExecutorConfig) -> Self {
        Self {
            llm,
            model: model.into(),
            settings,
        }
    }

    /// Summaries come back in input order; failed calls keep a truncated
    /// excerpt instead. Returns the records and the number of fallbacks.
    async fn summarize_all(
        &self,
        query: &str,
        records: Vec<SourceRecord>,
    ) -> (Vec<SourceRecord>, usize) {
        let summarized: Vec<(SourceRecord, bool)> = futures::stream::iter(records)
            .map(|record| self.summarize(query, record))
            .buffered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let fallbacks = summarized.iter().filter(|(_, fell_back)| *fell_back).count();
        (
            summarized.into_iter().map(|(record, _)| record).collect(),
            fallbacks,
        )
    }

    async fn summarize(&self, query: &str, mut record: SourceRecord) -> (SourceRecord, bool) {
        let text = record.raw_content.as_deref().unwrap_or(&record.content);
        let prompt = format!(
            "You are a research Executor. Summarize the facts in the source below that \
             are relevant to the query '{query}'. Keep numbers, dates and names exact. \
             Reply with 2-5 sentences of plain text and no preamble.\n\n\
             TITLE: {}\nURL: {}\nCONTENT:\n{}",
            record.display_title(),
            record.url,
            truncate_chars(text, SOURCE_PROMPT_CHARS)
        );

        match self.llm.complete(LlmRequest::new(&self.model, prompt)).await {
            Ok(summary) if !summary.trim().is_empty() => {
                record.summary = Some(summary.trim().to_string());
                (record, false)
            }
            Ok(_) => {
                debug!(url = %record.url, "Empty summary; using excerpt");
                record.summary = Some(truncate_chars(
                    &record.content,
                    self.settings.fallback_chars,
                ));
                (record, true)
            }
            Err(err) => {
                warn!(url = %record.url, error = %err, "Summary failed; using excerpt");
                record.summary = Some(truncate_chars(
                    &record.content,
                    self.settings.fallback_chars,
                ));
                (record, true)
            }
        }
    }
}

#[async_trait::async_trait]
impl Agent for ExecutorAgent {
    async fn execute(&self, context: &AgentContext) -> Result<AgentResult, TaskError> {
        info!(task_id = %context.task_id, "Executor agent executing");

        let research: Vec<ResearchOutput> = decode_inputs(&context.inputs)?;
        let query = context
            .param_str("query")
            .map(str::to_string)
            .or_else(|| research.first().map(|output| output.query.clone()))
            .unwrap_or_default();

        let mut records: Vec<SourceRecord> = research
            .into_iter()
            .flat_map(|output| output.fanout.records)
            .collect();
        rank_by_score(&mut records);
        let available = records.len();
        records.truncate(self.settings.max_sources);

        let (sources, fallbacks) = self.summarize_all(&query, records).await;

        context.send_message(
            None,
            format!(
                "Summarized {} of {available} sources for '{query}' ({fallbacks} excerpts)",
                sources.len()
            ),
            serde_json::json!({"stage": "summarize", "fallbacks": fallbacks}),
        );

        let confidence = if sources.is_empty() {
            0.0
        } else {
            1.0 - fallbacks as f64 / sources.len() as f64
        };
        let output = SummaryOutput {
            query,
            sources,
            fallbacks,
        };

        Ok(AgentResult {
            task_id: context.task_id.clone(),
            role: AgentRole::Executor,
            output: encode(&output)?,
            confidence,
        })
    }

    fn role(&self) -> AgentRole {
        AgentRole::Executor
    }
}
