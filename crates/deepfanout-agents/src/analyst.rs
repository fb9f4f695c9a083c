//! Analyst agent: writes cited reports and chapters from summarized sources.
//!
//! Three modes, chosen by the node's `mode` parameter:
//!
//! - `report`: one synthesis over every sub-query's summaries (quick mode)
//! - `chapter`: one chapter per outline section (deep mode)
//! - `assemble`: concatenates finished chapters into the master report

use std::collections::HashSet;
use std::fmt::Write as _;

use crate::agent_context::{Agent, AgentContext, AgentResult};
use crate::payloads::{DraftOutput, SummaryOutput, decode_inputs, encode};
use deepfanout_core::config::SynthesisConfig;
use deepfanout_core::source::{normalize_url, rank_by_score};
use deepfanout_core::{AgentRole, DynLlmClient, LlmRequest, SourceRecord, TaskError};
use tracing::info;

pub struct AnalystAgent {
    llm: DynLlmClient,
    model: String,
    settings: SynthesisConfig,
}

impl AnalystAgent {
    pub fn new(llm: DynLlmClient, model: impl Into<String>, settings: SynthesisConfig) -> Self {
        Self {
            llm,
            model: model.into(),
            settings,
        }
    }

    async fn write_report(
        &self,
        topic: &str,
        inputs: Vec<SummaryOutput>,
    ) -> Result<DraftOutput, TaskError> {
        let sources = select_sources(
            inputs.into_iter().flat_map(|i| i.sources),
            self.settings.max_sources,
        );
        if sources.is_empty() {
            return Err(TaskError::terminal(format!(
                "no sources to synthesize for '{topic}'"
            )));
        }

        let prompt = format!(
            "You are a Senior Research Analyst. Write a comprehensive, professional report on \
             '{topic}' using only the sources below.\n\n\
             Structure it as Markdown with an executive summary, thematic sections and a \
             conclusion. Use tables where they clarify comparisons.\n\n\
             {CITATION_RULES}\n\nSOURCES:\n{}",
            source_block(&sources)
        );
        let body = self.complete(prompt).await?;

        Ok(DraftOutput {
            title: format!("Research Report: {topic}"),
            body_markdown: body,
            sources,
        })
    }

    async fn write_chapter(
        &self,
        topic: &str,
        title: &str,
        objective: &str,
        inputs: Vec<SummaryOutput>,
    ) -> Result<DraftOutput, TaskError> {
        let sources = select_sources(
            inputs.into_iter().flat_map(|i| i.sources),
            self.settings.chapter_sources,
        );
        if sources.is_empty() {
            // One empty section should not sink the whole master report.
            return Ok(DraftOutput {
                title: title.to_string(),
                body_markdown: format!(
                    "## {title}\n\nNo sources were found for this section ({objective})."
                ),
                sources,
            });
        }

        let prompt = format!(
            "You are writing one chapter of a larger report on '{topic}'.\n\
             CHAPTER: {title}\nOBJECTIVE: {objective}\n\n\
             Write a detailed section in Markdown that fulfils the objective using only the \
             sources below. Do not add an introduction to the overall report and do not \
             repeat the chapter title as a heading.\n\n\
             {CITATION_RULES}\n\nSOURCES:\n{}",
            source_block(&sources)
        );
        let text = self.complete(prompt).await?;

        Ok(DraftOutput {
            title: title.to_string(),
            body_markdown: format!("## {title}\n\n{text}"),
            sources,
        })
    }

    async fn complete(&self, prompt: String) -> Result<String, TaskError> {
        let reply = self
            .llm
            .complete(LlmRequest::new(&self.model, prompt))
            .await
            .map_err(TaskError::from)?;
        let reply = reply.trim();
        if reply.is_empty() {
            return Err(TaskError::new("model returned an empty draft", true));
        }
        Ok(reply.to_string())
    }
}

const CITATION_RULES: &str = "CITATIONS: every paragraph and list item must end with the tag \
of the source it relies on, copied exactly from its SOURCE line, e.g. [src:<id>]. \
Use only the tags listed below. Never invent tags or URLs.";

/// Merge sources across branches, keeping the first record per URL, then the
/// `limit` best by score.
fn select_sources(
    records: impl IntoIterator<Item = SourceRecord>,
    limit: usize,
) -> Vec<SourceRecord> {
    let mut seen = HashSet::new();
    let mut merged: Vec<SourceRecord> = records
        .into_iter()
        .filter(|record| seen.insert(normalize_url(&record.url)))
        .collect();
    rank_by_score(&mut merged);
    merged.truncate(limit);
    merged
}

fn source_block(sources: &[SourceRecord]) -> String {
    let mut block = String::new();
    for source in sources {
        let _ = writeln!(
            block,
            "SOURCE {}: {}\nURL: {}\nCONTENT: {}\n",
            source.citation_tag(),
            source.display_title(),
            source.url,
            source.best_text()
        );
    }
    block
}

fn assemble(topic: &str, chapters: Vec<DraftOutput>) -> Result<DraftOutput, TaskError> {
    if chapters.is_empty() {
        return Err(TaskError::terminal("no chapters to assemble"));
    }
    let body = chapters
        .iter()
        .map(|chapter| chapter.body_markdown.trim())
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut seen = HashSet::new();
    let sources = chapters
        .into_iter()
        .flat_map(|chapter| chapter.sources)
        .filter(|source| seen.insert(source.id))
        .collect();

    Ok(DraftOutput {
        title: format!("Master Report: {topic}"),
        body_markdown: body,
        sources,
    })
}

#[async_trait::async_trait]
impl Agent for AnalystAgent {
    async fn execute(&self, context: &AgentContext) -> Result<AgentResult, TaskError> {
        let topic = context.require_str("topic")?;
        let mode = context.param_str("mode").unwrap_or("report");
        info!(task_id = %context.task_id, mode = %mode, "Analyst agent executing");

        let draft = match mode {
            "report" => self.write_report(topic, decode_inputs(&context.inputs)?).await?,
            "chapter" => {
                let title = context.require_str("title")?;
                let objective = context.param_str("objective").unwrap_or(title);
                self.write_chapter(topic, title, objective, decode_inputs(&context.inputs)?)
                    .await?
            }
            "assemble" => assemble(topic, decode_inputs(&context.inputs)?)?,
            other => {
                return Err(TaskError::terminal(format!("unknown analyst mode '{other}'")));
            }
        };

        context.send_message(
            None,
            format!("Drafted '{}' from {} sources", draft.title, draft.sources.len()),
            serde_json::json!({"stage": mode, "characters": draft.body_markdown.len()}),
        );

        Ok(AgentResult {
            task_id: context.task_id.clone(),
            role: AgentRole::Analyst,
            output: encode(&draft)?,
            confidence: 1.0,
        })
    }

    fn role(&self) -> AgentRole {
        AgentRole::Analyst
    }
}
