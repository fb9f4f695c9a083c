//! Critic agent for citation checking and consistency validation.

use std::collections::HashSet;

use crate::agent_context::{Agent, AgentContext, AgentResult};
use crate::payloads::{CritiqueVerdict, DraftOutput, decode_inputs, encode};
use deepfanout_core::llm::parse_json_reply;
use deepfanout_core::source::truncate_chars;
use deepfanout_core::{
    AgentRole, DynLlmClient, LlmRequest, SourceRecord, TaskError, extract_citations,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const MIN_CLAIM_WORDS: usize = 4;
const MAX_UNSUPPORTED_LISTED: usize = 10;
const REFERENCE_HEADINGS: [&str; 4] = ["sources", "references", "bibliography", "citations"];

/// Claims in a Markdown body: non-heading paragraphs and list items.
///
/// Code blocks, tables, horizontal rules and any trailing reference list
/// the model wrote itself are not claims.
pub fn extract_claims(body: &str) -> Vec<String> {
    let mut claims = Vec::new();
    let mut current = String::new();
    let mut in_code = false;

    let flush = |current: &mut String, claims: &mut Vec<String>| {
        let text = current.trim();
        let words = text
            .split_whitespace()
            .filter(|word| !word.starts_with("[src:"))
            .count();
        if words >= MIN_CLAIM_WORDS {
            claims.push(text.to_string());
        }
        current.clear();
    };

    for line in body.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with("```") {
            flush(&mut current, &mut claims);
            in_code = !in_code;
            continue;
        }
        if in_code {
            continue;
        }
        if trimmed.is_empty() || trimmed.starts_with('|') || is_rule(trimmed) {
            flush(&mut current, &mut claims);
            continue;
        }
        if let Some(heading) = trimmed.strip_prefix('#') {
            flush(&mut current, &mut claims);
            let heading = heading.trim_start_matches('#').trim().to_lowercase();
            if REFERENCE_HEADINGS.contains(&heading.as_str()) {
                break;
            }
            continue;
        }
        if let Some(item) = list_item(trimmed) {
            flush(&mut current, &mut claims);
            current.push_str(item);
            continue;
        }

        let text = trimmed.strip_prefix('>').map(str::trim).unwrap_or(trimmed);
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(text);
    }
    flush(&mut current, &mut claims);
    claims
}

fn is_rule(line: &str) -> bool {
    line.len() >= 3
        && ['-', '*', '_']
            .iter()
            .any(|marker| line.chars().all(|c| c == *marker || c == ' '))
}

fn list_item(line: &str) -> Option<&str> {
    for marker in ["- ", "* ", "+ "] {
        if let Some(rest) = line.strip_prefix(marker) {
            return Some(rest.trim());
        }
    }
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(item) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return Some(item.trim());
        }
    }
    None
}

/// Deterministic citation check of `body` against the sources it may cite.
pub fn assess(body: &str, sources: &[SourceRecord], min_confidence: f64) -> CritiqueVerdict {
    let known: HashSet<Uuid> = sources.iter().map(|source| source.id).collect();
    let unknown_citations: Vec<Uuid> = extract_citations(body)
        .into_iter()
        .filter(|id| !known.contains(id))
        .collect();

    let claims = extract_claims(body);
    let mut supported_claims = 0;
    let mut unsupported = Vec::new();
    for claim in &claims {
        if extract_citations(claim).iter().any(|id| known.contains(id)) {
            supported_claims += 1;
        } else if unsupported.len() < MAX_UNSUPPORTED_LISTED {
            unsupported.push(truncate_chars(claim, 80));
        }
    }

    let confidence = if claims.is_empty() {
        0.0
    } else {
        supported_claims as f64 / claims.len() as f64
    };

    CritiqueVerdict {
        claims: claims.len(),
        supported_claims,
        confidence,
        min_confidence,
        passed: !claims.is_empty() && confidence >= min_confidence && unknown_citations.is_empty(),
        unknown_citations,
        unsupported,
        notes: Vec::new(),
    }
}

/// Critic agent that validates citations and, optionally, asks a model to
/// review the draft against its sources.
pub struct CriticAgent {
    min_confidence: f64,
    reviewer: Option<(DynLlmClient, String)>,
}

impl CriticAgent {
    pub fn new(min_confidence: f64) -> Self {
        Self {
            min_confidence,
            reviewer: None,
        }
    }

    pub fn with_llm_review(mut self, llm: DynLlmClient, model: impl Into<String>) -> Self {
        self.reviewer = Some((llm, model.into()));
        self
    }

    #[instrument(name = "critic.review", skip_all)]
    async fn review(&self, draft: &DraftOutput) -> Vec<String> {
        let Some((llm, model)) = &self.reviewer else {
            return Vec::new();
        };

        let evidence = draft
            .sources
            .iter()
            .map(|source| {
                format!(
                    "{} {}",
                    source.citation_tag(),
                    truncate_chars(source.best_text(), 600)
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "You are a Critic fact-checking a research report. Compare the report with the \
             cited source evidence. List claims that the cited source does not support, \
             and claims that contradict each other. \
             Return ONLY a JSON list of short strings, one per problem, \
             or [] if there are none.\n\n\
             EVIDENCE:\n{evidence}\n\nREPORT:\n{}",
            draft.body_markdown
        );

        match llm.complete(LlmRequest::new(model, prompt)).await {
            Ok(reply) => match parse_json_reply::<Vec<String>>(&reply) {
                Ok(notes) => notes
                    .into_iter()
                    .map(|note| note.trim().to_string())
                    .filter(|note| !note.is_empty())
                    .collect(),
                Err(err) => {
                    warn!(error = %err, "Review reply was not a JSON list; ignoring");
                    Vec::new()
                }
            },
            Err(err) => {
                warn!(error = %err, "Model review failed; keeping deterministic verdict");
                Vec::new()
            }
        }
    }
}

#[async_trait::async_trait]
impl Agent for CriticAgent {
    async fn execute(&self, context: &AgentContext) -> Result<AgentResult, TaskError> {
        info!(task_id = %context.task_id, "Critic agent executing");

        let draft = decode_inputs::<DraftOutput>(&context.inputs)?
            .into_iter()
            .next()
            .ok_or_else(|| TaskError::terminal("no draft to critique"))?;
        let min_confidence = context
            .get_param("min_confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(self.min_confidence);

        context.send_message(
            None,
            "Starting citation check".to_string(),
            serde_json::json!({"stage": "validation", "sources": draft.sources.len()}),
        );

        let mut verdict = assess(&draft.body_markdown, &draft.sources, min_confidence);
        debug!(
            claims = verdict.claims,
            supported = verdict.supported_claims,
            unknown = verdict.unknown_citations.len(),
            "Citation check complete"
        );
        verdict.notes = self.review(&draft).await;

        context.send_message(None, verdict.summary(), encode(&verdict)?);

        Ok(AgentResult {
            task_id: context.task_id.clone(),
            role: AgentRole::Critic,
            output: encode(&verdict)?,
            confidence: verdict.confidence,
        })
    }

    fn role(&self) -> AgentRole {
        AgentRole::Critic
    }
}
