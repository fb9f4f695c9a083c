//! Typed payloads exchanged between agents through the task graph.

use deepfanout_core::{FanoutReport, SourceRecord, TaskError, TaskInput};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

/// Researcher output: the fan-out for one sub-query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchOutput {
    pub query: String,
    pub fanout: FanoutReport,
}

/// Executor output: sources for one sub-query, now carrying summaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryOutput {
    pub query: String,
    pub sources: Vec<SourceRecord>,
    pub fallbacks: usize,
}

/// Analyst output: a report body or chapter plus the sources it may cite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftOutput {
    pub title: String,
    pub body_markdown: String,
    pub sources: Vec<SourceRecord>,
}

/// Critic output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CritiqueVerdict {
    pub claims: usize,
    pub supported_claims: usize,
    pub confidence: f64,
    pub min_confidence: f64,
    pub unknown_citations: Vec<Uuid>,
    /// Opening words of claims without a valid citation.
    pub unsupported: Vec<String>,
    pub notes: Vec<String>,
    pub passed: bool,
}

impl CritiqueVerdict {
    pub fn summary(&self) -> String {
        let state = if self.passed {
            "passed"
        } else {
            "review suggested"
        };
        format!(
            "{state}: {}/{} claims cited (confidence {:.2}, required {:.2})",
            self.supported_claims, self.claims, self.confidence, self.min_confidence
        )
    }
}

/// Serialize a payload for the orchestrator.
pub fn encode<T: Serialize>(payload: &T) -> Result<serde_json::Value, TaskError> {
    serde_json::to_value(payload)
        .map_err(|err| TaskError::terminal(format!("failed to encode payload: {err}")))
}

/// Decode every input as `T`.
pub fn decode_inputs<T: DeserializeOwned>(inputs: &[TaskInput]) -> Result<Vec<T>, TaskError> {
    inputs
        .iter()
        .map(|input| {
            serde_json::from_value(input.output.clone()).map_err(|err| {
                TaskError::terminal(format!(
                    "unexpected payload from {}: {err}",
                    input.task_id
                ))
            })
        })
        .collect()
}
