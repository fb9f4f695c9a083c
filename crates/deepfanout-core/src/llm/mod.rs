//! Language-model access used by the Supervisor, Executors, Analyst and Critic.

mod openai;
mod scripted;

pub use openai::OpenAiResponsesClient;
pub use scripted::ScriptedLlm;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::TaskError;

#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("LLM provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected LLM response: {0}")]
    Malformed(String),
    #[error("LLM request timed out")]
    Timeout,
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Transport(_) | LlmError::Timeout => true,
            LlmError::Status { status, .. } => *status == 429 || *status >= 500,
            LlmError::Malformed(_) => false,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else if err.is_decode() {
            LlmError::Malformed(err.to_string())
        } else {
            LlmError::Transport(err.to_string())
        }
    }
}

impl From<LlmError> for TaskError {
    fn from(err: LlmError) -> Self {
        let retryable = err.is_retryable();
        TaskError::new(err.to_string(), retryable)
    }
}

/// A single prompt sent to a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmRequest {
    pub model: String,
    pub input: String,
}

impl LlmRequest {
    pub fn new(model: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            input: input.into(),
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> Result<String, LlmError>;
}

pub type DynLlmClient = Arc<dyn LlmClient>;

/// Remove Markdown code fences models like to wrap JSON in.
///
/// The language tag after the opening fence is dropped whether the body
/// starts on the next line or on the same one.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let body = match trimmed.strip_prefix("```") {
        Some(rest) => {
            let tag_end = rest
                .find(|c: char| !c.is_ascii_alphanumeric())
                .unwrap_or(rest.len());
            match rest[tag_end..].chars().next() {
                Some(c) if c.is_whitespace() => &rest[tag_end..],
                _ => rest,
            }
        }
        None => trimmed,
    };
    let body = body.trim();
    body.strip_suffix("```").unwrap_or(body).trim().to_string()
}

/// Parse model output as JSON after stripping code fences.
pub fn parse_json_reply<T: DeserializeOwned>(text: &str) -> Result<T, LlmError> {
    let cleaned = strip_code_fences(text);
    serde_json::from_str(&cleaned).map_err(|err| LlmError::Malformed(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_fences() {
        let text = "```json\n[\"a\", \"b\"]\n```";
        assert_eq!(strip_code_fences(text), "[\"a\", \"b\"]");
    }

    #[test]
    fn strips_bare_fences_and_leaves_plain_text() {
        assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("  [1, 2] "), "[1, 2]");
    }

    #[test]
    fn strips_single_line_fence_with_language_tag() {
        let text = "```json [\"a\", \"b\"]```";
        assert_eq!(strip_code_fences(text), "[\"a\", \"b\"]");

        let parsed: Vec<String> = parse_json_reply(text).unwrap();
        assert_eq!(parsed, vec!["a".to_string(), "b".to_string()]);

        // No tag: the body touches the fence.
        assert_eq!(strip_code_fences("```[1]```"), "[1]");
    }

    #[test]
    fn parse_json_reply_reports_malformed_output() {
        let parsed: Vec<String> = parse_json_reply("```json\n[\"x\"]\n```").unwrap();
        assert_eq!(parsed, vec!["x".to_string()]);

        let err = parse_json_reply::<Vec<String>>("not json").unwrap_err();
        assert!(matches!(err, LlmError::Malformed(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn llm_errors_convert_to_task_errors() {
        let task: TaskError = LlmError::Status {
            status: 503,
            body: "overloaded".into(),
        }
        .into();
        assert!(task.is_retryable());
    }
}
