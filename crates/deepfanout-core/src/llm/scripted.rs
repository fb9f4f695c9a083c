use std::sync::Mutex;

use async_trait::async_trait;

use super::{LlmClient, LlmError, LlmRequest};

enum Reply {
    Text(String),
    Fail(LlmError),
}

/// Deterministic [`LlmClient`] for tests and offline runs.
///
/// Prompts are matched against rules by substring, in insertion order; the
/// first matching rule answers. Unmatched prompts get the fallback reply.
pub struct ScriptedLlm {
    rules: Vec<(String, Reply)>,
    fallback: Reply,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            fallback: Reply::Fail(LlmError::Malformed("no scripted reply".into())),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer prompts containing `needle` with `reply`.
    pub fn on(mut self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules.push((needle.into(), Reply::Text(reply.into())));
        self
    }

    /// Fail prompts containing `needle` with `error`.
    pub fn fail_on(mut self, needle: impl Into<String>, error: LlmError) -> Self {
        self.rules.push((needle.into(), Reply::Fail(error)));
        self
    }

    pub fn otherwise(mut self, reply: impl Into<String>) -> Self {
        self.fallback = Reply::Text(reply.into());
        self
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl Default for ScriptedLlm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, request: LlmRequest) -> Result<String, LlmError> {
        let reply = self
            .rules
            .iter()
            .find(|(needle, _)| request.input.contains(needle.as_str()))
            .map(|(_, reply)| reply)
            .unwrap_or(&self.fallback);

        if let Ok(mut guard) = self.requests.lock() {
            guard.push(request);
        }

        match reply {
            Reply::Text(text) => Ok(text.clone()),
            Reply::Fail(err) => Err(err.clone()),
        }
    }
}
