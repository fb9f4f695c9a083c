use std::{fmt, path::PathBuf};

use thiserror::Error;

/// Core error type for DeepFanout.
#[derive(Debug, Error)]
pub enum FanoutError {
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("missing environment variable: {0}")]
    MissingSecret(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("no search providers configured (set {0})")]
    NoProviders(String),
    #[error("planning error: {0}")]
    PlanningError(String),
    #[error("orchestration error: {0}")]
    OrchestrationError(String),
    #[error("export failed: {0}")]
    Export(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FanoutError {
    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }

    /// Whether the error stems from configuration rather than a runtime failure.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfiguration(_)
                | Self::MissingSecret(_)
                | Self::ConfigIo { .. }
                | Self::NoProviders(_)
        )
    }
}

/// Error representing a task failure within the orchestration graph.
#[derive(Debug, Clone)]
pub struct TaskError {
    pub reason: String,
    pub retryable: bool,
}

impl TaskError {
    pub fn new(reason: impl Into<String>, retryable: bool) -> Self {
        Self {
            reason: reason.into(),
            retryable,
        }
    }

    pub fn terminal(reason: impl Into<String>) -> Self {
        Self::new(reason, false)
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let retry = if self.retryable {
            "retryable"
        } else {
            "terminal"
        };
        write!(f, "{retry} task failure: {}", self.reason)
    }
}

impl std::error::Error for TaskError {}
