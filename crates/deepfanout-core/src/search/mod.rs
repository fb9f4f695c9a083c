//! Search providers queried by the fan-out.

mod serper;
mod static_provider;
mod tavily;

pub use serper::SerperProvider;
pub use static_provider::StaticProvider;
pub use tavily::TavilyProvider;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::{Config, FanoutError, SearchHit};

/// Failure of a single provider request.
#[derive(Debug, Clone, Error)]
pub enum SearchError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode provider response: {0}")]
    Decode(String),
    /// Deadline in milliseconds when the fan-out enforced it; `None` when the
    /// HTTP client gave up on its own.
    #[error("request timed out{}", .0.map(|ms| format!(" after {ms} ms")).unwrap_or_default())]
    Timeout(Option<u64>),
}

impl SearchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SearchError::Transport(_) | SearchError::Timeout(_) => true,
            SearchError::Status { status, .. } => *status == 429 || *status >= 500,
            SearchError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for SearchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SearchError::Timeout(None)
        } else if err.is_decode() {
            SearchError::Decode(err.to_string())
        } else {
            SearchError::Transport(err.to_string())
        }
    }
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Short provider identifier recorded on every hit.
    fn name(&self) -> &str;

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError>;
}

pub type DynSearchProvider = Arc<dyn SearchProvider>;

/// Read a non-success response into a [`SearchError::Status`].
pub(crate) async fn status_error(response: reqwest::Response) -> SearchError {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    SearchError::Status {
        status,
        body: crate::source::truncate_chars(&body, 300),
    }
}

/// Build every provider whose API key is present in the environment.
///
/// Providers without a key are skipped; an empty result is an error so that a
/// fan-out never silently searches nothing.
pub fn providers_from_config(config: &Config) -> Result<Vec<DynSearchProvider>, FanoutError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(config.fanout.request_timeout_ms))
        .build()
        .map_err(|err| FanoutError::InvalidConfiguration(format!("http client: {err}")))?;

    let mut providers: Vec<DynSearchProvider> = Vec::new();

    match config.tavily_api_key() {
        Some(key) => providers.push(Arc::new(TavilyProvider::new(
            client.clone(),
            key,
            &config.search,
        ))),
        None => tracing::debug!(
            env = %config.search.tavily_api_key_env,
            "tavily disabled: API key not set"
        ),
    }

    match config.serper_api_key() {
        Some(key) => providers.push(Arc::new(SerperProvider::new(
            client.clone(),
            key,
            &config.search,
        ))),
        None => tracing::debug!(
            env = %config.search.serper_api_key_env,
            "serper disabled: API key not set"
        ),
    }

    if providers.is_empty() {
        return Err(FanoutError::NoProviders(format!(
            "{} or {}",
            config.search.tavily_api_key_env, config.search.serper_api_key_env
        )));
    }

    tracing::info!(
        providers = ?providers.iter().map(|p| p.name().to_string()).collect::<Vec<_>>(),
        "search providers configured"
    );
    Ok(providers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_follows_status_class() {
        let limited = SearchError::Status {
            status: 429,
            body: String::new(),
        };
        let unavailable = SearchError::Status {
            status: 503,
            body: String::new(),
        };
        let forbidden = SearchError::Status {
            status: 403,
            body: String::new(),
        };
        assert!(limited.is_retryable());
        assert!(unavailable.is_retryable());
        assert!(!forbidden.is_retryable());
        assert!(SearchError::Timeout(Some(10)).is_retryable());
        assert!(!SearchError::Decode("bad".into()).is_retryable());
    }

    #[test]
    fn timeout_message_only_names_a_known_deadline() {
        assert_eq!(
            SearchError::Timeout(Some(250)).to_string(),
            "request timed out after 250 ms"
        );
        assert_eq!(SearchError::Timeout(None).to_string(), "request timed out");
    }

    #[test]
    fn missing_keys_yield_no_providers_error() {
        let mut config = Config::default();
        config.search.tavily_api_key_env = "DEEPFANOUT_TEST_NO_TAVILY".into();
        config.search.serper_api_key_env = "DEEPFANOUT_TEST_NO_SERPER".into();
        unsafe {
            std::env::remove_var("DEEPFANOUT_TEST_NO_TAVILY");
            std::env::remove_var("DEEPFANOUT_TEST_NO_SERPER");
        }

        let err = match providers_from_config(&config) {
            Err(err) => err,
            Ok(_) => panic!("expected NoProviders"),
        };
        assert!(matches!(err, FanoutError::NoProviders(_)));
    }

    #[test]
    fn present_key_enables_provider() {
        let mut config = Config::default();
        config.search.tavily_api_key_env = "DEEPFANOUT_TEST_TAVILY_SET".into();
        config.search.serper_api_key_env = "DEEPFANOUT_TEST_SERPER_UNSET".into();
        unsafe {
            std::env::set_var("DEEPFANOUT_TEST_TAVILY_SET", "tvly-test");
            std::env::remove_var("DEEPFANOUT_TEST_SERPER_UNSET");
        }

        let providers = providers_from_config(&config).expect("tavily should be enabled");
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].name(), "tavily");
    }
}
