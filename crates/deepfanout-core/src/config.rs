use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{FanoutError, SecretValue, optional_env, require_env};

const DEFAULT_CONFIG_PATH: &str = "deepfanout.toml";
const CONFIG_PATH_ENV: &str = "DEEPFANOUT_CONFIG";

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub fanout: FanoutConfig,
    pub planner: PlannerConfig,
    pub executor: ExecutorConfig,
    pub synthesis: SynthesisConfig,
    pub critic: CriticConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Resolve the configured LLM secret value (from environment only).
    pub fn llm_api_key(&self) -> Result<SecretValue, FanoutError> {
        require_env(&self.llm.api_key_env)
    }

    pub fn tavily_api_key(&self) -> Option<SecretValue> {
        optional_env(&self.search.tavily_api_key_env)
    }

    pub fn serper_api_key(&self) -> Option<SecretValue> {
        optional_env(&self.search.serper_api_key_env)
    }

    /// Model used for cheap per-source steps; falls back to the main model.
    pub fn cheap_model(&self) -> &str {
        self.llm
            .cheap_model
            .as_deref()
            .filter(|model| !model.trim().is_empty())
            .unwrap_or(&self.llm.model)
    }
}

/// Helper to load configuration with guard rails.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a provided path or discoverable defaults.
    ///
    /// Resolution order:
    /// 1. Explicit `path` argument.
    /// 2. `DEEPFANOUT_CONFIG` environment variable.
    /// 3. `deepfanout.toml` in the current working directory.
    ///
    /// Only the implicit default file may be absent, in which case the
    /// built-in defaults are used.
    pub fn load(path: Option<PathBuf>) -> Result<Config, FanoutError> {
        let (candidate, explicit) = resolve_path(path);
        if !explicit && !candidate.exists() {
            tracing::debug!(path = %candidate.display(), "no config file found, using defaults");
            let config = Config::default();
            Self::validate(&config)?;
            return Ok(config);
        }

        let raw = fs::read_to_string(&candidate)
            .map_err(|err| FanoutError::config_io(candidate.clone(), err))?;
        let config = Self::parse(&raw)?;
        tracing::debug!(path = %candidate.display(), "configuration loaded");
        Ok(config)
    }

    /// Parse and validate configuration from TOML text.
    pub fn parse(raw: &str) -> Result<Config, FanoutError> {
        let config: Config = toml::from_str(raw)
            .map_err(|err| FanoutError::InvalidConfiguration(err.to_string()))?;
        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(config: &Config) -> Result<(), FanoutError> {
        if config.llm.api_key_env.trim().is_empty() {
            return Err(FanoutError::InvalidConfiguration(
                "llm.api_key_env must reference an environment variable".into(),
            ));
        }
        if config.llm.model.trim().is_empty() {
            return Err(FanoutError::InvalidConfiguration(
                "llm.model must not be empty".into(),
            ));
        }
        check_unit("fanout.relevance_threshold", config.fanout.relevance_threshold)?;
        check_unit("critic.min_confidence", config.critic.min_confidence)?;
        check_positive("fanout.max_concurrency", config.fanout.max_concurrency)?;
        check_positive("executor.concurrency", config.executor.concurrency)?;
        check_positive("planner.sub_query_count", config.planner.sub_query_count)?;
        check_positive("synthesis.max_sources", config.synthesis.max_sources)?;
        Ok(())
    }
}

fn check_unit(field: &str, value: f64) -> Result<(), FanoutError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(FanoutError::InvalidConfiguration(format!(
            "{field} must be within [0, 1], got {value}"
        )));
    }
    Ok(())
}

fn check_positive(field: &str, value: usize) -> Result<(), FanoutError> {
    if value == 0 {
        return Err(FanoutError::InvalidConfiguration(format!(
            "{field} must be at least 1"
        )));
    }
    Ok(())
}

fn resolve_path(path: Option<PathBuf>) -> (PathBuf, bool) {
    if let Some(path) = path {
        return (path, true);
    }

    if let Ok(from_env) = env::var(CONFIG_PATH_ENV) {
        if !from_env.trim().is_empty() {
            return (PathBuf::from(from_env), true);
        }
    }

    (Path::new(DEFAULT_CONFIG_PATH).to_path_buf(), false)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub cheap_model: Option<String>,
    pub api_key_env: String,
    pub base_url: String,
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "o4-mini".to_string(),
            cheap_model: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout_ms: 120_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub tavily_api_key_env: String,
    pub serper_api_key_env: String,
    pub tavily_depth: String,
    pub tavily_max_results: u32,
    pub tavily_include_raw: bool,
    pub serper_num: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            tavily_api_key_env: "TAVILY_API_KEY".to_string(),
            serper_api_key_env: "SERPER_API_KEY".to_string(),
            tavily_depth: "advanced".to_string(),
            tavily_max_results: 20,
            tavily_include_raw: true,
            serper_num: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    pub relevance_threshold: f64,
    pub keep_unscored: bool,
    pub max_concurrency: usize,
    pub request_timeout_ms: u64,
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            relevance_threshold: 0.75,
            keep_unscored: true,
            max_concurrency: 16,
            request_timeout_ms: 30_000,
            max_retries: 1,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub sub_query_count: usize,
    pub deep_mode: bool,
    pub max_concurrent_tasks: usize,
    pub max_task_retries: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            sub_query_count: 4,
            deep_mode: false,
            max_concurrent_tasks: 8,
            max_task_retries: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub max_sources: usize,
    pub concurrency: usize,
    pub fallback_chars: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_sources: 10,
            concurrency: 4,
            fallback_chars: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub max_sources: usize,
    pub chapter_sources: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            max_sources: 40,
            chapter_sources: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CriticConfig {
    pub min_confidence: f64,
    pub llm_review: bool,
}

impl Default for CriticConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.75,
            llm_review: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub pdf_program: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            pdf_program: "agent-browser".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.fanout.relevance_threshold, 0.75);
        assert_eq!(config.planner.sub_query_count, 4);
        assert_eq!(config.synthesis.max_sources, 40);
        assert_eq!(config.search.tavily_max_results, 20);
        assert_eq!(config.search.serper_num, 50);
        assert_eq!(config.cheap_model(), "o4-mini");
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let config = ConfigLoader::parse(
            r#"
            [llm]
            model = "gpt-4.1"
            cheap_model = "gpt-4.1-mini"

            [fanout]
            relevance_threshold = 0.5
            "#,
        )
        .expect("config should parse");

        assert_eq!(config.llm.model, "gpt-4.1");
        assert_eq!(config.cheap_model(), "gpt-4.1-mini");
        assert_eq!(config.fanout.relevance_threshold, 0.5);
        assert_eq!(config.fanout.max_concurrency, 16);
        assert_eq!(config.llm.api_key_env, "OPENAI_API_KEY");
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let err = ConfigLoader::parse("[fanout]\nrelevance_threshold = 1.5\n").unwrap_err();
        assert!(matches!(err, FanoutError::InvalidConfiguration(_)));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = ConfigLoader::parse("[executor]\nconcurrency = 0\n").unwrap_err();
        assert!(err.to_string().contains("executor.concurrency"));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = ConfigLoader::load(Some(dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, FanoutError::ConfigIo { .. }));
    }

    #[test]
    fn explicit_file_is_loaded() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("deepfanout.toml");
        let mut file = fs::File::create(&path).expect("create config");
        writeln!(file, "[critic]\nmin_confidence = 0.9").expect("write config");

        let config = ConfigLoader::load(Some(path)).expect("config should load");
        assert_eq!(config.critic.min_confidence, 0.9);
    }
}
