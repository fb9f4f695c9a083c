//! Concurrent fan-out of sub-queries across search providers.
//!
//! Every (sub-query, provider) pair becomes one request. All requests are in
//! flight at once, bounded by a semaphore, and the gathered hits are filtered
//! by relevance score and de-duplicated by URL. The output order follows the
//! request order (sub-query, then provider, then provider rank), never the
//! completion order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::config::FanoutConfig;
use crate::metrics;
use crate::search::{DynSearchProvider, SearchError};
use crate::source::normalize_url;
use crate::{FanoutError, Query, RetryPolicy, SearchHit, SourceRecord};

/// Knobs controlling a fan-out run.
#[derive(Debug, Clone)]
pub struct FanoutSettings {
    pub relevance_threshold: f64,
    pub keep_unscored: bool,
    pub max_concurrency: usize,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for FanoutSettings {
    fn default() -> Self {
        Self::from(&FanoutConfig::default())
    }
}

impl From<&FanoutConfig> for FanoutSettings {
    fn from(config: &FanoutConfig) -> Self {
        Self {
            relevance_threshold: config.relevance_threshold,
            keep_unscored: config.keep_unscored,
            max_concurrency: config.max_concurrency.max(1),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            retry: RetryPolicy::new(
                config.max_retries,
                config.initial_backoff_ms,
                config.max_backoff_ms,
            ),
        }
    }
}

/// A provider request that never produced results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutFailure {
    pub provider: String,
    pub query: String,
    pub error: String,
    pub attempts: usize,
}

/// Outcome of a fan-out: surviving records plus bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutReport {
    pub topic: String,
    pub sub_queries: Vec<String>,
    pub records: Vec<SourceRecord>,
    pub failures: Vec<FanoutFailure>,
    pub requests: usize,
    pub discarded_below_threshold: usize,
    pub duplicates: usize,
    pub duration_ms: u64,
}

impl FanoutReport {
    /// True when every request failed.
    pub fn all_failed(&self) -> bool {
        self.requests > 0 && self.failures.len() == self.requests
    }
}

struct RequestOutcome {
    query_index: usize,
    provider: String,
    result: Result<Vec<SearchHit>, SearchError>,
    attempts: usize,
}

/// Issues sub-queries to every configured provider concurrently.
#[derive(Clone)]
pub struct FanoutEngine {
    providers: Vec<DynSearchProvider>,
    settings: FanoutSettings,
}

impl FanoutEngine {
    pub fn new(providers: Vec<DynSearchProvider>, settings: FanoutSettings) -> Self {
        Self {
            providers,
            settings,
        }
    }

    pub fn settings(&self) -> &FanoutSettings {
        &self.settings
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    #[instrument(
        name = "fanout.run",
        skip(self, query),
        fields(topic = %query.topic, sub_queries = query.len())
    )]
    pub async fn run(&self, query: &Query) -> Result<FanoutReport, FanoutError> {
        if self.providers.is_empty() {
            return Err(FanoutError::NoProviders(
                "at least one search provider".to_string(),
            ));
        }

        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrency));

        let requests = query
            .sub_queries
            .iter()
            .enumerate()
            .flat_map(|(query_index, sub_query)| {
                self.providers
                    .iter()
                    .map(move |provider| (query_index, sub_query.as_str(), provider))
            })
            .map(|(query_index, sub_query, provider)| {
                let semaphore = semaphore.clone();
                async move {
                    let _permit = semaphore.acquire().await.ok();
                    let (result, attempts) = self.request_with_retry(provider, sub_query).await;
                    RequestOutcome {
                        query_index,
                        provider: provider.name().to_string(),
                        result,
                        attempts,
                    }
                }
            });

        let outcomes = join_all(requests).await;
        let request_count = outcomes.len();

        let mut report = self.gather(query, outcomes);
        report.requests = request_count;
        report.duration_ms = started.elapsed().as_millis() as u64;

        metrics::record_fanout_records(report.records.len());
        info!(
            requests = report.requests,
            kept = report.records.len(),
            failed = report.failures.len(),
            below_threshold = report.discarded_below_threshold,
            duplicates = report.duplicates,
            duration_ms = report.duration_ms,
            "fan-out complete"
        );

        Ok(report)
    }

    async fn request_with_retry(
        &self,
        provider: &DynSearchProvider,
        sub_query: &str,
    ) -> (Result<Vec<SearchHit>, SearchError>, usize) {
        let timeout = self.settings.request_timeout;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let started = Instant::now();
            let result = match tokio::time::timeout(timeout, provider.search(sub_query)).await {
                Ok(result) => result,
                Err(_) => Err(SearchError::Timeout(Some(timeout.as_millis() as u64))),
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(hits) => {
                    metrics::record_search_request(provider.name(), "ok", duration_ms, hits.len());
                    debug!(
                        provider = provider.name(),
                        query = sub_query,
                        hits = hits.len(),
                        "provider request succeeded"
                    );
                    return (Ok(hits), attempt);
                }
                Err(err) if err.is_retryable() && attempt <= self.settings.retry.max_retries => {
                    metrics::record_search_request(provider.name(), "retry", duration_ms, 0);
                    let backoff = self.settings.retry.backoff(attempt);
                    warn!(
                        provider = provider.name(),
                        query = sub_query,
                        error = %err,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "provider request failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => {
                    metrics::record_search_request(provider.name(), "error", duration_ms, 0);
                    warn!(
                        provider = provider.name(),
                        query = sub_query,
                        error = %err,
                        attempt,
                        "provider request failed"
                    );
                    return (Err(err), attempt);
                }
            }
        }
    }

    fn gather(&self, query: &Query, outcomes: Vec<RequestOutcome>) -> FanoutReport {
        let mut records: Vec<SourceRecord> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut failures = Vec::new();
        let mut discarded = 0;
        let mut duplicates = 0;

        for outcome in outcomes {
            let sub_query = &query.sub_queries[outcome.query_index];
            let mut hits = match outcome.result {
                Ok(hits) => hits,
                Err(err) => {
                    failures.push(FanoutFailure {
                        provider: outcome.provider,
                        query: sub_query.clone(),
                        error: err.to_string(),
                        attempts: outcome.attempts,
                    });
                    continue;
                }
            };
            hits.sort_by_key(|hit| hit.rank);

            for hit in hits {
                if !self.passes_threshold(hit.score) {
                    discarded += 1;
                    continue;
                }

                let key = normalize_url(&hit.url);
                match index.get(&key) {
                    Some(&existing) => {
                        duplicates += 1;
                        let record = &mut records[existing];
                        if !record.matched_queries.contains(sub_query) {
                            record.matched_queries.push(sub_query.clone());
                        }
                        if let Some(score) = hit.score {
                            record.score = Some(record.score.map_or(score, |s| s.max(score)));
                        }
                    }
                    None => {
                        index.insert(key, records.len());
                        records.push(SourceRecord::from_hit(hit, sub_query));
                    }
                }
            }
        }

        FanoutReport {
            topic: query.topic.clone(),
            sub_queries: query.sub_queries.clone(),
            records,
            failures,
            requests: 0,
            discarded_below_threshold: discarded,
            duplicates,
            duration_ms: 0,
        }
    }

    fn passes_threshold(&self, score: Option<f64>) -> bool {
        match score {
            Some(score) => score >= self.settings.relevance_threshold,
            None => self.settings.keep_unscored,
        }
    }
}

/// Fan a topic and its sub-queries out across every configured provider.
///
/// This is the standalone mode: no planning, no LLM, just search and filter.
pub async fn run_fanout(
    config: &crate::Config,
    topic: &str,
    sub_queries: &[String],
) -> Result<FanoutReport, FanoutError> {
    let query = Query::new(topic, sub_queries)?;
    let providers = crate::search::providers_from_config(config)?;
    let engine = FanoutEngine::new(providers, FanoutSettings::from(&config.fanout));
    engine.run(&query).await
}
