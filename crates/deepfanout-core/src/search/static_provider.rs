use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{SearchError, SearchProvider};
use crate::SearchHit;

/// In-memory provider for tests and offline runs.
///
/// Returns canned hits per query (or a default set), optionally after a delay
/// or a number of scripted failures.
pub struct StaticProvider {
    name: String,
    by_query: HashMap<String, Vec<SearchHit>>,
    default_hits: Vec<SearchHit>,
    failures: Vec<SearchError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl StaticProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            by_query: HashMap::new(),
            default_hits: Vec::new(),
            failures: Vec::new(),
            delay: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Add a hit returned for every query without a specific entry.
    pub fn with_hit(mut self, url: &str, score: Option<f64>) -> Self {
        let hit = self.make_hit(url, score, self.default_hits.len() + 1);
        self.default_hits.push(hit);
        self
    }

    /// Add a hit returned only for `query`.
    pub fn with_query_hit(mut self, query: &str, url: &str, score: Option<f64>) -> Self {
        let rank = self.by_query.get(query).map_or(0, Vec::len) + 1;
        let hit = self.make_hit(url, score, rank);
        self.by_query.entry(query.to_string()).or_default().push(hit);
        self
    }

    /// Fail the first calls with the given errors, in order.
    pub fn failing_with(mut self, errors: Vec<SearchError>) -> Self {
        self.failures = errors;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most requests this provider ever served at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn make_hit(&self, url: &str, score: Option<f64>, rank: usize) -> SearchHit {
        SearchHit {
            provider: self.name.clone(),
            url: url.to_string(),
            title: format!("Page at {url}"),
            content: format!("Content retrieved from {url}"),
            raw_content: None,
            score,
            rank,
        }
    }
}

#[async_trait]
impl SearchProvider for StaticProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(err) = self.failures.get(call) {
            return Err(err.clone());
        }
        Ok(self
            .by_query
            .get(query)
            .cloned()
            .unwrap_or_else(|| self.default_hits.clone()))
    }
}
