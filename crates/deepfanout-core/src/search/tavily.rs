use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{SearchError, SearchProvider, status_error};
use crate::{SearchHit, SecretValue, config::SearchConfig};

const TAVILY_URL: &str = "https://api.tavily.com/search";

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    search_depth: &'a str,
    max_results: u32,
    include_raw_content: bool,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    raw_content: Option<String>,
    #[serde(default)]
    score: Option<f64>,
}

/// Tavily search API client. Results carry a relevance score in `[0, 1]`.
pub struct TavilyProvider {
    client: Client,
    api_key: SecretValue,
    endpoint: String,
    search_depth: String,
    max_results: u32,
    include_raw_content: bool,
}

impl TavilyProvider {
    pub fn new(client: Client, api_key: SecretValue, settings: &SearchConfig) -> Self {
        Self {
            client,
            api_key,
            endpoint: TAVILY_URL.to_string(),
            search_depth: settings.tavily_depth.clone(),
            max_results: settings.tavily_max_results,
            include_raw_content: settings.tavily_include_raw,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl SearchProvider for TavilyProvider {
    fn name(&self) -> &str {
        "tavily"
    }

    #[instrument(name = "search.tavily", skip(self))]
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        let request = TavilyRequest {
            api_key: self.api_key.expose(),
            query,
            search_depth: &self.search_depth,
            max_results: self.max_results,
            include_raw_content: self.include_raw_content,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let body: TavilyResponse = response.json().await?;
        let hits = into_hits(body);
        debug!(hits = hits.len(), "tavily returned results");
        Ok(hits)
    }
}

pub(crate) fn into_hits(body: TavilyResponse) -> Vec<SearchHit> {
    body.results
        .into_iter()
        .filter(|result| !result.url.trim().is_empty())
        .enumerate()
        .map(|(idx, result)| SearchHit {
            provider: "tavily".to_string(),
            url: result.url,
            title: result.title,
            content: result.content,
            raw_content: result.raw_content.filter(|raw| !raw.trim().is_empty()),
            score: result.score,
            rank: idx + 1,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_results_and_skips_missing_urls() {
        let body: TavilyResponse = serde_json::from_value(serde_json::json!({
            "query": "lithium",
            "results": [
                {
                    "title": "A", "url": "https://a.io", "content": "alpha",
                    "score": 0.91, "raw_content": "full text"
                },
                {"title": "No url", "content": "dropped", "score": 0.99},
                {
                    "title": "B", "url": "https://b.io", "content": "beta",
                    "score": 0.42, "raw_content": null
                }
            ]
        }))
        .expect("fixture should deserialize");

        let hits = into_hits(body);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].url, "https://a.io");
        assert_eq!(hits[0].score, Some(0.91));
        assert_eq!(hits[0].raw_content.as_deref(), Some("full text"));
        assert_eq!(hits[1].rank, 2);
        assert!(hits[1].raw_content.is_none());
    }

    #[test]
    fn request_serializes_documented_fields() {
        let request = TavilyRequest {
            api_key: "tvly-x",
            query: "q",
            search_depth: "advanced",
            max_results: 20,
            include_raw_content: true,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["search_depth"], "advanced");
        assert_eq!(value["max_results"], 20);
        assert_eq!(value["include_raw_content"], true);
    }
}
