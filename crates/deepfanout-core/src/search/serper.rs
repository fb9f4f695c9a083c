use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{SearchError, SearchProvider, status_error};
use crate::{SearchHit, SecretValue, config::SearchConfig};

const SERPER_URL: &str = "https://google.serper.dev/search";

#[derive(Debug, Serialize)]
struct SerperRequest<'a> {
    q: &'a str,
    num: u32,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperOrganic>,
}

#[derive(Debug, Deserialize)]
struct SerperOrganic {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    position: Option<usize>,
}

/// Serper (Google) search API client. Organic results carry no score.
pub struct SerperProvider {
    client: Client,
    api_key: SecretValue,
    endpoint: String,
    num: u32,
}

impl SerperProvider {
    pub fn new(client: Client, api_key: SecretValue, settings: &SearchConfig) -> Self {
        Self {
            client,
            api_key,
            endpoint: SERPER_URL.to_string(),
            num: settings.serper_num,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl SearchProvider for SerperProvider {
    fn name(&self) -> &str {
        "serper"
    }

    #[instrument(name = "search.serper", skip(self))]
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", self.api_key.expose())
            .json(&SerperRequest { q: query, num: self.num })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let body: SerperResponse = response.json().await?;
        let hits = into_hits(body);
        debug!(hits = hits.len(), "serper returned results");
        Ok(hits)
    }
}

pub(crate) fn into_hits(body: SerperResponse) -> Vec<SearchHit> {
    body.organic
        .into_iter()
        .filter(|result| !result.link.trim().is_empty())
        .enumerate()
        .map(|(idx, result)| SearchHit {
            provider: "serper".to_string(),
            url: result.link,
            title: result.title,
            content: result.snippet,
            raw_content: None,
            score: None,
            rank: result.position.unwrap_or(idx + 1),
        })
        .collect()
}
