use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{LlmClient, LlmError, LlmRequest};
use crate::{FanoutError, SecretValue, config::LlmConfig};

#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponsesBody {
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    content: Vec<ContentItem>,
}

#[derive(Debug, Deserialize)]
struct ContentItem {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Client for the OpenAI Responses API (`POST /responses`).
pub struct OpenAiResponsesClient {
    client: Client,
    api_key: SecretValue,
    endpoint: String,
}

impl OpenAiResponsesClient {
    pub fn new(api_key: SecretValue, config: &LlmConfig) -> Result<Self, FanoutError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|err| FanoutError::InvalidConfiguration(format!("http client: {err}")))?;

        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/responses", config.base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiResponsesClient {
    #[instrument(
        name = "llm.complete",
        skip(self, request),
        fields(model = %request.model, input_chars = request.input.len())
    )]
    async fn complete(&self, request: LlmRequest) -> Result<String, LlmError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key.expose()))
            .header("Content-Type", "application/json")
            .json(&ResponsesRequest {
                model: &request.model,
                input: &request.input,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::Status {
                status,
                body: crate::source::truncate_chars(&body, 300),
            });
        }

        let body: ResponsesBody = response.json().await?;
        let text = extract_text(body)?;
        debug!(output_chars = text.len(), "LLM response received");
        Ok(text)
    }
}

/// Text of the first assistant message; reasoning items are skipped.
pub(crate) fn extract_text(body: ResponsesBody) -> Result<String, LlmError> {
    body.output
        .into_iter()
        .filter(|item| item.kind == "message")
        .flat_map(|item| item.content)
        .find(|content| content.kind == "output_text")
        .and_then(|content| content.text)
        .ok_or_else(|| LlmError::Malformed("response contained no output_text message".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(value: serde_json::Value) -> ResponsesBody {
        serde_json::from_value(value).expect("fixture should deserialize")
    }

    #[test]
    fn skips_reasoning_items() {
        let parsed = body(serde_json::json!({
            "id": "resp_1",
            "output": [
                {"type": "reasoning", "summary": []},
                {"type": "message", "role": "assistant", "content": [
                    {"type": "output_text", "text": "[\"q1\", \"q2\"]", "annotations": []}
                ]}
            ]
        }));
        assert_eq!(extract_text(parsed).unwrap(), "[\"q1\", \"q2\"]");
    }

    #[test]
    fn message_first_layout_is_supported() {
        let parsed = body(serde_json::json!({
            "output": [
                {"type": "message", "content": [{"type": "output_text", "text": "hello"}]}
            ]
        }));
        assert_eq!(extract_text(parsed).unwrap(), "hello");
    }

    #[test]
    fn missing_message_is_malformed() {
        let parsed = body(serde_json::json!({"output": [{"type": "reasoning"}]}));
        assert!(matches!(extract_text(parsed), Err(LlmError::Malformed(_))));
    }

    #[test]
    fn endpoint_joins_base_url() {
        let config = LlmConfig {
            base_url: "http://localhost:8080/v1/".into(),
            ..LlmConfig::default()
        };
        let client = OpenAiResponsesClient::new(SecretValue::new("sk-test"), &config).unwrap();
        assert_eq!(client.endpoint, "http://localhost:8080/v1/responses");
    }
}
