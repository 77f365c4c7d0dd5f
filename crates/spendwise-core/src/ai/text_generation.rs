//! Text-generation provider
//!
//! Speaks the hosted inference API shape (`POST {host}/models/{model}` with
//! `{"inputs": ..., "parameters": ...}`). Responses come back either as a list
//! `[{"generated_text": ...}]` or a single object `{"generated_text": ...}`.
//!
//! # Configuration
//!
//! Environment variables:
//! - `SPENDWISE_TEXTGEN_API_KEY`: API key (required; the provider is skipped without it)
//! - `SPENDWISE_TEXTGEN_HOST`: Server URL (default: https://api-inference.huggingface.co)
//! - `SPENDWISE_TEXTGEN_MODEL`: Model name (default: mistralai/Mistral-7B-Instruct-v0.3)

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

use super::LlmProvider;

pub const DEFAULT_TEXTGEN_HOST: &str = "https://api-inference.huggingface.co";
pub const DEFAULT_TEXTGEN_MODEL: &str = "mistralai/Mistral-7B-Instruct-v0.3";

#[derive(Clone)]
pub struct TextGenerationProvider {
    http_client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl TextGenerationProvider {
    pub fn new(base_url: &str, model: &str, api_key: &str, timeout: Duration) -> Self {
        Self {
            http_client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Create from environment variables
    ///
    /// Required: `SPENDWISE_TEXTGEN_API_KEY`
    /// Optional: `SPENDWISE_TEXTGEN_HOST`, `SPENDWISE_TEXTGEN_MODEL`
    pub fn from_env(timeout: Duration) -> Option<Self> {
        let api_key = std::env::var("SPENDWISE_TEXTGEN_API_KEY").ok()?;
        if api_key.trim().is_empty() {
            return None;
        }
        let host = std::env::var("SPENDWISE_TEXTGEN_HOST")
            .unwrap_or_else(|_| DEFAULT_TEXTGEN_HOST.to_string());
        let model = std::env::var("SPENDWISE_TEXTGEN_MODEL")
            .unwrap_or_else(|_| DEFAULT_TEXTGEN_MODEL.to_string());
        Some(Self::new(&host, &model, &api_key, timeout))
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    inputs: String,
    parameters: GenerateParameters,
}

#[derive(Debug, Serialize)]
struct GenerateParameters {
    max_new_tokens: u32,
    temperature: f32,
    return_full_text: bool,
}

#[derive(Debug, Deserialize)]
struct GeneratedText {
    generated_text: String,
}

/// Both response shapes the API is known to return
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GenerateResponse {
    Many(Vec<GeneratedText>),
    One(GeneratedText),
}

impl GenerateResponse {
    fn into_text(self) -> Option<String> {
        match self {
            GenerateResponse::Many(items) => items.into_iter().next().map(|g| g.generated_text),
            GenerateResponse::One(item) => Some(item.generated_text),
        }
    }
}

#[async_trait]
impl LlmProvider for TextGenerationProvider {
    fn name(&self) -> &str {
        "text-generation"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = GenerateRequest {
            inputs: prompt.to_string(),
            parameters: GenerateParameters {
                max_new_tokens: 256,
                temperature: 0.1,
                return_full_text: false,
            },
        };

        debug!(model = %self.model, "Text generation request");

        let response = self
            .http_client
            .post(format!("{}/models/{}", self.base_url, self.model))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!(
                "Text generation API error {}: {}",
                status, body
            )));
        }

        let generated: GenerateResponse = response.json().await?;
        generated
            .into_text()
            .ok_or_else(|| Error::Provider("Empty text generation response".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockProviderServer;

    #[test]
    fn test_both_response_shapes() {
        let list: GenerateResponse =
            serde_json::from_str(r#"[{"generated_text": "a"}, {"generated_text": "b"}]"#).unwrap();
        assert_eq!(list.into_text().as_deref(), Some("a"));

        let single: GenerateResponse =
            serde_json::from_str(r#"{"generated_text": "c"}"#).unwrap();
        assert_eq!(single.into_text().as_deref(), Some("c"));

        let empty: GenerateResponse = serde_json::from_str("[]").unwrap();
        assert!(empty.into_text().is_none());
    }

    #[tokio::test]
    async fn test_complete_against_mock_server() {
        let server = MockProviderServer::start().await;
        let provider = TextGenerationProvider::new(
            &server.url(),
            "org/model",
            "hf-key",
            Duration::from_secs(5),
        );

        let reply = provider.complete("Phân loại: grab 45k").await.unwrap();
        assert!(reply.contains("category_id"));
        assert_eq!(server.last_authorization().as_deref(), Some("Bearer hf-key"));
    }
}
