//! Chat-completion provider
//!
//! Works with any server that implements the OpenAI-style chat completions API
//! (Groq, OpenAI, vLLM, llama-server, ...). This is the fast provider and is
//! tried first.
//!
//! # Configuration
//!
//! Environment variables:
//! - `SPENDWISE_CHAT_API_KEY`: API key (required; the provider is skipped without it)
//! - `SPENDWISE_CHAT_HOST`: Server URL (default: https://api.groq.com/openai)
//! - `SPENDWISE_CHAT_MODEL`: Model name (default: llama-3.1-8b-instant)

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

use super::LlmProvider;

pub const DEFAULT_CHAT_HOST: &str = "https://api.groq.com/openai";
pub const DEFAULT_CHAT_MODEL: &str = "llama-3.1-8b-instant";

/// Chat-completion provider
#[derive(Clone)]
pub struct ChatCompletionProvider {
    http_client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl ChatCompletionProvider {
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
    /// Required: `SPENDWISE_CHAT_API_KEY`
    /// Optional: `SPENDWISE_CHAT_HOST`, `SPENDWISE_CHAT_MODEL`
    pub fn from_env(timeout: Duration) -> Option<Self> {
        let api_key = std::env::var("SPENDWISE_CHAT_API_KEY").ok()?;
        if api_key.trim().is_empty() {
            return None;
        }
        let host =
            std::env::var("SPENDWISE_CHAT_HOST").unwrap_or_else(|_| DEFAULT_CHAT_HOST.to_string());
        let model = std::env::var("SPENDWISE_CHAT_MODEL")
            .unwrap_or_else(|_| DEFAULT_CHAT_MODEL.to_string());
        Some(Self::new(&host, &model, &api_key, timeout))
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Chat completion request
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

/// Chat message
#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Chat completion response
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

/// Chat completion choice
#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

/// Chat response message
#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[async_trait]
impl LlmProvider for ChatCompletionProvider {
    fn name(&self) -> &str {
        "chat-completion"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: Some(0.1),
            max_tokens: Some(512),
            stream: false,
        };

        debug!(model = %self.model, "Chat completion request");

        let response = self
            .http_client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!(
                "Chat completion API error {}: {}",
                status, body
            )));
        }

        let chat_response: ChatCompletionResponse = response.json().await?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::Provider("No choices in chat completion response".into()))
    }
}
