//! Remote language-model providers
//!
//! The pipeline's third tier asks a hosted model to classify text the
//! on-device classifier could not handle confidently.
//!
//! # Architecture
//!
//! - `LlmProvider` trait: one prompt in, raw completion text out
//! - `ProviderClient` enum: concrete wrapper providing Clone + compile-time dispatch
//! - Provider implementations: `ChatCompletionProvider`, `TextGenerationProvider`, `MockProvider`
//! - `RemoteFallback`: ordered provider list injected at startup (possibly empty)
//!
//! # Configuration
//!
//! Environment variables (a provider is only configured when its API key is set):
//! - `SPENDWISE_CHAT_API_KEY`: bearer key for the chat-completion provider (tried first)
//! - `SPENDWISE_CHAT_HOST`: server URL (default: https://api.groq.com/openai)
//! - `SPENDWISE_CHAT_MODEL`: model name (default: llama-3.1-8b-instant)
//! - `SPENDWISE_TEXTGEN_API_KEY`: bearer key for the text-generation provider (tried second)
//! - `SPENDWISE_TEXTGEN_HOST`: server URL (default: https://api-inference.huggingface.co)
//! - `SPENDWISE_TEXTGEN_MODEL`: model name (default: mistralai/Mistral-7B-Instruct-v0.3)

mod chat_completion;
mod fallback;
mod mock;
pub mod parsing;
mod text_generation;

pub use chat_completion::ChatCompletionProvider;
pub use fallback::{ProviderHealth, RemoteFallback, FALLBACK_RESPONSE};
pub use mock::MockProvider;
pub use parsing::RemoteClassification;
pub use text_generation::TextGenerationProvider;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Trait implemented by every remote provider
///
/// Providers are Send + Sync so one list can be shared across tasks.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short provider name for logs and health reports
    fn name(&self) -> &str;

    /// Send one prompt and return the raw completion text
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Concrete provider wrapper
#[derive(Clone)]
pub enum ProviderClient {
    /// Chat-completion API (`choices[0].message.content`)
    ChatCompletion(ChatCompletionProvider),
    /// Text-generation API (`[{generated_text}]` or `{generated_text}`)
    TextGeneration(TextGenerationProvider),
    /// Canned responses for tests
    Mock(MockProvider),
}

impl ProviderClient {
    /// Every provider whose API key is present, in preference order
    pub fn all_from_env(timeout: Duration) -> Vec<Self> {
        let mut providers = Vec::new();
        if let Some(p) = ChatCompletionProvider::from_env(timeout) {
            providers.push(ProviderClient::ChatCompletion(p));
        }
        if let Some(p) = TextGenerationProvider::from_env(timeout) {
            providers.push(ProviderClient::TextGeneration(p));
        }
        providers
    }

    pub fn mock(response: &str) -> Self {
        ProviderClient::Mock(MockProvider::new(response))
    }
}

// Implement LlmProvider for ProviderClient by delegating to the inner provider
#[async_trait]
impl LlmProvider for ProviderClient {
    fn name(&self) -> &str {
        match self {
            ProviderClient::ChatCompletion(p) => p.name(),
            ProviderClient::TextGeneration(p) => p.name(),
            ProviderClient::Mock(p) => p.name(),
        }
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        match self {
            ProviderClient::ChatCompletion(p) => p.complete(prompt).await,
            ProviderClient::TextGeneration(p) => p.complete(prompt).await,
            ProviderClient::Mock(p) => p.complete(prompt).await,
        }
    }
}
