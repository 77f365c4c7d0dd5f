//! Ordered remote fallback over the configured providers
//!
//! Providers are injected at construction (usually from the environment:
//! chat-completion first, text-generation second). Each attempt that fails for
//! any reason is logged and the next provider is tried. When every provider
//! fails, or none is configured, [`FALLBACK_RESPONSE`] is returned instead of
//! an error; callers must read that as "no usable classification".

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::RemoteConfig;
use crate::models::Category;

use super::parsing::{parse_classification, RemoteClassification};
use super::{LlmProvider, ProviderClient};

/// Neutral completion returned when no provider produced anything
pub const FALLBACK_RESPONSE: &str =
    r#"{"amount":null,"category_id":null,"io":null,"note":null,"confidence":0}"#;

/// Per-provider call outcomes
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProviderHealth {
    pub name: String,
    pub successes: u64,
    pub failures: u64,
    pub last_error: Option<String>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

pub struct RemoteFallback {
    providers: Vec<ProviderClient>,
    health: Mutex<Vec<ProviderHealth>>,
}

impl RemoteFallback {
    pub fn new(providers: Vec<ProviderClient>) -> Self {
        let health = providers
            .iter()
            .map(|p| ProviderHealth {
                name: p.name().to_string(),
                ..ProviderHealth::default()
            })
            .collect();
        Self {
            providers,
            health: Mutex::new(health),
        }
    }

    /// Providers whose API keys are present in the environment
    pub fn from_env(config: &RemoteConfig) -> Self {
        let fallback = Self::new(ProviderClient::all_from_env(config.timeout));
        if fallback.is_enabled() {
            info!(providers = ?fallback.provider_names(), "Remote fallback configured");
        } else {
            debug!("No remote providers configured");
        }
        fallback
    }

    /// No providers; every call yields the neutral response
    pub fn disabled() -> Self {
        Self::new(Vec::new())
    }

    pub fn is_enabled(&self) -> bool {
        !self.providers.is_empty()
    }

    /// Provider names in the order they are tried
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn health(&self) -> Vec<ProviderHealth> {
        self.health.lock().map(|h| h.clone()).unwrap_or_default()
    }

    fn record(&self, index: usize, error: Option<String>) {
        if let Ok(mut health) = self.health.lock() {
            if let Some(entry) = health.get_mut(index) {
                match error {
                    None => entry.successes += 1,
                    Some(message) => {
                        entry.failures += 1;
                        entry.last_error = Some(message);
                        entry.last_failure_at = Some(Utc::now());
                    }
                }
            }
        }
    }

    /// One provider call; `None` (recorded as a failure) on error or empty text
    async fn attempt(
        &self,
        index: usize,
        provider: &ProviderClient,
        prompt: &str,
    ) -> Option<String> {
        match provider.complete(prompt).await {
            Ok(text) if !text.trim().is_empty() => Some(text),
            Ok(_) => {
                warn!(provider = provider.name(), "Empty completion, trying next provider");
                self.record(index, Some("empty completion".to_string()));
                None
            }
            Err(e) => {
                warn!(provider = provider.name(), "Provider failed: {}", e);
                self.record(index, Some(e.to_string()));
                None
            }
        }
    }

    /// First non-empty completion, or [`FALLBACK_RESPONSE`]
    pub async fn complete(&self, prompt: &str) -> String {
        for (index, provider) in self.providers.iter().enumerate() {
            if let Some(text) = self.attempt(index, provider, prompt).await {
                self.record(index, None);
                return text;
            }
        }
        FALLBACK_RESPONSE.to_string()
    }

    /// Ask the providers to classify `text` against the known categories
    ///
    /// A reply that does not parse, or carries nothing usable once unknown
    /// category ids are dropped, counts as a failure of that provider and the
    /// next one is asked. Returns `None` when no provider produced a usable
    /// classification.
    pub async fn classify(
        &self,
        text: &str,
        categories: &[Category],
    ) -> Option<RemoteClassification> {
        if !self.is_enabled() {
            return None;
        }

        let prompt = build_prompt(text, categories);
        for (index, provider) in self.providers.iter().enumerate() {
            let Some(response) = self.attempt(index, provider, &prompt).await else {
                continue;
            };

            let mut parsed = match parse_classification(&response) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(
                        provider = provider.name(),
                        "Unparseable reply, trying next provider: {}",
                        e
                    );
                    self.record(index, Some(format!("unparseable reply: {}", e)));
                    continue;
                }
            };

            drop_unknown_categories(&mut parsed, categories);
            if parsed.is_empty() {
                warn!(
                    provider = provider.name(),
                    "No usable classification, trying next provider"
                );
                self.record(index, Some("no usable classification".to_string()));
                continue;
            }

            self.record(index, None);
            return Some(parsed);
        }

        debug!("No remote provider produced a usable classification");
        None
    }
}

/// Clear category ids the directory does not know
fn drop_unknown_categories(parsed: &mut RemoteClassification, categories: &[Category]) {
    let known = |id: &Option<String>| match id {
        Some(id) => categories.iter().any(|c| &c.id == id),
        None => true,
    };
    if !known(&parsed.category_id) {
        warn!(
            category = ?parsed.category_id,
            "Remote provider returned an unknown category"
        );
        parsed.category_id = None;
    }
    for transaction in parsed.transactions.iter_mut() {
        if !known(&transaction.category_id) {
            transaction.category_id = None;
        }
    }
}

/// Classification prompt listing the allowed category ids
pub fn build_prompt(text: &str, categories: &[Category]) -> String {
    let category_lines: Vec<String> = categories
        .iter()
        .map(|c| format!("- {}: {}", c.id, c.name))
        .collect();

    format!(
        "You classify Vietnamese personal finance notes.\n\
         Allowed categories (use the id):\n{}\n\n\
         Reply with JSON only, no explanation:\n\
         {{\"amount\": number or null (in VND, \"50k\" = 50000, \"2tr5\" = 2500000), \
         \"category_id\": one of the ids above or null, \
         \"io\": \"IN\" or \"OUT\", \
         \"note\": short description, \
         \"date\": \"YYYY-MM-DD\" or null, \
         \"confidence\": 0 to 1, \
         \"transactions\": [] or a list of {{\"amount\", \"category_id\", \"io\", \"note\"}} \
         when the note contains several transactions}}\n\n\
         Note: \"{}\"",
        category_lines.join("\n"),
        text.replace('"', "'")
    )
}
