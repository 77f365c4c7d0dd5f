//! Mock provider for testing
//!
//! Returns a canned completion (or a canned failure) and counts calls, so
//! tests can assert that a tier was or was not consulted.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};

use super::LlmProvider;

#[derive(Clone)]
pub struct MockProvider {
    name: String,
    reply: std::result::Result<String, String>,
    calls: Arc<AtomicUsize>,
}

impl MockProvider {
    /// Provider that always answers `response`
    pub fn new(response: &str) -> Self {
        Self {
            name: "mock".to_string(),
            reply: Ok(response.to_string()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Provider that always fails with `message`
    pub fn failing(message: &str) -> Self {
        Self {
            name: "mock-failing".to_string(),
            reply: Err(message.to_string()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Number of `complete` calls so far (shared between clones)
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply.clone().map_err(Error::Provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counts_calls_across_clones() {
        let mock = MockProvider::new("ok");
        let clone = mock.clone();

        assert_eq!(clone.complete("x").await.unwrap(), "ok");
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_failing() {
        let mock = MockProvider::failing("down").named("a");
        assert_eq!(mock.name(), "a");
        assert!(matches!(mock.complete("x").await, Err(Error::Provider(_))));
    }
}
