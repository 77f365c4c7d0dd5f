//! Test utilities for spendwise-core
//!
//! This module provides testing infrastructure including a mock LLM provider
//! server that speaks both remote response shapes, and a small labeled corpus.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Json, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use serde_json::{json, Value};
use tokio::sync::oneshot;

use crate::models::LabeledText;

#[derive(Clone, Default)]
struct ServerState {
    failing: bool,
    calls: Arc<AtomicUsize>,
    last_authorization: Arc<Mutex<Option<String>>>,
}

impl ServerState {
    fn record(&self, headers: &HeaderMap) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        *self.last_authorization.lock().unwrap() = auth;
    }
}

/// Mock remote provider for testing
///
/// - `POST /v1/chat/completions` answers `{"choices": [{"message": {"content": ...}}]}`
/// - `POST /models/{model}` answers `[{"generated_text": ...}]`
pub struct MockProviderServer {
    addr: SocketAddr,
    state: ServerState,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockProviderServer {
    /// Start the mock server on an available port
    pub async fn start() -> Self {
        Self::start_with(false).await
    }

    /// Start a server that answers every request with 503
    pub async fn start_failing() -> Self {
        Self::start_with(true).await
    }

    async fn start_with(failing: bool) -> Self {
        let state = ServerState {
            failing,
            ..ServerState::default()
        };

        let app = Router::new()
            .route("/v1/chat/completions", post(handle_chat))
            .route("/models/*model", post(handle_generate))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Get the base URL for this mock server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Number of requests served so far
    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    /// `Authorization` header of the most recent request
    pub fn last_authorization(&self) -> Option<String> {
        self.state.last_authorization.lock().unwrap().clone()
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockProviderServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Chat-completion endpoint
async fn handle_chat(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(request): Json<Value>,
) -> Response {
    state.record(&headers);
    if state.failing {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let prompt = request["messages"]
        .as_array()
        .and_then(|messages| messages.last())
        .and_then(|m| m["content"].as_str())
        .unwrap_or_default();

    Json(json!({
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": classify_mock(prompt)},
            "finish_reason": "stop"
        }]
    }))
    .into_response()
}

/// Text-generation endpoint
async fn handle_generate(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(request): Json<Value>,
) -> Response {
    state.record(&headers);
    if state.failing {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let prompt = request["inputs"].as_str().unwrap_or_default();
    Json(json!([{ "generated_text": classify_mock(prompt) }])).into_response()
}

/// Pull the quoted note out of the classification prompt
fn note_from_prompt(prompt: &str) -> String {
    prompt
        .rsplit_once("Note: \"")
        .map(|(_, rest)| rest.trim_end_matches('"').to_string())
        .unwrap_or_else(|| prompt.to_string())
        .to_lowercase()
}

/// Keyword classification standing in for a hosted model
fn classify_mock(prompt: &str) -> String {
    let note = note_from_prompt(prompt);

    let category = if ["grab", "taxi", "xăng", "xe"].iter().any(|k| note.contains(k)) {
        Some("di_chuyen")
    } else if ["ăn", "phở", "cà phê", "cafe", "cơm"]
        .iter()
        .any(|k| note.contains(k))
    {
        Some("an_uong")
    } else if note.contains("lương") {
        Some("luong")
    } else {
        None
    };

    let io = if category == Some("luong") { "IN" } else { "OUT" };

    format!(
        "Here is the classification:\n{}",
        json!({
            "amount": null,
            "category_id": category,
            "io": io,
            "note": note,
            "confidence": if category.is_some() { 0.85 } else { 0.1 },
        })
    )
}

/// Small two-category corpus that trains to a confident classifier
///
/// Amount tokens appear once per category so they carry no signal.
pub fn food_and_transport_corpus() -> Vec<LabeledText> {
    vec![
        LabeledText::new("ăn trưa 50k", "an_uong"),
        LabeledText::new("ăn sáng phở 30k", "an_uong"),
        LabeledText::new("cà phê sữa 25k", "an_uong"),
        LabeledText::new("grab đi làm 50k", "di_chuyen"),
        LabeledText::new("đổ xăng xe máy 30k", "di_chuyen"),
        LabeledText::new("taxi về nhà 25k", "di_chuyen"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_mock_reads_note() {
        let reply = classify_mock("Allowed categories...\nNote: \"Grab về nhà\"");
        assert!(reply.contains("\"di_chuyen\""));

        let reply = classify_mock("Note: \"nhận lương\"");
        assert!(reply.contains("\"IN\""));

        let reply = classify_mock("Note: \"xin chào\"");
        assert!(reply.contains("\"category_id\":null"));
    }

    #[tokio::test]
    async fn test_server_counts_calls() {
        let server = MockProviderServer::start().await;
        let client = reqwest::Client::new();
        let response = client
            .post(format!("{}/models/org/model", server.url()))
            .json(&json!({"inputs": "Note: \"taxi\""}))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());
        let body: Value = response.json().await.unwrap();
        assert!(body[0]["generated_text"]
            .as_str()
            .unwrap()
            .contains("di_chuyen"));
        assert_eq!(server.calls(), 1);
        assert_eq!(server.last_authorization(), None);
    }
}
