//! Shared test utilities and fixtures
//!
//! Mock completion endpoints and orchestrator wiring for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use threadline_context::{
    ContextLimits, SessionStore, StoreError, StoreResult, TokenCounter,
};
use threadline_engine::{SessionConfig, SessionOrchestrator};
use threadline_providers::retry::RetryConfig;
use threadline_providers::{OpenAiCompletions, OpenAiConfig};
use threadline_types::{ApiKey, TurnMarkers};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const MODEL: &str = "text-davinci-003";

/// Mount a non-streaming completion returning `text` as the only choice.
pub async fn mount_completion(server: &MockServer, text: &str) {
    let body = serde_json::json!({
        "id": "cmpl-test",
        "object": "text_completion",
        "model": MODEL,
        "choices": [{"text": text, "index": 0, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12}
    });
    mount_json(server, body).await;
}

pub async fn mount_json(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/v1/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// SSE body with one completion chunk per fragment, then `[DONE]`.
pub fn sse_body(fragments: &[&str]) -> String {
    let mut body = String::new();
    for fragment in fragments {
        let chunk = serde_json::json!({
            "id": "cmpl-test",
            "choices": [{"text": fragment, "index": 0, "finish_reason": null}]
        });
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

/// Mount a streaming completion yielding `fragments` in order.
pub async fn mount_stream(server: &MockServer, fragments: &[&str]) {
    Mock::given(method("POST"))
        .and(path("/v1/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body(fragments)),
        )
        .mount(server)
        .await;
}

pub async fn mount_status(server: &MockServer, status: u16, message: &str) {
    Mock::given(method("POST"))
        .and(path("/v1/completions"))
        .respond_with(
            ResponseTemplate::new(status)
                .set_body_json(serde_json::json!({"error": {"message": message}})),
        )
        .mount(server)
        .await;
}

pub fn provider(server: &MockServer) -> OpenAiCompletions {
    let config = OpenAiConfig::new(ApiKey::new("sk-test"))
        .with_api_base(format!("{}/v1", server.uri()))
        .with_retry(RetryConfig::default().with_max_retries(0));
    OpenAiCompletions::new(config).unwrap()
}

pub fn session_config() -> SessionConfig {
    SessionConfig {
        model: MODEL.to_string(),
        markers: TurnMarkers::new("Helper", "<end>"),
        extra_prompt: String::new(),
        limits: ContextLimits::default(),
    }
}

pub fn orchestrator(server: &MockServer, store: Arc<dyn SessionStore>) -> SessionOrchestrator {
    SessionOrchestrator::new(
        session_config(),
        store,
        Arc::new(provider(server)),
        Arc::new(TokenCounter::default()),
    )
}

/// A store whose backend is permanently unreachable.
pub struct FailingStore;

fn unreachable_backend() -> StoreError {
    StoreError::Unavailable {
        backend: "failing",
        message: "connection refused".to_string(),
    }
}

impl SessionStore for FailingStore {
    fn backend_name(&self) -> &'static str {
        "failing"
    }

    fn get(&self, _key: &str) -> StoreResult<Option<String>> {
        Err(unreachable_backend())
    }

    fn set(&self, _key: &str, _value: &str) -> StoreResult<()> {
        Err(unreachable_backend())
    }

    fn rpush(&self, _key: &str, _value: &str) -> StoreResult<u64> {
        Err(unreachable_backend())
    }

    fn lrange(&self, _key: &str, _start: i64, _end: i64) -> StoreResult<Vec<String>> {
        Err(unreachable_backend())
    }

    fn incr(&self, _key: &str) -> StoreResult<i64> {
        Err(unreachable_backend())
    }

    fn delete(&self, _key: &str) -> StoreResult<bool> {
        Err(unreachable_backend())
    }
}
