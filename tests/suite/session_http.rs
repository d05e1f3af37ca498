//! Full turns against a mocked completions endpoint.

use std::sync::Arc;

use futures_util::StreamExt;
use threadline_context::{MemoryStore, SessionStore, SqliteStore};
use threadline_engine::{ChatError, ProviderError};
use threadline_types::{SessionId, Temperature};
use wiremock::MockServer;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::common::{
    mount_completion, mount_json, mount_status, mount_stream, orchestrator, sse_body,
};

fn session() -> SessionId {
    SessionId::new("chat_it").unwrap()
}

#[tokio::test]
async fn streamed_turn_is_persisted_in_sqlite_across_reopen() {
    let server = MockServer::start().await;
    mount_stream(&server, &["Hel", "lo", "<end>"]).await;
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("sessions.db");

    {
        let store: Arc<dyn SessionStore> = Arc::new(SqliteStore::open(&db).unwrap());
        let orch = orchestrator(&server, store);
        let fragments: Vec<String> = orch
            .ask_stream(&session(), "Hi", Temperature::DEFAULT)
            .await
            .unwrap()
            .into_stream()
            .map(Result::unwrap)
            .collect()
            .await;
        assert_eq!(fragments, ["Hel", "lo"]);
    }

    let reopened = SqliteStore::open(&db).unwrap();
    assert_eq!(
        reopened.lrange("chat_history_chat_it", 0, -1).unwrap(),
        ["User: Hi\n\n\nHelper: Hello<end>\n"]
    );
}

#[tokio::test]
async fn request_carries_prompt_budget_and_stop_sequence() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/completions"))
        .and(body_partial_json(serde_json::json!({
            "model": "text-davinci-003",
            "stop": ["\n\n\n"],
            "stream": true,
            "prompt": "Be brief.\n\n\nUser: Hi\nHelper:"
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body(&["Ok"])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let orch = orchestrator(&server, store.clone());
    orch.set_base_prompt(&session(), "Be brief.").unwrap();

    let reply = orch
        .ask_stream(&session(), "Hi", Temperature::DEFAULT)
        .await
        .unwrap()
        .collect_reply()
        .await
        .unwrap();
    assert_eq!(reply, "Ok");
}

#[tokio::test]
async fn second_turn_sees_first_turn_in_prompt() {
    let server = MockServer::start().await;
    mount_stream(&server, &["Fine", "<end>"]).await;
    let store = Arc::new(MemoryStore::new());
    let orch = orchestrator(&server, store.clone());

    for message in ["Hi", "How are you?"] {
        orch.ask_stream(&session(), message, Temperature::DEFAULT)
            .await
            .unwrap()
            .collect_reply()
            .await
            .unwrap();
    }

    let requests = server.received_requests().await.unwrap();
    let second: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();
    let prompt = second["prompt"].as_str().unwrap();
    assert!(prompt.contains("User: Hi\n\n\nHelper: Fine<end>\n"));
    assert!(prompt.ends_with("User: How are you?\nHelper:"));
    assert_eq!(orch.history(&session()).unwrap().records.len(), 2);
}

#[tokio::test]
async fn non_streaming_turn_commits_reply() {
    let server = MockServer::start().await;
    mount_completion(&server, " Hello!").await;
    let store = Arc::new(MemoryStore::new());
    let orch = orchestrator(&server, store.clone());

    let completion = orch
        .ask(&session(), "Hi", Temperature::DEFAULT)
        .await
        .unwrap();

    assert_eq!(completion.first_text(), Some(" Hello!"));
    assert_eq!(
        store.lrange("chat_history_chat_it", 0, -1).unwrap(),
        ["User: Hi\n\n\nHelper:  Hello!<end>\n"]
    );
}

#[tokio::test]
async fn zero_choices_over_http_leaves_history_unchanged() {
    let server = MockServer::start().await;
    mount_json(&server, serde_json::json!({"id": "cmpl-test", "choices": []})).await;
    let store = Arc::new(MemoryStore::new());
    let orch = orchestrator(&server, store.clone());

    let err = orch
        .ask(&session(), "Hi", Temperature::DEFAULT)
        .await
        .unwrap_err();

    assert!(matches!(err, ChatError::EmptyCompletion));
    assert!(orch.history(&session()).unwrap().records.is_empty());
}

#[tokio::test]
async fn provider_error_status_is_reported_without_commit() {
    let server = MockServer::start().await;
    mount_status(&server, 401, "Incorrect API key provided").await;
    let store = Arc::new(MemoryStore::new());
    let orch = orchestrator(&server, store.clone());

    let err = orch
        .ask_stream(&session(), "Hi", Temperature::DEFAULT)
        .await
        .unwrap_err();

    match err {
        ChatError::ProviderUnavailable(ProviderError::Api { status, message }) => {
            assert_eq!(status, 401);
            assert_eq!(message, "Incorrect API key provided");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(orch.history(&session()).unwrap().records.is_empty());
}

#[tokio::test]
async fn stream_cut_before_done_commits_nothing() {
    let server = MockServer::start().await;
    let body = sse_body(&["Hel", "lo"]).replace("data: [DONE]\n\n", "");
    Mock::given(method("POST"))
        .and(path("/v1/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;
    let store = Arc::new(MemoryStore::new());
    let orch = orchestrator(&server, store.clone());

    let err = orch
        .ask_stream(&session(), "Hi", Temperature::DEFAULT)
        .await
        .unwrap()
        .collect_reply()
        .await
        .unwrap_err();

    assert!(matches!(err, ChatError::ProviderUnavailable(_)));
    assert!(orch.history(&session()).unwrap().records.is_empty());
}

#[tokio::test]
async fn reset_then_turn_starts_from_default_base_prompt() {
    let server = MockServer::start().await;
    mount_stream(&server, &["Hi", "<end>"]).await;
    let store = Arc::new(MemoryStore::new());
    let orch = orchestrator(&server, store.clone());

    orch.set_base_prompt(&session(), "Custom.").unwrap();
    orch.ask_stream(&session(), "Hi", Temperature::DEFAULT)
        .await
        .unwrap()
        .collect_reply()
        .await
        .unwrap();
    orch.reset(&session()).unwrap();

    assert!(store.get("base_prompt_chat_it").unwrap().is_none());
    assert!(orch.history(&session()).unwrap().records.is_empty());
    assert!(
        orch.base_prompt(&session())
            .unwrap()
            .starts_with("Your name is Helper.")
    );
}
