//! Behavior when the session store cannot be reached.

use std::sync::Arc;

use threadline_engine::ChatError;
use threadline_types::{SessionId, Temperature};
use wiremock::MockServer;

use crate::common::{FailingStore, mount_stream, orchestrator};

#[tokio::test]
async fn turn_fails_before_contacting_provider() {
    let server = MockServer::start().await;
    mount_stream(&server, &["never"]).await;
    let orch = orchestrator(&server, Arc::new(FailingStore));
    let session = SessionId::new("down").unwrap();

    let err = orch
        .ask_stream(&session, "Hi", Temperature::DEFAULT)
        .await
        .unwrap_err();

    assert!(matches!(err, ChatError::StoreUnavailable(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn session_operations_surface_store_errors() {
    let session = SessionId::new("down").unwrap();
    let server = MockServer::start().await;
    let orch = orchestrator(&server, Arc::new(FailingStore));

    assert!(matches!(
        orch.set_base_prompt(&session, "x"),
        Err(ChatError::StoreUnavailable(_))
    ));
    assert!(matches!(
        orch.history(&session),
        Err(ChatError::StoreUnavailable(_))
    ));
    assert!(matches!(
        orch.base_prompt(&session),
        Err(ChatError::StoreUnavailable(_))
    ));
}

#[test]
fn corrupt_cursor_in_sqlite_is_reported_not_hidden() {
    use threadline_context::{SessionStore, SqliteStore};
    use threadline_engine::SessionHistory;

    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(dir.path().join("sessions.db")).unwrap();
    store.rpush("chat_history_down", "User: Hi\n").unwrap();
    store.set("chat_history_start_down", "one").unwrap();
    let session = SessionId::new("down").unwrap();

    let err = SessionHistory::load(&store, &session).unwrap_err();
    assert!(matches!(err, ChatError::CorruptSession(_)));
}
