// Reconciliation of chat turns against the store

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::{drive, harness, harness_with, Script};
use focal::config::Config;
use focal::db::{MessageRepository, SessionRepository};
use focal::error::ChatError;
use focal::llm::Role;
use focal::session::{ChatRequest, IncomingMessage};
use tokio::sync::mpsc;

fn request(session_id: &str, messages: Vec<IncomingMessage>) -> ChatRequest {
    let mut request = ChatRequest::new(session_id, messages);
    request.response_message_id = "reply-1".to_string();
    request
}

#[tokio::test]
async fn test_stream_accumulates_and_persists_reply() {
    let h = harness(Script::reply(&["Hel", "lo"]));
    let active = h
        .state
        .reconciler
        .begin(request("s1", vec![IncomingMessage::new("m1", "user", "hi")]))
        .await
        .unwrap();

    let (received, result) = drive(active).await;
    assert_eq!(received, vec!["Hel", "lo"]);
    assert_eq!(result.unwrap(), "Hello");

    let stored = MessageRepository::new(h.state.db.clone())
        .get("s1", "reply-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.role, Role::Assistant);
    assert_eq!(stored.content, "Hello");
}

#[tokio::test]
async fn test_interruption_persists_partial_reply() {
    let h = harness(Script::failing(&["A", "B"], "connection reset"));
    let active = h
        .state
        .reconciler
        .begin(request("s1", vec![IncomingMessage::new("m1", "user", "hi")]))
        .await
        .unwrap();

    let (received, result) = drive(active).await;
    assert_eq!(received.concat(), "AB");
    match result {
        Err(ChatError::GenerationInterrupted { partial, reason }) => {
            assert_eq!(partial, "AB");
            assert!(reason.contains("connection reset"));
        }
        other => panic!("expected GenerationInterrupted, got {:?}", other),
    }

    let stored = MessageRepository::new(h.state.db.clone())
        .get("s1", "reply-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.content, "AB");
}

#[tokio::test]
async fn test_replaying_request_is_idempotent() {
    let h = harness(Script::reply(&["ok"]));
    let messages = vec![
        IncomingMessage::new("m1", "user", "first"),
        IncomingMessage::new("m2", "assistant", "answer"),
        IncomingMessage::new("m3", "user", "second"),
    ];

    for _ in 0..2 {
        let active = h
            .state
            .reconciler
            .begin(request("s1", messages.clone()))
            .await
            .unwrap();
        drive(active).await.1.unwrap();
    }

    let stored = MessageRepository::new(h.state.db.clone())
        .list("s1")
        .await
        .unwrap();
    let ids: Vec<&str> = stored.iter().map(|m| m.message_id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m2", "m3", "reply-1"]);
    assert_eq!(
        SessionRepository::new(h.state.db.clone())
            .list(&Default::default())
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_resubmitted_message_is_updated_in_place() {
    let h = harness(Script::reply(&["ok"]));

    let active = h
        .state
        .reconciler
        .begin(request("s1", vec![IncomingMessage::new("m1", "user", "original")]))
        .await
        .unwrap();
    drive(active).await.1.unwrap();

    let active = h
        .state
        .reconciler
        .begin(request("s1", vec![IncomingMessage::new("m1", "user", "edited")]))
        .await
        .unwrap();
    drive(active).await.1.unwrap();

    let messages = MessageRepository::new(h.state.db.clone());
    let stored = messages.get("s1", "m1").await.unwrap().unwrap();
    assert_eq!(stored.content, "edited");
    assert_eq!(messages.list("s1").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_new_session_titled_from_quoted_text() {
    let h = harness(Script::reply(&["sure"]).with_title("Should Not Be Used"));
    let active = h
        .state
        .reconciler
        .begin(request(
            "s1",
            vec![
                IncomingMessage::new("m1", "user", r#"Please help with "Fix bug""#),
                IncomingMessage::new("m2", "assistant", "What bug?"),
            ],
        ))
        .await
        .unwrap();
    drive(active).await.1.unwrap();

    let session = SessionRepository::new(h.state.db.clone())
        .get("s1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.display_name, "Fix bug");
    assert_eq!(h.counters.title_requests(), 0);
}

#[tokio::test]
async fn test_new_session_titled_by_provider_past_threshold() {
    let h = harness(Script::reply(&["sure"]).with_title("  Borrow Checker Basics \n"));
    let active = h
        .state
        .reconciler
        .begin(request(
            "s1",
            vec![
                IncomingMessage::new("m1", "user", "what is a borrow?"),
                IncomingMessage::new("m2", "assistant", "a reference"),
                IncomingMessage::new("m3", "user", "and a move?"),
            ],
        ))
        .await
        .unwrap();
    drive(active).await.1.unwrap();

    let session = SessionRepository::new(h.state.db.clone())
        .get("s1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.display_name, "Borrow Checker Basics");
    assert_eq!(h.counters.title_requests(), 1);
}

#[tokio::test]
async fn test_empty_title_keeps_default_name() {
    let h = harness(Script::reply(&["sure"]).with_title("   "));
    let active = h
        .state
        .reconciler
        .begin(request(
            "s1",
            vec![
                IncomingMessage::new("m1", "user", "one"),
                IncomingMessage::new("m2", "assistant", "two"),
                IncomingMessage::new("m3", "user", "three"),
            ],
        ))
        .await
        .unwrap();
    drive(active).await.1.unwrap();

    let session = SessionRepository::new(h.state.db.clone())
        .get("s1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.display_name, "Unknown");
}

#[tokio::test]
async fn test_client_supplied_name_is_kept() {
    let h = harness(Script::reply(&["sure"]));
    let mut req = request(
        "s1",
        vec![IncomingMessage::new("m1", "user", r#"about "Something Else""#)],
    );
    req.session_name = Some("My Chat".to_string());

    let active = h.state.reconciler.begin(req).await.unwrap();
    drive(active).await.1.unwrap();

    let session = SessionRepository::new(h.state.db.clone())
        .get("s1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.display_name, "My Chat");
    assert!(!session.archived);
    assert!(!session.favorite);
}

#[tokio::test]
async fn test_invalid_message_leaves_store_untouched() {
    let h = harness(Script::reply(&["never"]));
    let mut broken = IncomingMessage::new("m1", "user", "hi");
    broken.role = None;

    let err = h
        .state
        .reconciler
        .begin(request("s1", vec![broken]))
        .await
        .err()
        .unwrap();
    assert!(matches!(err.root(), ChatError::InvalidMessage(_)));
    assert!(SessionRepository::new(h.state.db.clone())
        .get("s1")
        .await
        .unwrap()
        .is_none());
    assert_eq!(h.counters.generations(), 0);
}

#[tokio::test]
async fn test_missing_credential_keeps_committed_user_messages() {
    let h = harness(Script::reply(&["never"]));
    let mut req = request("s1", vec![IncomingMessage::new("m1", "user", "hi")]);
    req.choice.model = Some("openai".to_string());
    req.choice.variant = Some("gpt-4".to_string());

    let err = h.state.reconciler.begin(req).await.err().unwrap();
    assert!(matches!(err, ChatError::Configuration { .. }));
    assert!(matches!(err.root(), ChatError::MissingCredential(_)));

    let session = SessionRepository::new(h.state.db.clone())
        .get("s1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.display_name, "Unknown");
    let messages = MessageRepository::new(h.state.db.clone());
    assert_eq!(messages.get("s1", "m1").await.unwrap().unwrap().content, "hi");
    assert!(messages.get("s1", "reply-1").await.unwrap().is_none());
    assert_eq!(h.counters.generations(), 0);
}

#[tokio::test]
async fn test_configuration_error_keeps_edits_to_existing_session() {
    let h = harness(Script::reply(&["first reply"]));
    let active = h
        .state
        .reconciler
        .begin(request("s1", vec![IncomingMessage::new("m1", "user", "first")]))
        .await
        .unwrap();
    drive(active).await.1.unwrap();

    let mut req = request(
        "s1",
        vec![
            IncomingMessage::new("m1", "user", "edited"),
            IncomingMessage::new("m2", "user", "second"),
        ],
    );
    req.response_message_id = "reply-2".to_string();
    req.choice.model = Some("openai".to_string());

    let err = h.state.reconciler.begin(req).await.err().unwrap();
    assert!(matches!(err.root(), ChatError::MissingCredential(_)));

    let messages = MessageRepository::new(h.state.db.clone());
    assert_eq!(messages.get("s1", "m1").await.unwrap().unwrap().content, "edited");
    assert_eq!(messages.get("s1", "m2").await.unwrap().unwrap().content, "second");
    assert!(messages.get("s1", "reply-2").await.unwrap().is_none());
    assert_eq!(messages.list("s1").await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_system_messages_are_not_persisted() {
    let h = harness(Script::reply(&["ok"]));
    let system = IncomingMessage {
        message_id: None,
        role: Some("system".to_string()),
        content: Some("be brief".to_string()),
    };
    let active = h
        .state
        .reconciler
        .begin(request(
            "s1",
            vec![system, IncomingMessage::new("m1", "user", "hi")],
        ))
        .await
        .unwrap();
    drive(active).await.1.unwrap();

    let stored = MessageRepository::new(h.state.db.clone())
        .list("s1")
        .await
        .unwrap();
    assert!(stored.iter().all(|m| m.role != Role::System));
    assert_eq!(stored.len(), 2);
}

#[tokio::test]
async fn test_client_disconnect_persists_partial_reply() {
    let h = harness(Script::stalling(&["A"]));
    let active = h
        .state
        .reconciler
        .begin(request("s1", vec![IncomingMessage::new("m1", "user", "hi")]))
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::channel(16);
    let handle = tokio::spawn(active.run(tx));
    assert_eq!(rx.recv().await.as_deref(), Some("A"));
    drop(rx);

    match handle.await.unwrap() {
        Err(ChatError::GenerationInterrupted { partial, .. }) => assert_eq!(partial, "A"),
        other => panic!("expected GenerationInterrupted, got {:?}", other),
    }

    let stored = MessageRepository::new(h.state.db.clone())
        .get("s1", "reply-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.content, "A");
}

#[tokio::test]
async fn test_cancellation_token_stops_generation() {
    let h = harness(Script::stalling(&["partial"]));
    let active = h
        .state
        .reconciler
        .begin(request("s1", vec![IncomingMessage::new("m1", "user", "hi")]))
        .await
        .unwrap();
    let cancel = active.cancellation_token();

    let (tx, mut rx) = mpsc::channel(16);
    let handle = tokio::spawn(active.run(tx));
    assert_eq!(rx.recv().await.as_deref(), Some("partial"));
    cancel.cancel();

    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, ChatError::GenerationInterrupted { .. }));
}

#[tokio::test]
async fn test_reply_embedding_attached_when_enabled() {
    let mut config = Config::default();
    config.embedding.enabled = true;
    let h = harness_with(Script::reply(&["Rust ", "ownership"]), config);

    let active = h
        .state
        .reconciler
        .begin(request("s1", vec![IncomingMessage::new("m1", "user", "explain")]))
        .await
        .unwrap();
    drive(active).await.1.unwrap();

    let stored = MessageRepository::new(h.state.db.clone())
        .get("s1", "reply-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.embedding, Some(common::stub_vector("Rust ownership")));
    // User messages are not embedded
    let user = MessageRepository::new(h.state.db.clone())
        .get("s1", "m1")
        .await
        .unwrap()
        .unwrap();
    assert!(user.embedding.is_none());
}

#[tokio::test]
async fn test_embedding_failure_still_persists_reply() {
    let mut config = Config::default();
    config.embedding.enabled = true;
    let h = harness_with(Script::reply(&["please explode"]), config);

    let active = h
        .state
        .reconciler
        .begin(request("s1", vec![IncomingMessage::new("m1", "user", "go")]))
        .await
        .unwrap();
    assert_eq!(drive(active).await.1.unwrap(), "please explode");

    let stored = MessageRepository::new(h.state.db.clone())
        .get("s1", "reply-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.content, "please explode");
    assert!(stored.embedding.is_none());
    assert_eq!(h.counters.embeddings(), 1);
}

fn assert_send<T: Send>(_: &T) {}

#[tokio::test]
async fn test_run_future_can_be_spawned() {
    let h = harness(Script::reply(&["ok"]));
    let active = h
        .state
        .reconciler
        .begin(request("s1", vec![IncomingMessage::new("m1", "user", "hi")]))
        .await
        .unwrap();

    let (tx, _rx) = mpsc::channel(1);
    let run = active.run(tx);
    assert_send(&run);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_turns_on_one_session_are_serialized() {
    let h = harness(Script::reply(&["ok"]));

    let turns: Vec<_> = (0..8)
        .map(|i| {
            let state = Arc::clone(&h.state);
            tokio::spawn(async move {
                let mut req = request(
                    "s1",
                    vec![
                        IncomingMessage::new("m1", "user", r#"Please help with "Fix bug""#),
                        IncomingMessage::new(format!("m{}", i + 2), "user", "again"),
                    ],
                );
                req.response_message_id = format!("reply-{}", i);
                let active = state.reconciler.begin(req).await?;
                drive(active).await.1
            })
        })
        .collect();
    for turn in turns {
        assert_eq!(turn.await.unwrap().unwrap(), "ok");
    }

    let sessions = SessionRepository::new(h.state.db.clone())
        .list(&Default::default())
        .await
        .unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].display_name, "Fix bug");

    let stored = MessageRepository::new(h.state.db.clone())
        .list("s1")
        .await
        .unwrap();
    let ids: HashSet<&str> = stored.iter().map(|m| m.message_id.as_str()).collect();
    // m1, m2..m9 and reply-0..reply-7, each exactly once
    assert_eq!(stored.len(), 17);
    assert_eq!(ids.len(), 17);
    assert_eq!(h.counters.title_requests(), 0);
}
