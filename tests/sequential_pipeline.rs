//! Sequential composite integration tests
//!
//! Strict ordering, state visibility between children, and
//! halt-and-propagate on fatal child failure.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use agentloom::{
    ControlSignal, EventKind, InMemorySessionService, InvocationOutcome, LeafAgent, Runner,
    SequentialAgent, Session, SessionService,
};
use common::{assert_gapless, collect, seeded, text_events, RecordingModel, SlowModel, TextModel};

async fn session_id(service: &InMemorySessionService, seed: agentloom::StateMap) -> String {
    let session = service.create_session(seed).await.unwrap();
    let id = session.lock().await.id().to_string();
    id
}

#[tokio::test]
async fn test_two_leaf_pipeline_writes_both_keys_in_order() {
    let service = Arc::new(InMemorySessionService::new());
    let id = session_id(&service, seeded(&[("task", json!("X"))])).await;

    let leaf_a = LeafAgent::model("leaf_a", TextModel::new("alpha"))
        .with_instruction("Handle: {task}")
        .with_output_key("k1")
        .without_conversation();
    let leaf_b = LeafAgent::model("leaf_b", TextModel::new("beta"))
        .with_instruction("Continue: {task}")
        .with_output_key("k2")
        .without_conversation();

    let pipeline = SequentialAgent::new("pipeline", vec![leaf_a.into(), leaf_b.into()]);
    let runner = Runner::new(pipeline.into(), service.clone()).unwrap();

    let stream = runner.run(&id, "go").await.unwrap();
    let (events, outcome) = collect(stream).await;

    assert_eq!(outcome, InvocationOutcome::Completed);
    assert!(events[0].is_user_message());
    assert_gapless(&events);

    // Both output keys landed in state
    let session = service.get_session(&id).await.unwrap();
    let session = session.lock().await;
    assert_eq!(session.get("k1"), Some(&json!("alpha")));
    assert_eq!(session.get("k2"), Some(&json!("beta")));

    // Every text event of A precedes every text event of B
    let a_text = text_events(&events, "leaf_a");
    let b_text = text_events(&events, "leaf_b");
    assert_eq!(a_text.len(), 1);
    assert_eq!(b_text.len(), 1);
    assert!(a_text[0].sequence_number < b_text[0].sequence_number);

    // Replaying the full log reproduces the final projection
    assert_eq!(Session::replay(session.events()), *session.state());
}

#[tokio::test]
async fn test_later_children_see_earlier_writes() {
    let service = Arc::new(InMemorySessionService::new());
    let id = session_id(&service, seeded(&[("task", json!("X"))])).await;

    let leaf_a = LeafAgent::model("producer", TextModel::new("alpha"))
        .with_instruction("produce")
        .with_output_key("k1")
        .without_conversation();

    let (model_b, requests_b) = RecordingModel::new(TextModel::new("beta"));
    let leaf_b = LeafAgent::model("consumer", model_b)
        .with_instruction("previous said: {k1}")
        .with_output_key("k2")
        .without_conversation();

    let pipeline = SequentialAgent::new("pipeline", vec![leaf_a.into(), leaf_b.into()]);
    let runner = Runner::new(pipeline.into(), service.clone()).unwrap();

    let (_, outcome) = collect(runner.run(&id, "go").await.unwrap()).await;
    assert_eq!(outcome, InvocationOutcome::Completed);

    let requests = requests_b.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].instruction, "previous said: alpha");
}

#[tokio::test]
async fn test_fatal_child_failure_halts_pipeline() {
    let service = Arc::new(InMemorySessionService::new());
    let id = session_id(&service, seeded(&[])).await;

    let failing = LeafAgent::model(
        "failing",
        SlowModel::failing(Duration::from_millis(5), "provider unreachable"),
    )
    .with_instruction("will fail")
    .without_conversation();
    let never_runs = LeafAgent::model("never_runs", TextModel::new("unreachable"))
        .with_instruction("should not run")
        .with_output_key("after")
        .without_conversation();

    let pipeline = SequentialAgent::new("pipeline", vec![failing.into(), never_runs.into()]);
    let runner = Runner::new(pipeline.into(), service.clone()).unwrap();

    let (events, outcome) = collect(runner.run(&id, "go").await.unwrap()).await;

    match outcome {
        InvocationOutcome::Failed { kind, .. } => assert_eq!(kind, "model"),
        other => panic!("expected failure, got {:?}", other),
    }

    // The remaining child never produced events, and the log ends with
    // a terminal failure signal
    assert!(text_events(&events, "never_runs").is_empty());
    let last = events.last().unwrap();
    assert!(matches!(
        &last.kind,
        EventKind::ControlSignal {
            signal: ControlSignal::Failure { kind, .. }
        } if kind == "model"
    ));

    // Partial log is preserved, not rolled back
    let session = service.get_session(&id).await.unwrap();
    let session = session.lock().await;
    assert_eq!(session.events().len(), events.len());
    assert!(session.get("after").is_none());
}

#[tokio::test]
async fn test_duplicate_names_rejected_at_build() {
    let service = Arc::new(InMemorySessionService::new());
    let pipeline = SequentialAgent::new(
        "pipeline",
        vec![
            LeafAgent::model("same", TextModel::new("a")).into(),
            LeafAgent::model("same", TextModel::new("b")).into(),
        ],
    );
    let err = Runner::new(pipeline.into(), service).unwrap_err();
    assert_eq!(err.kind(), "config");
}

#[tokio::test]
async fn test_conversation_visible_when_not_withheld() {
    let service = Arc::new(InMemorySessionService::new());
    let id = session_id(&service, seeded(&[])).await;

    let (model, requests) = RecordingModel::new(TextModel::new("reply"));
    let leaf = LeafAgent::model("assistant", model).with_instruction("answer the user");

    let runner = Runner::new(
        SequentialAgent::new("root", vec![leaf.into()]).into(),
        service.clone(),
    )
    .unwrap();

    let (_, outcome) = collect(runner.run(&id, "hello there").await.unwrap()).await;
    assert_eq!(outcome, InvocationOutcome::Completed);

    let requests = requests.lock().unwrap();
    assert_eq!(requests[0].contents.len(), 1);
    assert_eq!(requests[0].contents[0].author, "user");
    assert_eq!(requests[0].contents[0].text, "hello there");
}
