//! Rewind and replay integration tests
//!
//! State is the fold of the event log, so truncating the log before an
//! invocation deterministically restores the state as of that point.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use agentloom::{
    EngineError, FunctionTool, InMemorySessionService, InvocationOutcome, LanguageModel,
    LeafAgent, ModelRequest, ModelTurn, Runner, Session, SessionService, Tool, ToolCall,
    ToolDefinition,
};
use common::{collect, seeded};

/// Calls `set_state_color` for "set color to X" messages, otherwise
/// answers plainly; reports back after the tool ran
struct ColorModel;

#[async_trait]
impl LanguageModel for ColorModel {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelTurn, EngineError> {
        if !request.tool_results.is_empty() {
            return Ok(ModelTurn::Text("color updated".into()));
        }
        let latest_user = request
            .contents
            .iter()
            .rev()
            .find(|c| c.author == "user")
            .map(|c| c.text.as_str())
            .unwrap_or_default();
        if let Some(color) = latest_user.strip_prefix("set color to ") {
            return Ok(ModelTurn::ToolCalls(vec![ToolCall::new(
                "set_state_color",
                json!({"color": color}),
            )]));
        }
        Ok(ModelTurn::Text("nothing to do".into()))
    }
}

fn set_color_tool() -> Arc<dyn Tool> {
    Arc::new(FunctionTool::new(
        ToolDefinition::new("set_state_color", "Set the session color").with_parameters(
            json!({"type": "object", "properties": {"color": {"type": "string"}}}),
        ),
        |args, ctx| {
            ctx.set("color", args["color"].clone());
            Ok(json!({"status": "ok", "color": args["color"]}))
        },
    ))
}

struct Fixture {
    service: Arc<InMemorySessionService>,
    runner: Runner,
    session_id: String,
}

async fn fixture() -> Fixture {
    let service = Arc::new(InMemorySessionService::new());
    let session = service.create_session(seeded(&[])).await.unwrap();
    let session_id = session.lock().await.id().to_string();

    let agent = LeafAgent::model("color_state_agent", Arc::new(ColorModel))
        .with_instruction("Manage the session color key.")
        .with_tool(set_color_tool());
    let runner = Runner::new(agent.into(), service.clone()).unwrap();
    Fixture {
        service,
        runner,
        session_id,
    }
}

/// Run one message and return the invocation id of its events
async fn run_message(fx: &Fixture, message: &str) -> String {
    let (events, outcome) = collect(fx.runner.run(&fx.session_id, message).await.unwrap()).await;
    assert_eq!(outcome, InvocationOutcome::Completed);
    events[0].invocation_id.clone()
}

async fn color(fx: &Fixture) -> Option<serde_json::Value> {
    let session = fx.service.get_session(&fx.session_id).await.unwrap();
    let value = session.lock().await.get("color").cloned();
    value
}

#[tokio::test]
async fn test_rewind_restores_earlier_color() {
    let fx = fixture().await;

    let _inv_red = run_message(&fx, "set color to red").await;
    let inv_blue = run_message(&fx, "set color to blue").await;
    assert_eq!(color(&fx).await, Some(json!("blue")));

    fx.runner.rewind(&fx.session_id, &inv_blue).await.unwrap();
    assert_eq!(color(&fx).await, Some(json!("red")));

    // Every event of the truncated invocation is gone
    let session = fx.service.get_session(&fx.session_id).await.unwrap();
    let session = session.lock().await;
    assert!(session.events_for_invocation(&inv_blue).is_empty());
    assert_eq!(Session::replay(session.events()), *session.state());
}

#[tokio::test]
async fn test_rewind_to_first_invocation_clears_state() {
    let fx = fixture().await;

    let inv_red = run_message(&fx, "set color to red").await;
    let _inv_orange = run_message(&fx, "set color to orange").await;

    fx.runner.rewind(&fx.session_id, &inv_red).await.unwrap();
    assert_eq!(color(&fx).await, None);

    let session = fx.service.get_session(&fx.session_id).await.unwrap();
    assert!(session.lock().await.events().is_empty());
}

#[tokio::test]
async fn test_rewind_unknown_target_is_usage_error() {
    let fx = fixture().await;
    run_message(&fx, "set color to red").await;

    let err = fx
        .runner
        .rewind(&fx.session_id, "inv-never-happened")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "unknown_rewind_target");
    // Session untouched
    assert_eq!(color(&fx).await, Some(json!("red")));
}

#[tokio::test]
async fn test_rewind_twice_yields_same_state() {
    let fx = fixture().await;

    run_message(&fx, "set color to red").await;
    let inv_orange = run_message(&fx, "set color to orange").await;
    run_message(&fx, "set color to blue").await;

    fx.runner.rewind(&fx.session_id, &inv_orange).await.unwrap();
    let after_first = {
        let session = fx.service.get_session(&fx.session_id).await.unwrap();
        let guard = session.lock().await;
        guard.snapshot()
    };

    // The boundary's events are gone; a second rewind to it fails and
    // leaves the state exactly where the first rewind put it
    assert!(fx.runner.rewind(&fx.session_id, &inv_orange).await.is_err());
    let after_second = {
        let session = fx.service.get_session(&fx.session_id).await.unwrap();
        let guard = session.lock().await;
        guard.snapshot()
    };
    assert_eq!(after_first, after_second);
    assert_eq!(after_first.get("color"), Some(&json!("red")));
}

#[tokio::test]
async fn test_new_invocations_continue_after_rewind() {
    let fx = fixture().await;

    run_message(&fx, "set color to red").await;
    let inv_blue = run_message(&fx, "set color to blue").await;
    fx.runner.rewind(&fx.session_id, &inv_blue).await.unwrap();

    run_message(&fx, "set color to green").await;
    assert_eq!(color(&fx).await, Some(json!("green")));

    // The rewritten log is still a strictly increasing total order
    let session = fx.service.get_session(&fx.session_id).await.unwrap();
    let session = session.lock().await;
    let numbers: Vec<u64> = session.events().iter().map(|e| e.sequence_number).collect();
    for pair in numbers.windows(2) {
        assert!(pair[0] < pair[1]);
    }
    assert_eq!(Session::replay(session.events()), *session.state());
}
