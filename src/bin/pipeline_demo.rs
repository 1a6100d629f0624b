//! Iterative refinement pipeline demo
//!
//! Builds the generator -> (critic -> refiner) loop workflow with
//! deterministic stand-in models, runs it against an in-memory session,
//! and prints the event stream. The refiner exits the loop through the
//! built-in `exit_loop` tool once the critic passes the draft.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin pipeline-demo
//! cargo run --bin pipeline-demo -- --task "top 5 customers by total amount" --max-iterations 6
//! ```

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;

use agentloom::{
    exit_loop, EngineError, EventKind, InMemorySessionService, LanguageModel, LeafAgent,
    LoopAgent, ModelRequest, ModelTurn, Runner, SequentialAgent, SessionService, StateMap,
    ToolCall,
};

/// Pipeline demo CLI
#[derive(Parser, Debug)]
#[command(name = "pipeline-demo")]
#[command(about = "Run the iterative SQL refinement pipeline with scripted models")]
struct Args {
    /// Task given to the generator
    #[arg(short, long, default_value = "top 5 customers by total purchase amount from orders")]
    task: String,

    /// Iteration budget for the refinement loop
    #[arg(short, long, default_value_t = 4)]
    max_iterations: u32,
}

// =============================================================================
// Scripted stand-in models
// =============================================================================

/// Produces a deliberately incomplete first draft
struct DraftModel;

#[async_trait]
impl LanguageModel for DraftModel {
    async fn complete(&self, _request: &ModelRequest) -> Result<ModelTurn, EngineError> {
        Ok(ModelTurn::Text(
            "SELECT customer_id, SUM(amount) AS total FROM orders GROUP BY customer_id".into(),
        ))
    }

    fn name(&self) -> &str {
        "draft-model"
    }
}

/// Passes the draft once it carries ordering and a limit
struct CriticModel;

#[async_trait]
impl LanguageModel for CriticModel {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelTurn, EngineError> {
        let draft_ok = request.instruction.contains("ORDER BY")
            && request.instruction.contains("LIMIT 5");
        if draft_ok {
            Ok(ModelTurn::Text("PASS".into()))
        } else {
            Ok(ModelTurn::Text(
                "missing ORDER BY total DESC and LIMIT 5".into(),
            ))
        }
    }

    fn name(&self) -> &str {
        "critic-model"
    }
}

/// Applies the critique, or exits the loop when the critic passed
struct RefinerModel;

#[async_trait]
impl LanguageModel for RefinerModel {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelTurn, EngineError> {
        if request.instruction.contains("Critique:\nPASS") {
            return Ok(ModelTurn::ToolCalls(vec![ToolCall::new(
                "exit_loop",
                serde_json::json!({}),
            )]));
        }
        Ok(ModelTurn::Text(
            "SELECT customer_id, SUM(amount) AS total FROM orders \
             GROUP BY customer_id ORDER BY total DESC LIMIT 5"
                .into(),
        ))
    }

    fn name(&self) -> &str {
        "refiner-model"
    }
}

// =============================================================================
// Pipeline assembly
// =============================================================================

fn build_pipeline(max_iterations: u32) -> SequentialAgent {
    let generator = LeafAgent::model("initial_generator", Arc::new(DraftModel))
        .with_description("Creates the initial SQL draft.")
        .with_instruction("Generate an initial SQL query for the task.\nTask: {sql_task}")
        .with_output_key("current_sql")
        .without_conversation();

    let critic = LeafAgent::model("sql_critic", Arc::new(CriticModel))
        .with_description("Validates SQL and returns PASS or error details.")
        .with_instruction("Task: {sql_task}\nDraft:\n{current_sql}\nOutput PASS or error details.")
        .with_output_key("criticism")
        .without_conversation();

    let refiner = LeafAgent::model("sql_refiner", Arc::new(RefinerModel))
        .with_description("Refines SQL or exits via tool when completion is reached.")
        .with_instruction(
            "Task: {sql_task}\nCurrent SQL:\n{current_sql}\nCritique:\n{criticism}\n\
             Apply the critique to the SQL, or exit the loop once it passes.",
        )
        .with_output_key("current_sql")
        .without_conversation()
        .with_tool(exit_loop());

    let validation_loop = LoopAgent::new(
        "validation_loop",
        vec![critic.into(), refiner.into()],
        max_iterations,
    );

    SequentialAgent::new(
        "sql_pipeline",
        vec![generator.into(), validation_loop.into()],
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    println!("{}", "=".repeat(70));
    println!("Iterative refinement pipeline (generator -> critic/refiner loop)");
    println!("{}", "=".repeat(70));

    let service = Arc::new(InMemorySessionService::new());
    let mut seed = StateMap::new();
    seed.insert("sql_task".into(), serde_json::json!(args.task.clone()));
    seed.insert("current_sql".into(), serde_json::json!(""));
    seed.insert("criticism".into(), serde_json::json!(""));

    let session = service.create_session(seed).await?;
    let session_id = session.lock().await.id().to_string();

    let runner = Runner::new(build_pipeline(args.max_iterations).into(), service.clone())?;

    println!("\nRunning...\n");
    let mut events = runner.run(&session_id, "Generate and validate the SQL.").await?;
    while let Some(event) = events.next_event().await {
        match &event.kind {
            EventKind::TextOutput { text } => println!("[{}]: {}", event.author, text),
            EventKind::StateWrite { key, .. } => println!("[{}] wrote state '{}'", event.author, key),
            EventKind::ToolCallRequest { tool_name, .. } => {
                println!("[{}] TOOL_CALL: {}", event.author, tool_name)
            }
            EventKind::ControlSignal { signal } => {
                println!("[{}] SIGNAL: {:?}", event.author, signal)
            }
            other => println!("[{}] {:?}", event.author, other),
        }
    }

    let session = service.get_session(&session_id).await?;
    let session = session.lock().await;

    println!("\n{}", "-".repeat(70));
    println!("DONE");
    println!("Final SQL (from session state):\n");
    println!(
        "{}",
        session
            .get("current_sql")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
    );
    println!("\nFinal critic status:");
    println!(
        "{}",
        session
            .get("criticism")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
    );
    println!("{}", "-".repeat(70));

    Ok(())
}
