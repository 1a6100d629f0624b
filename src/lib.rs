//! # agentloom
//!
//! Composable agent orchestration engine with event-sourced sessions.
//!
//! Independently-defined computation units ("agents") compose into
//! pipelines with three primitives - strict sequence, concurrent
//! fan-out/fan-in, and bounded iterative refinement - over a shared,
//! per-session state store. Every step is recorded as an immutable
//! event; session state is always the fold of the log, which makes
//! replay deterministic and enables point-in-time rewind.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ Runner                                                   │
//! │   run(session, message) ──► Agent tree                   │
//! │                              ├─ Leaf (model / function)  │
//! │                              ├─ Sequential               │
//! │                              ├─ Parallel                 │
//! │                              └─ Loop (escalate / budget) │
//! │   events ──► Session log ──► state projection            │
//! │   resume(confirmation) / rewind(invocation)              │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use agentloom::{
//!     InMemorySessionService, LeafAgent, LoopAgent, Runner, SequentialAgent,
//! };
//! use std::sync::Arc;
//!
//! let generator = LeafAgent::model("generator", model.clone())
//!     .with_instruction("Write SQL for: {sql_task}")
//!     .with_output_key("current_sql")
//!     .without_conversation();
//!
//! let pipeline = SequentialAgent::new(
//!     "sql_pipeline",
//!     vec![generator.into(), refinement_loop.into()],
//! );
//!
//! let service = Arc::new(InMemorySessionService::new());
//! let runner = Runner::new(pipeline.into(), service)?;
//! let mut events = runner.run(&session_id, "Generate the SQL.").await?;
//! while let Some(event) = events.next_event().await {
//!     println!("[{}] {:?}", event.author, event.kind);
//! }
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod event;
pub mod llm;
pub mod rewind;
pub mod runner;
pub mod session;
pub mod template;
pub mod tools;

pub use agent::{
    Agent, FunctionContext, LeafAgent, LeafFunction, LoopAgent, LoopStatus, ParallelAgent,
    SequentialAgent,
};
pub use config::{MissingKeyPolicy, RunnerConfig};
pub use error::EngineError;
pub use event::{ControlSignal, Event, EventKind, USER_AUTHOR};
pub use llm::{Content, LanguageModel, ModelRequest, ModelTurn, ToolCall, ToolResult};
pub use rewind::RewindManager;
pub use runner::{ConfirmationResponse, EventStream, InvocationOutcome, Runner};
pub use session::{
    InMemorySessionService, Session, SessionService, SharedSession, StateMap,
    SuspendedInvocation,
};
pub use tools::{exit_loop, FunctionTool, Tool, ToolContext, ToolDefinition, EXIT_LOOP_TOOL};
