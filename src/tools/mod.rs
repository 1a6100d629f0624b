//! Tool invocation protocol
//!
//! Tools are named functions a leaf agent may ask the engine to run.
//! A tool executes against a [`ToolContext`] that can read session
//! state, queue state writes (recorded as state-write events by the
//! enclosing leaf), and raise the escalate action that stops the
//! nearest enclosing loop.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::EngineError;
use crate::session::StateMap;

/// Name of the built-in loop-exit tool
pub const EXIT_LOOP_TOOL: &str = "exit_loop";

/// Declarative description of a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name within the owning leaf
    pub name: String,
    /// Human-readable description handed to the model
    pub description: String,
    /// JSON-schema-shaped argument description; not validated at this
    /// layer beyond being present
    pub parameters: Value,
    /// When true, execution is gated on an external confirmation and
    /// the invocation suspends at the call site
    pub requires_confirmation: bool,
}

impl ToolDefinition {
    /// Create a definition with an empty object schema
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
            requires_confirmation: false,
        }
    }

    /// Set the argument schema
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Gate execution on external confirmation
    pub fn with_confirmation(mut self) -> Self {
        self.requires_confirmation = true;
        self
    }
}

/// Execution context handed to a running tool
pub struct ToolContext<'a> {
    agent: &'a str,
    state: &'a StateMap,
    writes: Vec<(String, Value)>,
    escalate: bool,
}

impl<'a> ToolContext<'a> {
    pub(crate) fn new(agent: &'a str, state: &'a StateMap) -> Self {
        Self {
            agent,
            state,
            writes: Vec::new(),
            escalate: false,
        }
    }

    /// Name of the agent that requested this tool call
    pub fn agent_name(&self) -> &str {
        self.agent
    }

    /// Read a state key from the leaf's view
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    /// Queue a state write; the enclosing leaf records it as a
    /// state-write event after the tool returns
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.writes.push((key.into(), value));
    }

    /// Request early termination of the nearest enclosing loop
    ///
    /// Recorded as a control-signal event, never as a state write, so
    /// escalation cannot be confused with data.
    pub fn escalate(&mut self) {
        self.escalate = true;
    }

    pub(crate) fn escalated(&self) -> bool {
        self.escalate
    }

    pub(crate) fn into_writes(self) -> Vec<(String, Value)> {
        self.writes
    }
}

/// A named function callable by leaf agents
#[async_trait]
pub trait Tool: Send + Sync {
    /// Static definition (name, schema, confirmation flag)
    fn definition(&self) -> &ToolDefinition;

    /// Execute with structured arguments
    async fn call(&self, arguments: Value, ctx: &mut ToolContext<'_>)
        -> Result<Value, EngineError>;
}

/// Adapter wrapping a synchronous closure as a [`Tool`]
///
/// Convenient for deterministic tools; tools that need to await should
/// implement the trait directly.
pub struct FunctionTool<F>
where
    F: Fn(Value, &mut ToolContext<'_>) -> Result<Value, EngineError> + Send + Sync,
{
    definition: ToolDefinition,
    handler: F,
}

impl<F> FunctionTool<F>
where
    F: Fn(Value, &mut ToolContext<'_>) -> Result<Value, EngineError> + Send + Sync,
{
    /// Wrap a closure under the given definition
    pub fn new(definition: ToolDefinition, handler: F) -> Self {
        Self {
            definition,
            handler,
        }
    }
}

#[async_trait]
impl<F> Tool for FunctionTool<F>
where
    F: Fn(Value, &mut ToolContext<'_>) -> Result<Value, EngineError> + Send + Sync,
{
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn call(
        &self,
        arguments: Value,
        ctx: &mut ToolContext<'_>,
    ) -> Result<Value, EngineError> {
        (self.handler)(arguments, ctx)
    }
}

/// Built-in exit tool for loop composites
///
/// Raises the escalate action and returns an empty object. It never
/// writes state; the loop observes the resulting control-signal.
struct ExitLoopTool {
    definition: ToolDefinition,
}

#[async_trait]
impl Tool for ExitLoopTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn call(
        &self,
        _arguments: Value,
        ctx: &mut ToolContext<'_>,
    ) -> Result<Value, EngineError> {
        tracing::debug!(agent = %ctx.agent_name(), "exit_loop requested");
        ctx.escalate();
        Ok(serde_json::json!({}))
    }
}

/// Create the built-in `exit_loop` tool
pub fn exit_loop() -> Arc<dyn Tool> {
    Arc::new(ExitLoopTool {
        definition: ToolDefinition::new(
            EXIT_LOOP_TOOL,
            "Call when the current result is acceptable and iteration should stop.",
        ),
    })
}
