//! Leaf agents
//!
//! A leaf is the unit of actual work: it renders its instruction against
//! the session state, invokes either an opaque model or a deterministic
//! function, runs any requested tools (suspending on confirmation-gated
//! ones), and records its output as events. The leaf's only designated
//! state mutation is its `output_key` write; everything else goes
//! through tool context writes.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::time::timeout;
use uuid::Uuid;

use crate::agent::RunOutcome;
use crate::error::EngineError;
use crate::event::{ControlSignal, EventKind};
use crate::llm::{Content, LanguageModel, ModelRequest, ModelTurn, ToolCall, ToolResult};
use crate::runner::context::{InvocationContext, ResumeSlot};
use crate::session::{LeafRound, PendingConfirmation, StateMap};
use crate::template;
use crate::tools::{Tool, ToolContext, ToolDefinition};

/// Context handed to a deterministic leaf function
pub struct FunctionContext<'a> {
    agent: &'a str,
    state: &'a StateMap,
    conversation: &'a [Content],
    writes: Vec<(String, Value)>,
}

impl<'a> FunctionContext<'a> {
    fn new(agent: &'a str, state: &'a StateMap, conversation: &'a [Content]) -> Self {
        Self {
            agent,
            state,
            conversation,
            writes: Vec::new(),
        }
    }

    /// Name of the running leaf
    pub fn agent_name(&self) -> &str {
        self.agent
    }

    /// Read a state key from the leaf's view
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    /// Queue a state write, recorded as a state-write event
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.writes.push((key.into(), value));
    }

    /// Conversation visible to this leaf (empty when withheld)
    pub fn conversation(&self) -> &[Content] {
        self.conversation
    }

    /// Most recent user-authored text, walking the conversation backward
    pub fn latest_user_text(&self) -> Option<&str> {
        self.conversation
            .iter()
            .rev()
            .find(|c| c.author == crate::event::USER_AUTHOR)
            .map(|c| c.text.as_str())
    }
}

/// A deterministic unit of work behind a leaf
///
/// The counterpart of a model call for logic that must run and write
/// state unconditionally (classifier post-processing, lookups, ...).
#[async_trait]
pub trait LeafFunction: Send + Sync {
    /// Run and return the leaf's output text
    async fn run(&self, ctx: &mut FunctionContext<'_>) -> Result<String, EngineError>;
}

enum LeafBehavior {
    Model(Arc<dyn LanguageModel>),
    Function(Arc<dyn LeafFunction>),
}

/// Leaf agent node
pub struct LeafAgent {
    name: String,
    description: String,
    instruction: String,
    placeholders: BTreeSet<String>,
    output_key: Option<String>,
    include_contents: bool,
    catch_tool_errors: bool,
    tools: Vec<Arc<dyn Tool>>,
    behavior: LeafBehavior,
}

impl LeafAgent {
    /// Create a model-backed leaf
    pub fn model(name: impl Into<String>, model: Arc<dyn LanguageModel>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            instruction: String::new(),
            placeholders: BTreeSet::new(),
            output_key: None,
            include_contents: true,
            catch_tool_errors: false,
            tools: Vec::new(),
            behavior: LeafBehavior::Model(model),
        }
    }

    /// Create a deterministic-function leaf
    pub fn function(name: impl Into<String>, function: Arc<dyn LeafFunction>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            instruction: String::new(),
            placeholders: BTreeSet::new(),
            output_key: None,
            include_contents: true,
            catch_tool_errors: false,
            tools: Vec::new(),
            behavior: LeafBehavior::Function(function),
        }
    }

    /// Set the human-readable description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the instruction template; `{key}` placeholders are extracted
    /// here, once, so the keys this leaf reads are statically known
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self.placeholders = template::placeholder_keys(&self.instruction);
        self
    }

    /// Write the final output text into this state key
    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    /// Withhold conversation history; the leaf sees only templated state
    pub fn without_conversation(mut self) -> Self {
        self.include_contents = false;
        self
    }

    /// Attach a tool
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    /// Convert tool failures into result payloads fed back to the model
    /// instead of failing the invocation
    pub fn with_catch_tool_errors(mut self) -> Self {
        self.catch_tool_errors = true;
        self
    }

    /// Leaf name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Leaf description
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Output key, if configured
    pub fn output_key(&self) -> Option<&str> {
        self.output_key.as_deref()
    }

    /// Statically-declared placeholder keys
    pub fn placeholder_keys(&self) -> &BTreeSet<String> {
        &self.placeholders
    }

    fn find_tool(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.definition().name == name)
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition().clone()).collect()
    }

    pub(crate) async fn execute(
        &self,
        ctx: &InvocationContext,
        resume: Option<ResumeSlot>,
    ) -> Result<RunOutcome, EngineError> {
        if let Some(slot) = resume {
            if !slot.at_leaf() {
                return Err(EngineError::resume_error(format!(
                    "leaf '{}' reached with unconsumed resume frames",
                    self.name
                )));
            }
            return self.resume_round(ctx, slot).await;
        }

        let view = ctx.state_view().await;
        match &self.behavior {
            LeafBehavior::Function(function) => {
                self.run_function(ctx, &view, Arc::clone(function)).await
            }
            LeafBehavior::Model(model) => {
                let instruction = template::render(
                    &self.instruction,
                    &self.placeholders,
                    &view,
                    ctx.config().missing_key_policy,
                    &self.name,
                )?;
                let model = Arc::clone(model);
                let turn = self.call_model(ctx, &model, &instruction, Vec::new()).await?;
                match turn {
                    ModelTurn::Text(text) => self.finish(ctx, text).await,
                    ModelTurn::ToolCalls(calls) => {
                        self.run_tool_round(ctx, &view, &model, instruction, calls, 0, Vec::new())
                            .await
                    }
                }
            }
        }
    }

    async fn run_function(
        &self,
        ctx: &InvocationContext,
        view: &StateMap,
        function: Arc<dyn LeafFunction>,
    ) -> Result<RunOutcome, EngineError> {
        let conversation = if self.include_contents {
            ctx.conversation().await
        } else {
            Vec::new()
        };
        let mut fctx = FunctionContext::new(&self.name, view, &conversation);
        let text = function.run(&mut fctx).await?;
        for (key, value) in fctx.writes {
            ctx.append(&self.name, EventKind::StateWrite { key, value })
                .await;
        }
        self.finish(ctx, text).await
    }

    /// One opaque model call, bounded by the configured timeout
    async fn call_model(
        &self,
        ctx: &InvocationContext,
        model: &Arc<dyn LanguageModel>,
        instruction: &str,
        tool_results: Vec<ToolResult>,
    ) -> Result<ModelTurn, EngineError> {
        let contents = if self.include_contents {
            ctx.conversation().await
        } else {
            Vec::new()
        };
        let request = ModelRequest {
            instruction: instruction.to_string(),
            contents,
            tools: self.tool_definitions(),
            tool_results,
        };
        let duration = ctx.config().model_timeout;
        match timeout(duration, model.complete(&request)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::ModelTimeout {
                agent: self.name.clone(),
                duration,
            }),
        }
    }

    /// Process tool calls from `start` onward, then run the feedback
    /// round that produces the leaf's final output
    async fn run_tool_round(
        &self,
        ctx: &InvocationContext,
        view: &StateMap,
        model: &Arc<dyn LanguageModel>,
        instruction: String,
        calls: Vec<ToolCall>,
        start: usize,
        mut results: Vec<ToolResult>,
    ) -> Result<RunOutcome, EngineError> {
        for index in start..calls.len() {
            let call = &calls[index];
            let tool = self.find_tool(&call.name).ok_or_else(|| {
                EngineError::agent_error(
                    &self.name,
                    format!("model requested unknown tool '{}'", call.name),
                )
            })?;

            if tool.definition().requires_confirmation {
                let request_id = Uuid::new_v4().to_string();
                ctx.append(
                    &self.name,
                    EventKind::ConfirmationRequest {
                        request_id: request_id.clone(),
                        tool_name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    },
                )
                .await;
                ctx.register_pending(PendingConfirmation {
                    request_id: request_id.clone(),
                    tool_name: call.name.clone(),
                    arguments: call.arguments.clone(),
                    frames: ctx.frames().to_vec(),
                    round: LeafRound {
                        instruction,
                        tool_calls: calls.clone(),
                        call_index: index,
                        results,
                    },
                })
                .await;
                tracing::info!(
                    agent = %self.name,
                    tool = %call.name,
                    request_id = %request_id,
                    "invocation suspended awaiting confirmation"
                );
                return Ok(RunOutcome::Suspended);
            }

            ctx.append(
                &self.name,
                EventKind::ToolCallRequest {
                    tool_name: call.name.clone(),
                    arguments: call.arguments.clone(),
                },
            )
            .await;
            let (value, escalated) = self.execute_tool(ctx, view, tool.as_ref(), call).await?;
            ctx.append(
                &self.name,
                EventKind::ToolCallResult {
                    tool_name: call.name.clone(),
                    result: value.clone(),
                },
            )
            .await;
            results.push(ToolResult::new(call.name.clone(), value));

            if escalated {
                ctx.append(
                    &self.name,
                    EventKind::ControlSignal {
                        signal: ControlSignal::Escalate,
                    },
                )
                .await;
                return Ok(RunOutcome::Escalated);
            }
        }

        // Feedback round: the results go back to the model exactly once
        let turn = self.call_model(ctx, model, &instruction, results).await?;
        match turn {
            ModelTurn::Text(text) => self.finish(ctx, text).await,
            ModelTurn::ToolCalls(_) => Err(EngineError::agent_error(
                &self.name,
                "tool calls requested after the feedback round",
            )),
        }
    }

    async fn execute_tool(
        &self,
        ctx: &InvocationContext,
        view: &StateMap,
        tool: &dyn Tool,
        call: &ToolCall,
    ) -> Result<(Value, bool), EngineError> {
        tracing::debug!(agent = %self.name, tool = %call.name, "executing tool");
        let mut tctx = ToolContext::new(&self.name, view);
        let value = match tool.call(call.arguments.clone(), &mut tctx).await {
            Ok(value) => value,
            Err(err) if self.catch_tool_errors => {
                tracing::warn!(
                    agent = %self.name,
                    tool = %call.name,
                    error = %err,
                    "tool error converted to result payload"
                );
                json!({"error": err.to_string()})
            }
            Err(err) => return Err(err),
        };
        let escalated = tctx.escalated();
        for (key, value) in tctx.into_writes() {
            ctx.append(&self.name, EventKind::StateWrite { key, value })
                .await;
        }
        Ok((value, escalated))
    }

    /// Continue a round paused on a confirmation request
    ///
    /// The stored rendered instruction is reused rather than re-rendered
    /// so the leaf keeps the state view it originally saw.
    async fn resume_round(
        &self,
        ctx: &InvocationContext,
        slot: ResumeSlot,
    ) -> Result<RunOutcome, EngineError> {
        let model = match &self.behavior {
            LeafBehavior::Model(model) => Arc::clone(model),
            LeafBehavior::Function(_) => {
                return Err(EngineError::resume_error(format!(
                    "function leaf '{}' cannot hold a pending confirmation",
                    self.name
                )))
            }
        };
        let LeafRound {
            instruction,
            tool_calls,
            call_index,
            mut results,
        } = slot.round;
        let call = tool_calls
            .get(call_index)
            .cloned()
            .ok_or_else(|| {
                EngineError::resume_error(format!(
                    "pending call index {} out of range in leaf '{}'",
                    call_index, self.name
                ))
            })?;
        let view = ctx.state_view().await;

        if slot.approved {
            let tool = self.find_tool(&call.name).ok_or_else(|| {
                EngineError::agent_error(
                    &self.name,
                    format!("confirmed tool '{}' is no longer attached", call.name),
                )
            })?;
            ctx.append(
                &self.name,
                EventKind::ToolCallRequest {
                    tool_name: call.name.clone(),
                    arguments: call.arguments.clone(),
                },
            )
            .await;
            let (value, escalated) = self.execute_tool(ctx, &view, tool.as_ref(), &call).await?;
            ctx.append(
                &self.name,
                EventKind::ToolCallResult {
                    tool_name: call.name.clone(),
                    result: value.clone(),
                },
            )
            .await;
            results.push(ToolResult::new(call.name.clone(), value));
            if escalated {
                ctx.append(
                    &self.name,
                    EventKind::ControlSignal {
                        signal: ControlSignal::Escalate,
                    },
                )
                .await;
                return Ok(RunOutcome::Escalated);
            }
        } else {
            tracing::info!(agent = %self.name, tool = %call.name, "tool execution denied");
            results.push(ToolResult::new(
                call.name.clone(),
                json!({"approved": false, "note": "tool execution denied by user"}),
            ));
        }

        self.run_tool_round(
            ctx,
            &view,
            &model,
            instruction,
            tool_calls,
            call_index + 1,
            results,
        )
        .await
    }

    /// Record the leaf's final output: the designated state write (if
    /// configured) plus a text-output event
    async fn finish(&self, ctx: &InvocationContext, text: String) -> Result<RunOutcome, EngineError> {
        if let Some(key) = &self.output_key {
            ctx.append(
                &self.name,
                EventKind::StateWrite {
                    key: key.clone(),
                    value: Value::String(text.clone()),
                },
            )
            .await;
        }
        ctx.append(&self.name, EventKind::TextOutput { text }).await;
        Ok(RunOutcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MissingKeyPolicy, RunnerConfig};
    use crate::session::Session;
    use tokio::sync::{mpsc, Mutex};

    struct FixedModel(&'static str);

    #[async_trait]
    impl LanguageModel for FixedModel {
        async fn complete(&self, _request: &ModelRequest) -> Result<ModelTurn, EngineError> {
            Ok(ModelTurn::Text(self.0.to_string()))
        }
    }

    fn test_ctx(session: Session) -> InvocationContext {
        let (tx, _rx) = mpsc::unbounded_channel();
        InvocationContext::new(
            "inv-1".into(),
            Arc::new(Mutex::new(session)),
            tx,
            Arc::new(RunnerConfig::default()),
        )
    }

    #[test]
    fn test_builder_extracts_placeholders() {
        let leaf = LeafAgent::model("critic", Arc::new(FixedModel("PASS")))
            .with_instruction("Task:\n{sql_task}\nDraft:\n{current_sql}")
            .with_output_key("criticism")
            .without_conversation();
        assert_eq!(leaf.placeholder_keys().len(), 2);
        assert_eq!(leaf.output_key(), Some("criticism"));
        assert!(leaf.placeholder_keys().contains("sql_task"));
    }

    #[tokio::test]
    async fn test_model_leaf_writes_output_key() {
        let leaf = LeafAgent::model("writer", Arc::new(FixedModel("SELECT 1")))
            .with_instruction("write sql")
            .with_output_key("current_sql");
        let ctx = test_ctx(Session::new("s1"));
        let outcome = leaf.execute(&ctx, None).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);

        let view = ctx.state_view().await;
        assert_eq!(view.get("current_sql"), Some(&json!("SELECT 1")));
    }

    struct CategoryFunction;

    #[async_trait]
    impl LeafFunction for CategoryFunction {
        async fn run(&self, ctx: &mut FunctionContext<'_>) -> Result<String, EngineError> {
            let category = ctx
                .get("category")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string();
            ctx.set("search_results", json!(format!("results for {}", category)));
            Ok(format!("fetched {}", category))
        }
    }

    #[tokio::test]
    async fn test_function_leaf_writes_state() {
        let leaf = LeafAgent::function("data_fetcher", Arc::new(CategoryFunction))
            .with_output_key("fetch_summary");
        let mut session = Session::new("s1");
        session.append(
            "inv-0",
            "classifier",
            EventKind::StateWrite {
                key: "category".into(),
                value: json!("support"),
            },
        );
        let ctx = test_ctx(session);

        let outcome = leaf.execute(&ctx, None).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);

        let view = ctx.state_view().await;
        assert_eq!(view.get("search_results"), Some(&json!("results for support")));
        assert_eq!(view.get("fetch_summary"), Some(&json!("fetched support")));
    }

    #[tokio::test]
    async fn test_missing_key_fail_policy_is_fatal() {
        let leaf = LeafAgent::model("critic", Arc::new(FixedModel("PASS")))
            .with_instruction("Draft: {current_sql}");
        let (tx, _rx) = mpsc::unbounded_channel();
        let ctx = InvocationContext::new(
            "inv-1".into(),
            Arc::new(Mutex::new(Session::new("s1"))),
            tx,
            Arc::new(RunnerConfig::new().with_missing_key_policy(MissingKeyPolicy::Fail)),
        );
        let err = leaf.execute(&ctx, None).await.unwrap_err();
        assert_eq!(err.kind(), "missing_state_key");
    }
}
