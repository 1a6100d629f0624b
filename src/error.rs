//! Error types for the orchestration engine
//!
//! One crate-wide error enum covering configuration, execution, and
//! protocol failures. Loop budget exhaustion is deliberately NOT an
//! error - it is a documented terminal outcome of the loop composite.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while building or running an agent tree
#[derive(Debug, Error)]
pub enum EngineError {
    /// A leaf instruction references a state key with no value and the
    /// missing-key policy is `Fail`
    #[error("missing state key '{key}' referenced by agent '{agent}'")]
    MissingStateKey { key: String, agent: String },

    /// Rewind target invocation id was never recorded in the event log
    #[error("unknown rewind target invocation '{invocation_id}'")]
    UnknownRewindTarget { invocation_id: String },

    /// `resume` was called with a request id that matches no pending
    /// confirmation on the session
    #[error("no pending confirmation matches request '{request_id}'")]
    ConfirmationMismatch { request_id: String },

    /// Session lookup failed
    #[error("session '{0}' not found")]
    SessionNotFound(String),

    /// `run` was called while the session is suspended awaiting a
    /// confirmation response
    #[error("session '{session_id}' is suspended awaiting confirmation")]
    InvocationSuspended { session_id: String },

    /// A tool raised an error and the enclosing leaf does not catch
    /// tool errors
    #[error("tool '{tool}' failed in agent '{agent}': {message}")]
    ToolExecution {
        tool: String,
        agent: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The opaque model call failed
    #[error("model call failed in agent '{agent}': {message}")]
    Model { agent: String, message: String },

    /// A model call exceeded the configured timeout
    #[error("model call timed out after {duration:?} in agent '{agent}'")]
    ModelTimeout { agent: String, duration: Duration },

    /// The whole invocation exceeded the configured timeout
    #[error("invocation timed out after {0:?}")]
    InvocationTimeout(Duration),

    /// Agent-level protocol violation (unknown tool name, tool calls
    /// requested after the feedback round, task panic, ...)
    #[error("agent '{agent}' failed: {message}")]
    Agent { agent: String, message: String },

    /// Invalid agent tree or runner configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Suspended-invocation record does not match the agent tree being
    /// resumed
    #[error("invalid resume state: {0}")]
    Resume(String),
}

impl EngineError {
    /// Create a tool execution error with a message
    pub fn tool_error(
        tool: impl Into<String>,
        agent: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ToolExecution {
            tool: tool.into(),
            agent: agent.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a tool execution error with an underlying source
    pub fn tool_error_with_source(
        tool: impl Into<String>,
        agent: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ToolExecution {
            tool: tool.into(),
            agent: agent.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a model error
    pub fn model_error(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Model {
            agent: agent.into(),
            message: message.into(),
        }
    }

    /// Create an agent-level protocol error
    pub fn agent_error(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Agent {
            agent: agent.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a resume-state error
    pub fn resume_error(message: impl Into<String>) -> Self {
        Self::Resume(message.into())
    }

    /// Stable machine-readable kind, used in terminal failure events
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingStateKey { .. } => "missing_state_key",
            Self::UnknownRewindTarget { .. } => "unknown_rewind_target",
            Self::ConfirmationMismatch { .. } => "confirmation_mismatch",
            Self::SessionNotFound(_) => "session_not_found",
            Self::InvocationSuspended { .. } => "invocation_suspended",
            Self::ToolExecution { .. } => "tool_execution",
            Self::Model { .. } => "model",
            Self::ModelTimeout { .. } => "model_timeout",
            Self::InvocationTimeout(_) => "invocation_timeout",
            Self::Agent { .. } => "agent",
            Self::Config(_) => "config",
            Self::Resume(_) => "resume",
        }
    }

    /// Check if the error is a protocol error on the confirmation
    /// handshake (the session stays suspended in that case)
    pub fn is_confirmation_mismatch(&self) -> bool {
        matches!(self, Self::ConfirmationMismatch { .. })
    }

    /// Check if the error is a timeout of any scope
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ModelTimeout { .. } | Self::InvocationTimeout(_))
    }
}
