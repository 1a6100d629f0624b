//! Opaque language model abstraction
//!
//! The engine never talks to a concrete provider. A leaf agent holds a
//! [`LanguageModel`] and hands it a rendered instruction, the visible
//! conversation, and its tool definitions; the model answers with either
//! plain text or tool-call requests. Anything from a real LLM client to
//! a scripted test double fits behind this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineError;
use crate::tools::ToolDefinition;

/// One entry of the conversation visible to a model call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    /// Event author (`user` or an agent name)
    pub author: String,
    /// Text of the turn
    pub text: String,
}

impl Content {
    /// Create a new content entry
    pub fn new(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            text: text.into(),
        }
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool name, matched against the leaf's tool definitions
    pub name: String,
    /// Structured arguments
    pub arguments: Value,
}

impl ToolCall {
    /// Create a new tool call
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// Result of one executed (or denied) tool call, fed back to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Tool name the result belongs to
    pub name: String,
    /// JSON-shaped result payload
    pub value: Value,
}

impl ToolResult {
    /// Create a new tool result
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Everything a model call gets to see
#[derive(Debug, Clone)]
pub struct ModelRequest {
    /// Rendered instruction for this leaf
    pub instruction: String,
    /// Conversation history; empty when the leaf withholds it
    pub contents: Vec<Content>,
    /// Tools the model may request
    pub tools: Vec<ToolDefinition>,
    /// Results of tool calls from this leaf's current round; empty on
    /// the first round, populated on the feedback round
    pub tool_results: Vec<ToolResult>,
}

/// What the model produced for one call
#[derive(Debug, Clone, PartialEq)]
pub enum ModelTurn {
    /// Plain output content
    Text(String),
    /// One or more tool-call requests, handled in order
    ToolCalls(Vec<ToolCall>),
}

/// Core model trait
///
/// Implementations must be deterministic about protocol, not content:
/// given a request they return exactly one [`ModelTurn`].
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Produce one turn for the given request
    async fn complete(&self, request: &ModelRequest) -> Result<ModelTurn, EngineError>;

    /// Model name for logging
    fn name(&self) -> &str {
        "model"
    }
}
