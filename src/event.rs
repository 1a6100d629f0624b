//! Immutable execution events
//!
//! Every step an agent takes is recorded as an [`Event`] appended to the
//! session log. The log is the source of truth: session state is always
//! the fold of its state-write events, which is what makes replay and
//! rewind deterministic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Author name used for caller-originated events (incoming messages,
/// seeded state, confirmation responses).
pub const USER_AUTHOR: &str = "user";

/// Control signals carried by [`EventKind::ControlSignal`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum ControlSignal {
    /// Early-termination request, absorbed by the nearest enclosing loop
    /// (or ends the invocation as success when no loop encloses it)
    Escalate,
    /// Terminal marker for a failed invocation; the partial log before
    /// this event reflects what actually ran
    Failure { kind: String, message: String },
}

/// Kind-specific payload of an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// Conversational text produced by an agent (or the incoming user
    /// message that opened the invocation)
    TextOutput { text: String },

    /// A state mutation; the session projection is the fold of these
    StateWrite { key: String, value: Value },

    /// An agent asked for a tool to be executed
    ToolCallRequest { tool_name: String, arguments: Value },

    /// Result returned by an executed tool
    ToolCallResult { tool_name: String, result: Value },

    /// A confirmation-gated tool suspended the invocation; `request_id`
    /// is the only correlation handle for the resume call
    ConfirmationRequest {
        request_id: String,
        tool_name: String,
        arguments: Value,
    },

    /// The caller's decision for a pending confirmation request
    ConfirmationResponse { request_id: String, approved: bool },

    /// Out-of-band control flow (escalation, terminal failure)
    ControlSignal { signal: ControlSignal },
}

/// One immutable record in the session event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Shared by every event produced while servicing one incoming message
    pub invocation_id: String,
    /// Strictly increasing within the session, including across
    /// concurrent parallel branches
    pub sequence_number: u64,
    /// Name of the agent node (or `user`) that produced this event
    pub author: String,
    /// Append time
    pub timestamp: DateTime<Utc>,
    /// Kind-specific payload
    pub kind: EventKind,
}

impl Event {
    /// Check whether this event mutates session state
    pub fn is_state_write(&self) -> bool {
        matches!(self.kind, EventKind::StateWrite { .. })
    }

    /// Key/value of a state-write event, if it is one
    pub fn state_write(&self) -> Option<(&str, &Value)> {
        match &self.kind {
            EventKind::StateWrite { key, value } => Some((key.as_str(), value)),
            _ => None,
        }
    }

    /// Text payload, if this is a text-output event
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            EventKind::TextOutput { text } => Some(text.as_str()),
            _ => None,
        }
    }

    /// Check whether this is the caller's incoming message
    pub fn is_user_message(&self) -> bool {
        self.author == USER_AUTHOR && matches!(self.kind, EventKind::TextOutput { .. })
    }

    /// Check whether this event carries an escalate signal
    pub fn is_escalation(&self) -> bool {
        matches!(
            self.kind,
            EventKind::ControlSignal {
                signal: ControlSignal::Escalate
            }
        )
    }
}
