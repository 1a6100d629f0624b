//! Durable suspended-invocation records
//!
//! When a confirmation-gated tool pauses an invocation, everything
//! needed to continue is captured here and stored on the session, so a
//! resume can happen from another process once the session itself is
//! persisted. Resume never relies on a parked task: the runner
//! fast-forwards the agent tree along the recorded frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use crate::llm::{ToolCall, ToolResult};

/// Progress marker for one composite on the suspension path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum FrameStep {
    /// Sequential composite: index of the child that suspended
    Child { index: usize },
    /// Loop composite: iteration count and child index at suspend time
    LoopIter { iteration: u32, child: usize },
    /// Parallel composite: index of the suspended branch
    Branch { index: usize },
}

/// One composite node on the path from the root to the suspended leaf
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Composite node name (unique within the root tree)
    pub node: String,
    /// Progress within that composite
    pub step: FrameStep,
}

impl Frame {
    pub fn new(node: impl Into<String>, step: FrameStep) -> Self {
        Self {
            node: node.into(),
            step,
        }
    }
}

/// Partially-completed leaf round captured at suspend time
///
/// The rendered instruction is stored rather than re-rendered on resume
/// so the leaf keeps the state view it originally saw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafRound {
    /// Instruction as rendered when the leaf started
    pub instruction: String,
    /// The model turn's tool calls, in request order
    pub tool_calls: Vec<ToolCall>,
    /// Index of the call awaiting confirmation
    pub call_index: usize,
    /// Results already collected for calls before `call_index`
    pub results: Vec<ToolResult>,
}

/// One outstanding confirmation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingConfirmation {
    /// Correlation id carried by the confirmation-request event
    pub request_id: String,
    /// Tool awaiting approval
    pub tool_name: String,
    /// Arguments the tool would run with
    pub arguments: Value,
    /// Path from the root to the suspended leaf
    pub frames: Vec<Frame>,
    /// The leaf's in-flight round
    pub round: LeafRound,
}

/// Suspended state of one invocation, stored on the session
///
/// Multiple confirmations can be outstanding at once when parallel
/// branches each hit a gated tool; `request_id` equality is the only
/// correlation mechanism on resume.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuspendedInvocation {
    /// Invocation the record belongs to
    pub invocation_id: String,
    /// Outstanding requests keyed by request id
    pending: HashMap<String, PendingConfirmation>,
    /// Completed branch indices per parallel node on a suspension path
    parallel_progress: HashMap<String, HashSet<usize>>,
}

impl SuspendedInvocation {
    /// Create an empty record for an invocation
    pub fn new(invocation_id: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            pending: HashMap::new(),
            parallel_progress: HashMap::new(),
        }
    }

    /// Register an outstanding confirmation request
    pub fn register(&mut self, pending: PendingConfirmation) {
        self.pending.insert(pending.request_id.clone(), pending);
    }

    /// Remove and return the request matching `request_id`
    pub fn take_pending(&mut self, request_id: &str) -> Option<PendingConfirmation> {
        self.pending.remove(request_id)
    }

    /// Check whether any request is outstanding
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Outstanding request ids (order unspecified)
    pub fn pending_request_ids(&self) -> Vec<&str> {
        self.pending.keys().map(String::as_str).collect()
    }

    /// Check whether any outstanding request's path crosses the given
    /// composite node
    pub fn has_pending_through(&self, node: &str) -> bool {
        self.pending
            .values()
            .any(|p| p.frames.iter().any(|f| f.node == node))
    }

    /// Record completed branches for a parallel node
    pub fn record_parallel_progress(
        &mut self,
        node: impl Into<String>,
        completed: impl IntoIterator<Item = usize>,
    ) {
        self.parallel_progress
            .entry(node.into())
            .or_default()
            .extend(completed);
    }

    /// Completed branch indices for a parallel node
    pub fn parallel_completed(&self, node: &str) -> HashSet<usize> {
        self.parallel_progress
            .get(node)
            .cloned()
            .unwrap_or_default()
    }
}
