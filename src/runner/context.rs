//! Per-invocation execution context
//!
//! Threaded through the agent tree during execution. Cheap to clone:
//! composites hand each child a clone with its own frame pushed, and
//! parallel composites additionally freeze the state view so every
//! branch reads the same snapshot.

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::RunnerConfig;
use crate::event::{Event, EventKind};
use crate::llm::Content;
use crate::session::{
    Frame, PendingConfirmation, SharedSession, StateMap, SuspendedInvocation,
};

/// Execution context for one invocation
#[derive(Clone)]
pub(crate) struct InvocationContext {
    invocation_id: String,
    session: SharedSession,
    emitter: mpsc::UnboundedSender<Event>,
    config: Arc<RunnerConfig>,
    /// Frozen state view inside a parallel fan-out; `None` reads the
    /// live projection
    frozen: Option<Arc<StateMap>>,
    /// Path of composite frames from the root to the current node
    frames: Vec<Frame>,
}

impl InvocationContext {
    pub(crate) fn new(
        invocation_id: String,
        session: SharedSession,
        emitter: mpsc::UnboundedSender<Event>,
        config: Arc<RunnerConfig>,
    ) -> Self {
        Self {
            invocation_id,
            session,
            emitter,
            config,
            frozen: None,
            frames: Vec::new(),
        }
    }

    pub(crate) fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    pub(crate) fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub(crate) fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Clone for a child node, recording its frame on the path
    pub(crate) fn child(&self, frame: Frame) -> Self {
        let mut ctx = self.clone();
        ctx.frames.push(frame);
        ctx
    }

    /// Freeze the state view (parallel fan-out)
    pub(crate) fn with_frozen(mut self, snapshot: Arc<StateMap>) -> Self {
        self.frozen = Some(snapshot);
        self
    }

    /// Append one event to the session log and forward it to the
    /// caller's stream
    ///
    /// Sequence assignment happens under the session lock, which is what
    /// serializes writers across concurrent branches.
    pub(crate) async fn append(&self, author: &str, kind: EventKind) -> Event {
        let event = {
            let mut session = self.session.lock().await;
            session.append(&self.invocation_id, author, kind)
        };
        // Receiver may be gone if the caller dropped the stream; the log
        // still records the event
        let _ = self.emitter.send(event.clone());
        event
    }

    /// State view for a leaf: the frozen snapshot inside a parallel
    /// branch, the live projection otherwise
    pub(crate) async fn state_view(&self) -> Arc<StateMap> {
        if let Some(frozen) = &self.frozen {
            return Arc::clone(frozen);
        }
        let session = self.session.lock().await;
        Arc::new(session.snapshot())
    }

    /// Conversation history visible to leaves that consume it
    pub(crate) async fn conversation(&self) -> Vec<Content> {
        let session = self.session.lock().await;
        session
            .events()
            .iter()
            .filter_map(|e| e.text().map(|t| Content::new(e.author.clone(), t)))
            .collect()
    }

    /// Register an outstanding confirmation on the session
    pub(crate) async fn register_pending(&self, pending: PendingConfirmation) {
        let mut session = self.session.lock().await;
        session.register_pending(&self.invocation_id, pending);
    }

    /// Check whether any outstanding confirmation routes through the
    /// given composite node
    pub(crate) async fn has_pending_through(&self, node: &str) -> bool {
        let session = self.session.lock().await;
        session
            .suspended()
            .map(|s| s.has_pending_through(node))
            .unwrap_or(false)
    }

    /// Record completed branch indices for a parallel node
    pub(crate) async fn record_parallel_progress(
        &self,
        node: &str,
        completed: impl IntoIterator<Item = usize>,
    ) {
        let mut session = self.session.lock().await;
        if let Some(suspended) = session.suspended_mut() {
            suspended.record_parallel_progress(node, completed);
        }
    }

    /// Completed branch indices recorded for a parallel node
    pub(crate) async fn parallel_completed(&self, node: &str) -> std::collections::HashSet<usize> {
        let session = self.session.lock().await;
        session
            .suspended()
            .map(|s| s.parallel_completed(node))
            .unwrap_or_default()
    }

    /// Drop the suspended record once the invocation finishes
    pub(crate) async fn clear_suspended(&self) {
        let mut session = self.session.lock().await;
        session.clear_suspended();
    }

    /// Suspended record accessor for diagnostics
    pub(crate) async fn suspended(&self) -> Option<SuspendedInvocation> {
        let session = self.session.lock().await;
        session.suspended().cloned()
    }
}

/// Everything needed to fast-forward the tree to a suspended leaf
///
/// Built from the pending record matched by the caller's confirmation
/// response; each composite on the path pops its frame on the way down.
pub(crate) struct ResumeSlot {
    frames: VecDeque<Frame>,
    pub(crate) round: crate::session::LeafRound,
    pub(crate) approved: bool,
}

impl ResumeSlot {
    pub(crate) fn new(pending: PendingConfirmation, approved: bool) -> Self {
        Self {
            frames: pending.frames.into(),
            round: pending.round,
            approved,
        }
    }

    /// Pop the frame for the composite currently being entered
    pub(crate) fn pop_frame(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    /// True once the path has reached the suspended leaf
    pub(crate) fn at_leaf(&self) -> bool {
        self.frames.is_empty()
    }
}
