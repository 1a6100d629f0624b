//! Sequential composite
//!
//! Children execute strictly in list order: child n+1 begins only after
//! child n completes, and every state write a child records is visible
//! to all later children. Escalation and suspension halt the remaining
//! children and propagate to the parent.

use std::sync::Arc;

use crate::agent::{Agent, RunOutcome};
use crate::error::EngineError;
use crate::runner::context::{InvocationContext, ResumeSlot};
use crate::session::{Frame, FrameStep};

/// Ordered composite agent
pub struct SequentialAgent {
    name: String,
    children: Vec<Arc<Agent>>,
}

impl SequentialAgent {
    /// Create a sequential composite over the given children
    pub fn new(name: impl Into<String>, children: Vec<Agent>) -> Self {
        Self {
            name: name.into(),
            children: children.into_iter().map(Arc::new).collect(),
        }
    }

    /// Composite name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ordered children
    pub fn children(&self) -> &[Arc<Agent>] {
        &self.children
    }

    pub(crate) async fn execute(
        &self,
        ctx: &InvocationContext,
        mut resume: Option<ResumeSlot>,
    ) -> Result<RunOutcome, EngineError> {
        let start = match &mut resume {
            Some(slot) => {
                let frame = slot.pop_frame().ok_or_else(|| {
                    EngineError::resume_error(format!(
                        "sequential '{}' reached without a frame",
                        self.name
                    ))
                })?;
                if frame.node != self.name {
                    return Err(EngineError::resume_error(format!(
                        "expected frame for '{}', found '{}'",
                        self.name, frame.node
                    )));
                }
                match frame.step {
                    FrameStep::Child { index } => index,
                    other => {
                        return Err(EngineError::resume_error(format!(
                            "sequential '{}' cannot resume from {:?}",
                            self.name, other
                        )))
                    }
                }
            }
            None => 0,
        };
        if start >= self.children.len() {
            return Err(EngineError::resume_error(format!(
                "sequential '{}' has no child {}",
                self.name, start
            )));
        }

        for index in start..self.children.len() {
            let slot = if index == start { resume.take() } else { None };
            let child_ctx = ctx.child(Frame::new(&self.name, FrameStep::Child { index }));
            match Arc::clone(&self.children[index]).execute(child_ctx, slot).await? {
                RunOutcome::Completed => {}
                // Escalation or suspension: halt immediately, skip the
                // remaining children, propagate the same signal upward
                other => return Ok(other),
            }
        }
        Ok(RunOutcome::Completed)
    }
}
