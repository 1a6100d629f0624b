//! Loop composite
//!
//! Runs its children in order as a sequential sub-run, up to
//! `max_iterations` times. An escalate signal raised by a descendant
//! (typically via the built-in `exit_loop` tool) ends the loop in
//! `Escalated`; hitting the budget ends it in `BudgetExhausted`. Both
//! are terminal, non-fatal outcomes - the budget is a safety valve, not
//! an error, and callers inspect the final state to tell convergence
//! from exhaustion.

use std::sync::Arc;

use crate::agent::{Agent, RunOutcome};
use crate::error::EngineError;
use crate::runner::context::{InvocationContext, ResumeSlot};
use crate::session::{Frame, FrameStep};

/// Loop termination state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    /// Iterating; carries the number of completed iterations
    Running(u32),
    /// A child escalated; terminal success, remaining iterations skipped
    Escalated,
    /// The iteration budget ran out; terminal non-fatal stop
    BudgetExhausted,
}

impl LoopStatus {
    /// Advance the machine after one completed sub-run
    pub fn advance(self, escalated: bool, max_iterations: u32) -> LoopStatus {
        match self {
            LoopStatus::Running(done) => {
                if escalated {
                    LoopStatus::Escalated
                } else if done + 1 >= max_iterations {
                    LoopStatus::BudgetExhausted
                } else {
                    LoopStatus::Running(done + 1)
                }
            }
            terminal => terminal,
        }
    }

    /// Check whether the loop has stopped
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LoopStatus::Running(_))
    }
}

/// Bounded iterative composite agent
pub struct LoopAgent {
    name: String,
    children: Vec<Arc<Agent>>,
    max_iterations: u32,
}

impl LoopAgent {
    /// Create a loop over the given children with an iteration budget
    pub fn new(name: impl Into<String>, children: Vec<Agent>, max_iterations: u32) -> Self {
        Self {
            name: name.into(),
            children: children.into_iter().map(Arc::new).collect(),
            max_iterations,
        }
    }

    /// Composite name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ordered children of one iteration
    pub fn children(&self) -> &[Arc<Agent>] {
        &self.children
    }

    /// Iteration budget
    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub(crate) async fn execute(
        &self,
        ctx: &InvocationContext,
        mut resume: Option<ResumeSlot>,
    ) -> Result<RunOutcome, EngineError> {
        let (mut iteration, mut start_child) = match &mut resume {
            Some(slot) => {
                let frame = slot.pop_frame().ok_or_else(|| {
                    EngineError::resume_error(format!("loop '{}' reached without a frame", self.name))
                })?;
                if frame.node != self.name {
                    return Err(EngineError::resume_error(format!(
                        "expected frame for '{}', found '{}'",
                        self.name, frame.node
                    )));
                }
                match frame.step {
                    FrameStep::LoopIter { iteration, child } => (iteration, child),
                    other => {
                        return Err(EngineError::resume_error(format!(
                            "loop '{}' cannot resume from {:?}",
                            self.name, other
                        )))
                    }
                }
            }
            None => (0, 0),
        };
        if start_child >= self.children.len() {
            return Err(EngineError::resume_error(format!(
                "loop '{}' has no child {}",
                self.name, start_child
            )));
        }

        let mut status = LoopStatus::Running(iteration);
        loop {
            let mut escalated = false;
            for index in start_child..self.children.len() {
                let slot = if index == start_child {
                    resume.take()
                } else {
                    None
                };
                let child_ctx = ctx.child(Frame::new(
                    &self.name,
                    FrameStep::LoopIter {
                        iteration,
                        child: index,
                    },
                ));
                match Arc::clone(&self.children[index]).execute(child_ctx, slot).await? {
                    RunOutcome::Completed => {}
                    RunOutcome::Suspended => return Ok(RunOutcome::Suspended),
                    // The sub-run halts; the loop observes the signal
                    // after the iteration and stops
                    RunOutcome::Escalated => {
                        escalated = true;
                        break;
                    }
                }
            }
            start_child = 0;

            status = status.advance(escalated, self.max_iterations);
            match status {
                LoopStatus::Running(done) => iteration = done,
                LoopStatus::Escalated => {
                    tracing::info!(
                        agent = %self.name,
                        iterations = iteration + 1,
                        "loop escalated"
                    );
                    // Escalation is absorbed here: terminal success
                    return Ok(RunOutcome::Completed);
                }
                LoopStatus::BudgetExhausted => {
                    tracing::info!(
                        agent = %self.name,
                        iterations = self.max_iterations,
                        "loop budget exhausted"
                    );
                    return Ok(RunOutcome::Completed);
                }
            }
        }
    }
}
