//! Agent nodes
//!
//! An agent tree is a closed tagged variant: leaves wrap an opaque model
//! call or a deterministic function, and three composites arrange them -
//! strict sequence, concurrent fan-out/fan-in, and bounded iterative
//! refinement. Dispatch is one match per variant; extending the engine
//! means adding a variant here deliberately, not subclassing.

mod leaf;
mod loop_agent;
mod parallel;
mod sequential;

pub use leaf::{FunctionContext, LeafAgent, LeafFunction};
pub use loop_agent::{LoopAgent, LoopStatus};
pub use parallel::ParallelAgent;
pub use sequential::SequentialAgent;

use futures::future::BoxFuture;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::EngineError;
use crate::runner::context::{InvocationContext, ResumeSlot};

/// How one node's execution ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunOutcome {
    /// The node ran to completion
    Completed,
    /// A descendant raised the escalate action; propagates upward until
    /// the nearest enclosing loop absorbs it
    Escalated,
    /// A confirmation-gated tool paused the invocation; the pending
    /// record is registered on the session
    Suspended,
}

/// A node in the agent tree
pub enum Agent {
    /// Model-backed or deterministic unit of work
    Leaf(LeafAgent),
    /// Ordered composite: child n+1 starts after child n completes
    Sequential(SequentialAgent),
    /// Concurrent composite: fan-out over one snapshot, barrier join
    Parallel(ParallelAgent),
    /// Bounded iterative composite with an escalation exit
    Loop(LoopAgent),
}

impl Agent {
    /// Node name, unique within its root tree
    pub fn name(&self) -> &str {
        match self {
            Agent::Leaf(leaf) => leaf.name(),
            Agent::Sequential(seq) => seq.name(),
            Agent::Parallel(par) => par.name(),
            Agent::Loop(lp) => lp.name(),
        }
    }

    /// Validate the tree: non-empty composites, positive loop budgets,
    /// and no duplicate node names anywhere under this root
    pub fn validate(&self) -> Result<(), EngineError> {
        let mut seen = HashSet::new();
        self.check(&mut seen)
    }

    fn check(&self, seen: &mut HashSet<String>) -> Result<(), EngineError> {
        if !seen.insert(self.name().to_string()) {
            return Err(EngineError::config_error(format!(
                "duplicate agent name '{}' in tree",
                self.name()
            )));
        }
        match self {
            Agent::Leaf(_) => Ok(()),
            Agent::Sequential(seq) => {
                if seq.children().is_empty() {
                    return Err(EngineError::config_error(format!(
                        "sequential agent '{}' has no children",
                        seq.name()
                    )));
                }
                for child in seq.children() {
                    child.check(seen)?;
                }
                Ok(())
            }
            Agent::Parallel(par) => {
                if par.children().is_empty() {
                    return Err(EngineError::config_error(format!(
                        "parallel agent '{}' has no children",
                        par.name()
                    )));
                }
                for child in par.children() {
                    child.check(seen)?;
                }
                Ok(())
            }
            Agent::Loop(lp) => {
                if lp.children().is_empty() {
                    return Err(EngineError::config_error(format!(
                        "loop agent '{}' has no children",
                        lp.name()
                    )));
                }
                if lp.max_iterations() == 0 {
                    return Err(EngineError::config_error(format!(
                        "loop agent '{}' requires max_iterations >= 1",
                        lp.name()
                    )));
                }
                for child in lp.children() {
                    child.check(seen)?;
                }
                Ok(())
            }
        }
    }

    /// Dispatch execution to the variant
    ///
    /// Boxed so composites can recurse and parallel branches can be
    /// spawned as independent tasks.
    pub(crate) fn execute(
        self: Arc<Self>,
        ctx: InvocationContext,
        resume: Option<ResumeSlot>,
    ) -> BoxFuture<'static, Result<RunOutcome, EngineError>> {
        let agent = self;
        Box::pin(async move {
            match agent.as_ref() {
                Agent::Leaf(leaf) => leaf.execute(&ctx, resume).await,
                Agent::Sequential(seq) => seq.execute(&ctx, resume).await,
                Agent::Parallel(par) => par.execute(&ctx, resume).await,
                Agent::Loop(lp) => lp.execute(&ctx, resume).await,
            }
        })
    }
}

impl From<LeafAgent> for Agent {
    fn from(leaf: LeafAgent) -> Self {
        Agent::Leaf(leaf)
    }
}

impl From<SequentialAgent> for Agent {
    fn from(seq: SequentialAgent) -> Self {
        Agent::Sequential(seq)
    }
}

impl From<ParallelAgent> for Agent {
    fn from(par: ParallelAgent) -> Self {
        Agent::Parallel(par)
    }
}

impl From<LoopAgent> for Agent {
    fn from(lp: LoopAgent) -> Self {
        Agent::Loop(lp)
    }
}
