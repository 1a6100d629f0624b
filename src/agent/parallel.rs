//! Parallel composite
//!
//! Launches every child concurrently against the same state snapshot,
//! taken once when the fan-out starts, and joins them at a barrier - the
//! parent never observes partial completion. Children must not depend on
//! each other's writes; each write still lands in the shared log with
//! its own sequence number, so same-key writes resolve last-writer-wins.
//! Give each branch a distinct output key.
//!
//! On a fatal child failure the remaining children are cancelled and
//! already-completed writes are preserved.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::agent::{Agent, RunOutcome};
use crate::error::EngineError;
use crate::runner::context::{InvocationContext, ResumeSlot};
use crate::session::{Frame, FrameStep};

/// Concurrent fan-out/fan-in composite agent
pub struct ParallelAgent {
    name: String,
    children: Vec<Arc<Agent>>,
}

impl ParallelAgent {
    /// Create a parallel composite over the given children
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

    /// Children (launch order carries no execution guarantee)
    pub fn children(&self) -> &[Arc<Agent>] {
        &self.children
    }

    pub(crate) async fn execute(
        &self,
        ctx: &InvocationContext,
        resume: Option<ResumeSlot>,
    ) -> Result<RunOutcome, EngineError> {
        match resume {
            Some(slot) => self.resume_branch(ctx, slot).await,
            None => self.fan_out(ctx).await,
        }
    }

    async fn fan_out(&self, ctx: &InvocationContext) -> Result<RunOutcome, EngineError> {
        // One snapshot for every branch; staleness between branches is
        // intentional - the join is the only synchronization point
        let snapshot = ctx.state_view().await;
        let semaphore = Arc::new(Semaphore::new(ctx.config().parallelism));

        let mut join_set: JoinSet<(usize, Result<RunOutcome, EngineError>)> = JoinSet::new();
        for (index, child) in self.children.iter().enumerate() {
            let child_ctx = ctx
                .child(Frame::new(&self.name, FrameStep::Branch { index }))
                .with_frozen(Arc::clone(&snapshot));
            let future = Arc::clone(child).execute(child_ctx, None);
            let permit_source = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let _permit = permit_source.acquire_owned().await.ok();
                (index, future.await)
            });
        }

        let mut completed: HashSet<usize> = HashSet::new();
        let mut suspended = false;
        let mut escalated = false;
        let mut failure: Option<EngineError> = None;

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, Ok(RunOutcome::Completed))) => {
                    completed.insert(index);
                }
                Ok((_, Ok(RunOutcome::Suspended))) => {
                    suspended = true;
                }
                Ok((index, Ok(RunOutcome::Escalated))) => {
                    tracing::debug!(
                        agent = %self.name,
                        branch = index,
                        "parallel branch escalated, cancelling remaining branches"
                    );
                    escalated = true;
                    join_set.abort_all();
                }
                Ok((index, Err(err))) => {
                    tracing::warn!(
                        agent = %self.name,
                        branch = index,
                        error = %err,
                        "parallel branch failed, cancelling remaining branches"
                    );
                    if failure.is_none() {
                        failure = Some(err);
                    }
                    join_set.abort_all();
                }
                Err(join_err) if join_err.is_cancelled() => {}
                Err(join_err) => {
                    if failure.is_none() {
                        failure = Some(EngineError::agent_error(
                            &self.name,
                            format!("parallel branch task failed: {}", join_err),
                        ));
                    }
                    join_set.abort_all();
                }
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }
        if escalated {
            return Ok(RunOutcome::Escalated);
        }
        if suspended {
            // Remember which branches finished so resume can skip them
            ctx.record_parallel_progress(&self.name, completed).await;
            return Ok(RunOutcome::Suspended);
        }
        Ok(RunOutcome::Completed)
    }

    /// Fast-forward to the one branch a confirmation response targets
    ///
    /// Completed branches recorded at suspend time are skipped; other
    /// still-pending branches keep the composite suspended until their
    /// own responses arrive.
    async fn resume_branch(
        &self,
        ctx: &InvocationContext,
        mut slot: ResumeSlot,
    ) -> Result<RunOutcome, EngineError> {
        let frame = slot.pop_frame().ok_or_else(|| {
            EngineError::resume_error(format!("parallel '{}' reached without a frame", self.name))
        })?;
        if frame.node != self.name {
            return Err(EngineError::resume_error(format!(
                "expected frame for '{}', found '{}'",
                self.name, frame.node
            )));
        }
        let index = match frame.step {
            FrameStep::Branch { index } => index,
            other => {
                return Err(EngineError::resume_error(format!(
                    "parallel '{}' cannot resume from {:?}",
                    self.name, other
                )))
            }
        };
        if index >= self.children.len() {
            return Err(EngineError::resume_error(format!(
                "parallel '{}' has no branch {}",
                self.name, index
            )));
        }
        if ctx.parallel_completed(&self.name).await.contains(&index) {
            return Err(EngineError::resume_error(format!(
                "branch {} of parallel '{}' already completed",
                index, self.name
            )));
        }

        // The original snapshot is gone; the branch resumes against the
        // projection as of the resume call, frozen for its duration
        let snapshot = ctx.state_view().await;
        let child_ctx = ctx
            .child(Frame::new(&self.name, FrameStep::Branch { index }))
            .with_frozen(snapshot);

        match Arc::clone(&self.children[index])
            .execute(child_ctx, Some(slot))
            .await?
        {
            RunOutcome::Completed => {
                ctx.record_parallel_progress(&self.name, [index]).await;
                if ctx.has_pending_through(&self.name).await {
                    // Other branches still await their confirmations;
                    // the barrier stays closed
                    Ok(RunOutcome::Suspended)
                } else {
                    Ok(RunOutcome::Completed)
                }
            }
            other => Ok(other),
        }
    }
}
