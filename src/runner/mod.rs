//! Runner / scheduler
//!
//! Drives a root agent against a session. `run` services one incoming
//! message and yields a lazy, finite stream of events; `resume`
//! continues an invocation paused on a confirmation request. Sequence
//! numbers are assigned under the session lock, so the log is a valid
//! total order even while parallel branches interleave.

pub(crate) mod context;

use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

use crate::agent::{Agent, RunOutcome};
use crate::config::RunnerConfig;
use crate::error::EngineError;
use crate::event::{ControlSignal, Event, EventKind, USER_AUTHOR};
use crate::rewind::RewindManager;
use crate::session::SessionService;
use context::{InvocationContext, ResumeSlot};

/// Caller's decision for a pending confirmation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationResponse {
    /// Id from the confirmation-request event; the only correlation
    /// mechanism
    pub request_id: String,
    /// Whether the gated tool may execute
    pub approved: bool,
}

impl ConfirmationResponse {
    /// Approve the request
    pub fn approve(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            approved: true,
        }
    }

    /// Deny the request
    pub fn deny(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            approved: false,
        }
    }
}

/// Terminal status of one invocation
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationOutcome {
    /// Root agent ran to completion
    Completed,
    /// An escalate signal ended the invocation early (success)
    Escalated,
    /// Paused on one or more confirmation requests; continue with
    /// [`Runner::resume`]
    Suspended,
    /// Fatal failure; the partial event log is preserved and ends with
    /// a failure control-signal event
    Failed { kind: String, message: String },
}

impl InvocationOutcome {
    /// Check for successful completion (including escalation)
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed | Self::Escalated)
    }

    /// Check for suspension
    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended)
    }
}

/// Lazy, one-shot, finite stream of events for one invocation
///
/// Ends when the root agent completes, escalates, suspends on a
/// confirmation request, or fails fatally. Consume it as a
/// `futures::Stream`, or drain it and read the terminal outcome.
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<Event>,
    handle: Option<JoinHandle<InvocationOutcome>>,
}

impl EventStream {
    fn new(receiver: mpsc::UnboundedReceiver<Event>, handle: JoinHandle<InvocationOutcome>) -> Self {
        Self {
            receiver,
            handle: Some(handle),
        }
    }

    /// Receive the next event, or `None` once the invocation is over
    pub async fn next_event(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Drain remaining events and return everything plus the outcome
    pub async fn drain(mut self) -> (Vec<Event>, InvocationOutcome) {
        let mut events = Vec::new();
        while let Some(event) = self.receiver.recv().await {
            events.push(event);
        }
        let outcome = match self.handle.take() {
            Some(handle) => handle.await.unwrap_or_else(|join_err| InvocationOutcome::Failed {
                kind: "agent".into(),
                message: format!("driver task failed: {}", join_err),
            }),
            None => InvocationOutcome::Failed {
                kind: "agent".into(),
                message: "driver handle already consumed".into(),
            },
        };
        (events, outcome)
    }

    /// Discard remaining events and return the terminal outcome
    pub async fn outcome(self) -> InvocationOutcome {
        self.drain().await.1
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

/// Executes a root agent against sessions from a [`SessionService`]
pub struct Runner {
    root: Arc<Agent>,
    service: Arc<dyn SessionService>,
    config: Arc<RunnerConfig>,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Runner {
    /// Create a runner; fails on an invalid agent tree (duplicate
    /// names, empty composites, zero-iteration loops)
    pub fn new(root: Agent, service: Arc<dyn SessionService>) -> Result<Self, EngineError> {
        root.validate()?;
        Ok(Self {
            root: Arc::new(root),
            service,
            config: Arc::new(RunnerConfig::default()),
        })
    }

    /// Replace the default configuration
    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    /// The session service this runner executes against
    pub fn session_service(&self) -> &Arc<dyn SessionService> {
        &self.service
    }

    /// Root agent name
    pub fn root_name(&self) -> &str {
        self.root.name()
    }

    /// Service one incoming message
    ///
    /// Appends the message as a user-authored text event opening a fresh
    /// invocation, then drives the root agent. Fails with
    /// `InvocationSuspended` while a confirmation is outstanding.
    pub async fn run(
        &self,
        session_id: &str,
        message: impl Into<String>,
    ) -> Result<EventStream, EngineError> {
        let session = self.service.get_session(session_id).await?;
        {
            let guard = session.lock().await;
            if guard.suspended().is_some() {
                return Err(EngineError::InvocationSuspended {
                    session_id: session_id.to_string(),
                });
            }
        }

        let invocation_id = Uuid::new_v4().to_string();
        let (sender, receiver) = mpsc::unbounded_channel();
        let ctx = InvocationContext::new(
            invocation_id.clone(),
            session,
            sender,
            Arc::clone(&self.config),
        );
        ctx.append(
            USER_AUTHOR,
            EventKind::TextOutput {
                text: message.into(),
            },
        )
        .await;

        tracing::info!(
            session_id,
            invocation_id = %invocation_id,
            agent = %self.root.name(),
            "invocation started"
        );
        let handle = tokio::spawn(drive(Arc::clone(&self.root), ctx, None));
        Ok(EventStream::new(receiver, handle))
    }

    /// Continue an invocation paused on a confirmation request
    ///
    /// Fails with `ConfirmationMismatch` when nothing is suspended on
    /// the session or the request id matches no outstanding request;
    /// the session stays suspended in that case.
    pub async fn resume(
        &self,
        session_id: &str,
        response: ConfirmationResponse,
    ) -> Result<EventStream, EngineError> {
        let session = self.service.get_session(session_id).await?;
        let (invocation_id, slot) = {
            let mut guard = session.lock().await;
            let suspended = guard.suspended_mut().ok_or_else(|| {
                EngineError::ConfirmationMismatch {
                    request_id: response.request_id.clone(),
                }
            })?;
            let pending = suspended.take_pending(&response.request_id).ok_or_else(|| {
                EngineError::ConfirmationMismatch {
                    request_id: response.request_id.clone(),
                }
            })?;
            (
                suspended.invocation_id.clone(),
                ResumeSlot::new(pending, response.approved),
            )
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        let ctx = InvocationContext::new(
            invocation_id.clone(),
            session,
            sender,
            Arc::clone(&self.config),
        );
        ctx.append(
            USER_AUTHOR,
            EventKind::ConfirmationResponse {
                request_id: response.request_id.clone(),
                approved: response.approved,
            },
        )
        .await;

        tracing::info!(
            session_id,
            invocation_id = %invocation_id,
            request_id = %response.request_id,
            approved = response.approved,
            "invocation resumed"
        );
        let handle = tokio::spawn(drive(Arc::clone(&self.root), ctx, Some(slot)));
        Ok(EventStream::new(receiver, handle))
    }

    /// Roll the session back to before the given invocation
    pub async fn rewind(
        &self,
        session_id: &str,
        before_invocation_id: &str,
    ) -> Result<(), EngineError> {
        RewindManager::new(Arc::clone(&self.service))
            .rewind(session_id, before_invocation_id)
            .await
    }
}

/// Drive the root agent to a terminal outcome
///
/// Fatal failures become a terminal failure control-signal event; the
/// partial log is never rolled back. Any suspended record left behind by
/// a non-suspended outcome is cleared.
async fn drive(
    root: Arc<Agent>,
    ctx: InvocationContext,
    resume: Option<ResumeSlot>,
) -> InvocationOutcome {
    let budget = ctx.config().invocation_timeout;
    let result = match timeout(budget, Arc::clone(&root).execute(ctx.clone(), resume)).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::InvocationTimeout(budget)),
    };

    let outcome = match result {
        Ok(RunOutcome::Completed) => InvocationOutcome::Completed,
        Ok(RunOutcome::Escalated) => InvocationOutcome::Escalated,
        Ok(RunOutcome::Suspended) => InvocationOutcome::Suspended,
        Err(err) => {
            let kind = err.kind().to_string();
            let message = err.to_string();
            tracing::warn!(
                invocation_id = %ctx.invocation_id(),
                kind = %kind,
                %message,
                "invocation failed"
            );
            ctx.append(
                root.name(),
                EventKind::ControlSignal {
                    signal: ControlSignal::Failure {
                        kind: kind.clone(),
                        message: message.clone(),
                    },
                },
            )
            .await;
            InvocationOutcome::Failed { kind, message }
        }
    };

    if !outcome.is_suspended() {
        ctx.clear_suspended().await;
    } else if ctx.suspended().await.is_none() {
        tracing::warn!(
            invocation_id = %ctx.invocation_id(),
            "suspended outcome without a pending record"
        );
    }
    outcome
}
