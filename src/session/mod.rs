//! Event-sourced sessions
//!
//! A session is a per-conversation record: an append-only event log plus
//! a state projection that is always the fold of the log's state-write
//! events. The only mutation entry point is [`Session::append`], which
//! assigns the next sequence number, applies any state write, and stores
//! the event - one serialized writer per session, even when parallel
//! branches execute concurrently.

mod suspended;

pub use suspended::{Frame, FrameStep, LeafRound, PendingConfirmation, SuspendedInvocation};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::EngineError;
use crate::event::{Event, EventKind, USER_AUTHOR};

/// Session state: string keys to JSON-shaped values
pub type StateMap = HashMap<String, Value>;

/// A session shared between the runner and its caller
pub type SharedSession = Arc<Mutex<Session>>;

/// One conversation's event log and state projection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    id: String,
    state: StateMap,
    events: Vec<Event>,
    next_sequence: u64,
    suspended: Option<SuspendedInvocation>,
}

impl Session {
    /// Create an empty session
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: StateMap::new(),
            events: Vec::new(),
            next_sequence: 0,
            suspended: None,
        }
    }

    /// Session identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current state projection
    pub fn state(&self) -> &StateMap {
        &self.state
    }

    /// Read one state key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    /// Owned copy of the current projection
    pub fn snapshot(&self) -> StateMap {
        self.state.clone()
    }

    /// Caller-originated state write, outside any agent invocation
    ///
    /// Still recorded as a state-write event under a fresh invocation
    /// id - there is no out-of-band mutation path.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Event {
        let invocation_id = Uuid::new_v4().to_string();
        self.append(
            &invocation_id,
            USER_AUTHOR,
            EventKind::StateWrite {
                key: key.into(),
                value,
            },
        )
    }

    /// Full ordered event log
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Events belonging to one invocation, in log order
    pub fn events_for_invocation(&self, invocation_id: &str) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.invocation_id == invocation_id)
            .collect()
    }

    /// Suspended-invocation record, if any
    pub fn suspended(&self) -> Option<&SuspendedInvocation> {
        self.suspended.as_ref()
    }

    pub(crate) fn suspended_mut(&mut self) -> Option<&mut SuspendedInvocation> {
        self.suspended.as_mut()
    }

    /// Register a pending confirmation, creating the suspended record
    /// for the invocation if needed
    pub(crate) fn register_pending(
        &mut self,
        invocation_id: &str,
        pending: PendingConfirmation,
    ) {
        let record = self
            .suspended
            .get_or_insert_with(|| SuspendedInvocation::new(invocation_id));
        record.register(pending);
    }

    /// Drop the suspended record (invocation finished or failed)
    pub(crate) fn clear_suspended(&mut self) {
        self.suspended = None;
    }

    /// Append one event: assigns the sequence number, applies a state
    /// write to the projection, and stores the event
    pub(crate) fn append(
        &mut self,
        invocation_id: &str,
        author: &str,
        kind: EventKind,
    ) -> Event {
        let event = Event {
            invocation_id: invocation_id.to_string(),
            sequence_number: self.next_sequence,
            author: author.to_string(),
            timestamp: Utc::now(),
            kind,
        };
        self.next_sequence += 1;
        if let Some((key, value)) = event.state_write() {
            self.state.insert(key.to_string(), value.clone());
        }
        self.events.push(event.clone());
        event
    }

    /// Seed initial state through state-write events so the replay
    /// invariant holds from the first event
    pub(crate) fn seed(&mut self, seed_state: StateMap) {
        if seed_state.is_empty() {
            return;
        }
        let invocation_id = Uuid::new_v4().to_string();
        // BTreeMap ordering keeps seeded logs deterministic
        let ordered: std::collections::BTreeMap<_, _> = seed_state.into_iter().collect();
        for (key, value) in ordered {
            self.append(&invocation_id, USER_AUTHOR, EventKind::StateWrite { key, value });
        }
    }

    /// Pure fold of an event prefix into a state projection
    ///
    /// Deterministic: replaying the same prefix twice yields the same
    /// state.
    pub fn replay(events: &[Event]) -> StateMap {
        let mut state = StateMap::new();
        for event in events {
            if let Some((key, value)) = event.state_write() {
                state.insert(key.to_string(), value.clone());
            }
        }
        state
    }

    /// Truncate the log before the first event of `invocation_id` and
    /// recompute the projection from the remaining prefix
    ///
    /// Discarded events are unrecoverable. A suspended record whose
    /// invocation was truncated is dropped with the events.
    pub(crate) fn rewind_before_invocation(
        &mut self,
        invocation_id: &str,
    ) -> Result<(), EngineError> {
        let position = self
            .events
            .iter()
            .position(|e| e.invocation_id == invocation_id)
            .ok_or_else(|| EngineError::UnknownRewindTarget {
                invocation_id: invocation_id.to_string(),
            })?;

        self.events.truncate(position);
        self.state = Self::replay(&self.events);
        self.next_sequence = self
            .events
            .last()
            .map(|e| e.sequence_number + 1)
            .unwrap_or(0);

        if let Some(suspended) = &self.suspended {
            let still_logged = self
                .events
                .iter()
                .any(|e| e.invocation_id == suspended.invocation_id);
            if !still_logged {
                self.suspended = None;
            }
        }

        tracing::info!(
            session_id = %self.id,
            before_invocation = %invocation_id,
            remaining_events = self.events.len(),
            "Session rewound"
        );
        Ok(())
    }
}

/// Contract a session backend must satisfy
///
/// The in-memory implementation below is the reference; a durable
/// backend persists the serialized [`Session`] (log, projection, and
/// suspended record) and hands out the same shared handles.
#[async_trait]
pub trait SessionService: Send + Sync {
    /// Create a session with a generated id, seeding `seed_state`
    /// through state-write events
    async fn create_session(&self, seed_state: StateMap) -> Result<SharedSession, EngineError>;

    /// Fetch an existing session
    async fn get_session(&self, session_id: &str) -> Result<SharedSession, EngineError>;

    /// Drop a session
    async fn delete_session(&self, session_id: &str) -> Result<(), EngineError>;
}

/// In-memory session store
#[derive(Default)]
pub struct InMemorySessionService {
    sessions: RwLock<HashMap<String, SharedSession>>,
}

impl InMemorySessionService {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session under a caller-chosen id
    pub async fn create_session_with_id(
        &self,
        session_id: impl Into<String>,
        seed_state: StateMap,
    ) -> Result<SharedSession, EngineError> {
        let session_id = session_id.into();
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session_id) {
            return Err(EngineError::config_error(format!(
                "session '{}' already exists",
                session_id
            )));
        }
        let mut session = Session::new(session_id.clone());
        session.seed(seed_state);
        let shared = Arc::new(Mutex::new(session));
        sessions.insert(session_id, shared.clone());
        Ok(shared)
    }
}

#[async_trait]
impl SessionService for InMemorySessionService {
    async fn create_session(&self, seed_state: StateMap) -> Result<SharedSession, EngineError> {
        self.create_session_with_id(Uuid::new_v4().to_string(), seed_state)
            .await
    }

    async fn get_session(&self, session_id: &str) -> Result<SharedSession, EngineError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), EngineError> {
        self.sessions
            .write()
            .await
            .remove(session_id)
            .map(|_| ())
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))
    }
}
