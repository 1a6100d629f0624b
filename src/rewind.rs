//! Point-in-time rewind
//!
//! Reconstructs session state as of a point before a given invocation by
//! truncating the event log and folding the remaining prefix. The fold
//! is pure and deterministic, so rewinding twice to the same boundary
//! yields the same state. Discarded events are unrecoverable unless the
//! caller retained a copy of the original log.

use std::sync::Arc;

use crate::error::EngineError;
use crate::session::SessionService;

/// Rolls sessions back along their event logs
pub struct RewindManager {
    service: Arc<dyn SessionService>,
}

impl RewindManager {
    /// Create a manager over a session service
    pub fn new(service: Arc<dyn SessionService>) -> Self {
        Self { service }
    }

    /// Truncate the session's log before the first event of
    /// `before_invocation_id` and recompute the state projection
    ///
    /// Fails with `UnknownRewindTarget` (session untouched) when the
    /// invocation never occurred.
    pub async fn rewind(
        &self,
        session_id: &str,
        before_invocation_id: &str,
    ) -> Result<(), EngineError> {
        let session = self.service.get_session(session_id).await?;
        let mut guard = session.lock().await;
        guard.rewind_before_invocation(before_invocation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{InMemorySessionService, Session, StateMap};
    use serde_json::json;

    #[tokio::test]
    async fn test_rewind_through_service() {
        let service = Arc::new(InMemorySessionService::new());
        let shared = service
            .create_session_with_id("s1", StateMap::new())
            .await
            .unwrap();

        {
            let mut session = shared.lock().await;
            session.append(
                "inv-red",
                "writer",
                crate::event::EventKind::StateWrite {
                    key: "color".into(),
                    value: json!("red"),
                },
            );
            session.append(
                "inv-blue",
                "writer",
                crate::event::EventKind::StateWrite {
                    key: "color".into(),
                    value: json!("blue"),
                },
            );
        }

        let manager = RewindManager::new(service.clone());
        manager.rewind("s1", "inv-blue").await.unwrap();

        let session = shared.lock().await;
        assert_eq!(session.get("color"), Some(&json!("red")));
        assert_eq!(Session::replay(session.events()), *session.state());
    }

    #[tokio::test]
    async fn test_rewind_unknown_session() {
        let service = Arc::new(InMemorySessionService::new());
        let manager = RewindManager::new(service);
        let err = manager.rewind("missing", "inv-1").await.unwrap_err();
        assert_eq!(err.kind(), "session_not_found");
    }

    #[tokio::test]
    async fn test_rewind_unknown_target() {
        let service = Arc::new(InMemorySessionService::new());
        service
            .create_session_with_id("s1", StateMap::new())
            .await
            .unwrap();
        let manager = RewindManager::new(service);
        let err = manager.rewind("s1", "inv-never").await.unwrap_err();
        assert_eq!(err.kind(), "unknown_rewind_target");
    }
}
