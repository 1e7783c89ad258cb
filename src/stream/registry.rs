//! Owner of every in-flight stream session.

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use super::session::{StreamId, StreamInfo, StreamSession, StreamState, TransitionError};
use crate::types::Usage;

/// Concurrent map of live sessions.
///
/// All mutation of session state and cancellation tokens goes through here.
/// Methods never hold a map guard across an await point.
#[derive(Debug, Clone, Default)]
pub struct StreamRegistry {
    sessions: Arc<DashMap<StreamId, StreamSession>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes ownership of a session; returns its id and cancellation token.
    pub fn register(&self, session: StreamSession) -> (StreamId, CancellationToken) {
        let id = session.id();
        let token = session.token().clone();
        self.sessions.insert(id, session);
        (id, token)
    }

    pub fn transition(
        &self,
        id: StreamId,
        next: StreamState,
    ) -> Result<StreamState, TransitionError> {
        let mut session = self
            .sessions
            .get_mut(&id)
            .ok_or(TransitionError::UnknownStream(id))?;
        session.transition(next)
    }

    /// Appends a delta and returns the accumulated text so far.
    pub fn append(&self, id: StreamId, delta: &str) -> Option<String> {
        let mut session = self.sessions.get_mut(&id)?;
        Some(session.append(delta).to_string())
    }

    pub fn set_actual_usage(&self, id: StreamId, usage: Usage) {
        if let Some(mut session) = self.sessions.get_mut(&id) {
            session.set_actual_usage(usage);
        }
    }

    /// Accumulated text and service-reported usage, if any.
    pub fn progress(&self, id: StreamId) -> Option<(String, Option<Usage>)> {
        self.sessions
            .get(&id)
            .map(|s| (s.accumulated_text().to_string(), s.actual_usage()))
    }

    pub fn state(&self, id: StreamId) -> Option<StreamState> {
        self.sessions.get(&id).map(|s| s.state())
    }

    pub fn info(&self, id: StreamId) -> Option<StreamInfo> {
        self.sessions.get(&id).map(|s| s.info())
    }

    /// Requests cancellation. Returns false for unknown sessions, sessions
    /// already settling, and sessions already cancelled.
    pub fn cancel(&self, id: StreamId) -> bool {
        let Some(session) = self.sessions.get(&id) else {
            return false;
        };
        if session.state().is_settled() || session.token().is_cancelled() {
            return false;
        }
        session.token().cancel();
        tracing::debug!(stream_id = %id, "stream cancellation requested");
        true
    }

    /// Cancels every live session; returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<StreamId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        ids.into_iter().filter(|id| self.cancel(*id)).count()
    }

    pub fn remove(&self, id: StreamId) -> Option<StreamSession> {
        self.sessions.remove(&id).map(|(_, session)| session)
    }

    pub fn active_streams(&self) -> Vec<StreamInfo> {
        let mut streams: Vec<StreamInfo> = self.sessions.iter().map(|s| s.info()).collect();
        streams.sort_by_key(|s| s.started_at);
        streams
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn admitted(registry: &StreamRegistry) -> (StreamId, CancellationToken) {
        let mut session = StreamSession::new("owner", Utc::now());
        session.admit(Usage::default()).unwrap();
        registry.register(session)
    }

    #[test]
    fn test_register_and_remove() {
        let registry = StreamRegistry::new();
        let (id, _) = admitted(&registry);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.state(id), Some(StreamState::Admitted));

        let session = registry.remove(id).unwrap();
        assert_eq!(session.owner_id(), "owner");
        assert!(registry.is_empty());
        assert!(registry.remove(id).is_none());
    }

    #[test]
    fn test_append_returns_accumulated() {
        let registry = StreamRegistry::new();
        let (id, _) = admitted(&registry);
        assert_eq!(registry.append(id, "a").as_deref(), Some("a"));
        assert_eq!(registry.append(id, "bc").as_deref(), Some("abc"));
        assert_eq!(registry.append(StreamId::new(), "x"), None);

        registry.set_actual_usage(id, Usage::new(4, 2));
        assert_eq!(
            registry.progress(id),
            Some(("abc".to_string(), Some(Usage::new(4, 2))))
        );
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let registry = StreamRegistry::new();
        let (id, token) = admitted(&registry);

        assert!(registry.cancel(id));
        assert!(token.is_cancelled());
        assert!(!registry.cancel(id));
        assert!(!registry.cancel(StreamId::new()));
    }

    #[test]
    fn test_cancel_ignored_while_settling() {
        let registry = StreamRegistry::new();
        let (id, token) = admitted(&registry);
        registry.transition(id, StreamState::Connecting).unwrap();
        registry.transition(id, StreamState::Settling).unwrap();

        assert!(!registry.cancel(id));
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_transition_unknown_stream() {
        let registry = StreamRegistry::new();
        let id = StreamId::new();
        assert_eq!(
            registry.transition(id, StreamState::Connecting),
            Err(TransitionError::UnknownStream(id))
        );
    }

    #[test]
    fn test_cancel_all_and_active_streams() {
        let registry = StreamRegistry::new();
        admitted(&registry);
        admitted(&registry);
        assert_eq!(registry.active_streams().len(), 2);
        assert_eq!(registry.cancel_all(), 2);
        assert_eq!(registry.cancel_all(), 0);
    }
}
