use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// Lifecycle of one relay session.
///
/// `Open → Draining → Closed` on success; `Open | Draining → Failed` on any
/// abort. `Closed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Open,
    Draining,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }

    fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Open, Draining) | (Open, Failed) | (Draining, Closed) | (Draining, Failed)
        )
    }
}

/// Book-keeping for one in-flight streaming request.
#[derive(Debug)]
pub struct RelaySession {
    session_id: Uuid,
    state: SessionState,
    chunks_forwarded: u64,
    bytes_forwarded: u64,
    started_at: DateTime<Utc>,
    clock: Instant,
}

impl RelaySession {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    pub fn with_id(session_id: Uuid) -> Self {
        Self {
            session_id,
            state: SessionState::Open,
            chunks_forwarded: 0,
            bytes_forwarded: 0,
            started_at: Utc::now(),
            clock: Instant::now(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn chunks_forwarded(&self) -> u64 {
        self.chunks_forwarded
    }

    pub fn bytes_forwarded(&self) -> u64 {
        self.bytes_forwarded
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.clock.elapsed()
    }

    /// Index the next forwarded chunk must carry.
    pub fn next_sequence_index(&self) -> u64 {
        self.chunks_forwarded
    }

    /// Count a chunk that the transport accepted.
    pub(crate) fn record_forwarded(&mut self, bytes: usize) {
        self.chunks_forwarded += 1;
        self.bytes_forwarded += bytes as u64;
    }

    pub fn transition(&mut self, next: SessionState) -> CoreResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}

impl Default for RelaySession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_open_and_empty() {
        let session = RelaySession::new();
        assert_eq!(session.state(), SessionState::Open);
        assert_eq!(session.chunks_forwarded(), 0);
        assert_eq!(session.bytes_forwarded(), 0);
        assert_eq!(session.next_sequence_index(), 0);
    }

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(RelaySession::new().session_id(), RelaySession::new().session_id());
    }

    #[test]
    fn test_success_path_transitions() {
        let mut session = RelaySession::new();
        session.transition(SessionState::Draining).unwrap();
        session.transition(SessionState::Closed).unwrap();
        assert!(session.state().is_terminal());
    }

    #[test]
    fn test_failure_from_open_and_draining() {
        let mut open = RelaySession::new();
        open.transition(SessionState::Failed).unwrap();

        let mut draining = RelaySession::new();
        draining.transition(SessionState::Draining).unwrap();
        draining.transition(SessionState::Failed).unwrap();
        assert_eq!(draining.state(), SessionState::Failed);
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        for terminal in [SessionState::Closed, SessionState::Failed] {
            let mut session = RelaySession::new();
            session.transition(SessionState::Draining).unwrap();
            session.transition(terminal).unwrap();
            for next in [
                SessionState::Open,
                SessionState::Draining,
                SessionState::Closed,
                SessionState::Failed,
            ] {
                assert!(session.transition(next).is_err(), "{terminal:?} -> {next:?} must fail");
            }
            assert_eq!(session.state(), terminal);
        }
    }

    #[test]
    fn test_open_cannot_close_without_draining() {
        let mut session = RelaySession::new();
        let err = session.transition(SessionState::Closed).unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidTransition { from: SessionState::Open, to: SessionState::Closed }
        ));
    }

    #[test]
    fn test_record_forwarded_advances_sequence() {
        let mut session = RelaySession::new();
        session.record_forwarded(5);
        session.record_forwarded(6);
        assert_eq!(session.next_sequence_index(), 2);
        assert_eq!(session.bytes_forwarded(), 11);
    }
}
