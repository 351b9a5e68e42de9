use crate::error::Result;
use crate::types::{Session, SessionId, Timestamp};

/// Keyed persistence for sessions.
///
/// Every session is its own unit of consistency: `update` performs an
/// isolated read-modify-write on one key and never touches another session.
/// Implementations must be safe to share across tasks.
pub trait SessionStore: Send + Sync {
    /// Create and persist a fresh idle session.
    fn create(&self) -> Result<Session>;

    /// Load a session. Fails with `SessionNotFound` for unknown ids.
    fn get(&self, id: SessionId) -> Result<Session>;

    /// Read, modify and write back one session atomically.
    ///
    /// When `apply` returns an error nothing is written and the error is
    /// returned unchanged.
    fn update(
        &self,
        id: SessionId,
        apply: &mut dyn FnMut(&mut Session) -> Result<()>,
    ) -> Result<Session>;

    /// Close a session. Closing an already closed session is a no-op.
    fn close(&self, id: SessionId) -> Result<Session>;

    /// Close every open session last updated before `cutoff`; returns their ids.
    fn close_inactive(&self, cutoff: Timestamp) -> Result<Vec<SessionId>>;

    /// All sessions, most recently updated first.
    fn list(&self) -> Result<Vec<Session>>;
}
