//! `SessionStore` implementations.
//!
//! `SqliteSessionStore` survives restarts; `MemorySessionStore` keeps
//! everything in a map and backs tests and demo runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::debug;
use uuid::Uuid;

use aftercare_core::error::{AftercareError, Result};
use aftercare_core::store::SessionStore;
use aftercare_core::types::{Session, SessionId, Timestamp};

use crate::db::Database;
use crate::repository;

/// SQLite-backed session store.
///
/// Each `update` runs inside one transaction while holding the connection
/// lock, so a read-modify-write on one session never interleaves with another.
pub struct SqliteSessionStore {
    db: Arc<Database>,
}

impl SqliteSessionStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn in_transaction<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        self.db.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| AftercareError::Storage(format!("Failed to begin transaction: {}", e)))?;
            let value = f(&tx)?;
            tx.commit()
                .map_err(|e| AftercareError::Storage(format!("Failed to commit: {}", e)))?;
            Ok(value)
        })
    }
}

impl SessionStore for SqliteSessionStore {
    fn create(&self) -> Result<Session> {
        let session = Session::new(Uuid::new_v4());
        self.db
            .with_conn(|conn| repository::insert_session(conn, &session))?;
        debug!(session_id = %session.id, "Session created");
        Ok(session)
    }

    fn get(&self, id: SessionId) -> Result<Session> {
        self.db
            .with_conn(|conn| repository::load_session(conn, id))?
            .ok_or(AftercareError::SessionNotFound(id))
    }

    fn update(
        &self,
        id: SessionId,
        apply: &mut dyn FnMut(&mut Session) -> Result<()>,
    ) -> Result<Session> {
        self.in_transaction(|conn| {
            let mut session =
                repository::load_session(conn, id)?.ok_or(AftercareError::SessionNotFound(id))?;
            apply(&mut session)?;
            repository::save_session(conn, &session)?;
            Ok(session)
        })
    }

    fn close(&self, id: SessionId) -> Result<Session> {
        self.in_transaction(|conn| close_in(conn, id))
    }

    fn close_inactive(&self, cutoff: Timestamp) -> Result<Vec<SessionId>> {
        self.in_transaction(|conn| {
            let ids = repository::inactive_ids(conn, cutoff)?;
            for id in &ids {
                close_in(conn, *id)?;
            }
            Ok(ids)
        })
    }

    fn list(&self) -> Result<Vec<Session>> {
        self.db.with_conn(repository::list_sessions)
    }
}

fn close_in(conn: &Connection, id: SessionId) -> Result<Session> {
    let mut session =
        repository::load_session(conn, id)?.ok_or(AftercareError::SessionNotFound(id))?;
    if !session.is_closed() {
        session.close();
        repository::save_session(conn, &session)?;
    }
    Ok(session)
}

/// In-memory session store.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<SessionId, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<SessionId, Session>>> {
        self.sessions
            .lock()
            .map_err(|e| AftercareError::Storage(format!("Session map lock poisoned: {}", e)))
    }
}

impl SessionStore for MemorySessionStore {
    fn create(&self) -> Result<Session> {
        let session = Session::new(Uuid::new_v4());
        self.lock()?.insert(session.id, session.clone());
        Ok(session)
    }

    fn get(&self, id: SessionId) -> Result<Session> {
        self.lock()?
            .get(&id)
            .cloned()
            .ok_or(AftercareError::SessionNotFound(id))
    }

    fn update(
        &self,
        id: SessionId,
        apply: &mut dyn FnMut(&mut Session) -> Result<()>,
    ) -> Result<Session> {
        let mut sessions = self.lock()?;
        let stored = sessions
            .get_mut(&id)
            .ok_or(AftercareError::SessionNotFound(id))?;
        // Work on a copy so a failed apply leaves the stored session untouched.
        let mut working = stored.clone();
        apply(&mut working)?;
        if working.messages.len() < stored.messages.len() {
            return Err(AftercareError::Storage(format!(
                "Session {} message log is append-only",
                id
            )));
        }
        *stored = working.clone();
        Ok(working)
    }

    fn close(&self, id: SessionId) -> Result<Session> {
        let mut sessions = self.lock()?;
        let session = sessions
            .get_mut(&id)
            .ok_or(AftercareError::SessionNotFound(id))?;
        if !session.is_closed() {
            session.close();
        }
        Ok(session.clone())
    }

    fn close_inactive(&self, cutoff: Timestamp) -> Result<Vec<SessionId>> {
        let mut sessions = self.lock()?;
        let mut closed = Vec::new();
        for session in sessions.values_mut() {
            if !session.is_closed() && session.updated_at < cutoff {
                session.close();
                closed.push(session.id);
            }
        }
        Ok(closed)
    }

    fn list(&self) -> Result<Vec<Session>> {
        let mut all: Vec<Session> = self.lock()?.values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(all)
    }
}
