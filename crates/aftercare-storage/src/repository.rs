//! SQLite persistence for sessions and their message logs.
//!
//! The row-level functions take a borrowed `Connection` so callers can
//! compose them inside a single lock or transaction.

use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use aftercare_core::error::AftercareError;
use aftercare_core::types::{
    EscalationReason, ImageRef, Message, MessageRole, RoutingState, Session, SessionFacts, SessionId, Timestamp,
};

use crate::db::Database;

/// Repository for session records.
pub struct SessionRepository {
    db: Arc<Database>,
}

impl SessionRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a brand-new session.
    pub fn insert(&self, session: &Session) -> Result<(), AftercareError> {
        self.db.with_conn(|conn| insert_session(conn, session))
    }

    /// Find a session with its full message log.
    pub fn find_by_id(&self, id: SessionId) -> Result<Option<Session>, AftercareError> {
        self.db.with_conn(|conn| load_session(conn, id))
    }

    /// Persist header changes and any messages not yet stored.
    pub fn save(&self, session: &Session) -> Result<(), AftercareError> {
        self.db.with_conn(|conn| save_session(conn, session))
    }

    /// Ids of open sessions not updated since `cutoff`.
    pub fn find_inactive(&self, cutoff: Timestamp) -> Result<Vec<SessionId>, AftercareError> {
        self.db.with_conn(|conn| inactive_ids(conn, cutoff))
    }

    /// All sessions, most recently updated first.
    pub fn list(&self) -> Result<Vec<Session>, AftercareError> {
        self.db.with_conn(list_sessions)
    }

    /// Number of stored sessions.
    pub fn count(&self) -> Result<u64, AftercareError> {
        self.db.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get::<_, i64>(0))
                .map(|n| n as u64)
                .map_err(|e| AftercareError::Storage(e.to_string()))
        })
    }
}

pub(crate) fn insert_session(conn: &Connection, session: &Session) -> Result<(), AftercareError> {
    let facts = serde_json::to_string(&session.facts)?;
    conn.execute(
        "INSERT INTO sessions (id, routing_state, failed_attempts, low_confidence_streak,
                               escalated, escalation_reason, facts, created_at, updated_at, closed_at,
                               turns_without_resolution)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        rusqlite::params![
            session.id.to_string(),
            session.routing_state.tag(),
            session.failed_resolution_attempts,
            session.low_confidence_streak,
            session.escalated as i32,
            session.escalation_reason.map(|r| r.code()),
            facts,
            session.created_at.0,
            session.updated_at.0,
            session.closed_at.map(|t| t.0),
            session.turns_without_resolution,
        ],
    )
    .map_err(|e| AftercareError::Storage(format!("Failed to insert session: {}", e)))?;
    append_messages(conn, session, 0)
}

pub(crate) fn save_session(conn: &Connection, session: &Session) -> Result<(), AftercareError> {
    let facts = serde_json::to_string(&session.facts)?;
    let changed = conn
        .execute(
            "UPDATE sessions
             SET routing_state = ?2, failed_attempts = ?3, low_confidence_streak = ?4,
                 escalated = ?5, escalation_reason = ?6, facts = ?7, updated_at = ?8, closed_at = ?9,
                 turns_without_resolution = ?10
             WHERE id = ?1",
            rusqlite::params![
                session.id.to_string(),
                session.routing_state.tag(),
                session.failed_resolution_attempts,
                session.low_confidence_streak,
                session.escalated as i32,
                session.escalation_reason.map(|r| r.code()),
                facts,
                session.updated_at.0,
                session.closed_at.map(|t| t.0),
                session.turns_without_resolution,
            ],
        )
        .map_err(|e| AftercareError::Storage(format!("Failed to update session: {}", e)))?;
    if changed == 0 {
        return Err(AftercareError::SessionNotFound(session.id));
    }

    let stored: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
            rusqlite::params![session.id.to_string()],
            |row| row.get(0),
        )
        .map_err(|e| AftercareError::Storage(e.to_string()))?;
    append_messages(conn, session, stored as usize)
}

/// Insert messages from position `from` onwards. Stored messages are never rewritten.
fn append_messages(conn: &Connection, session: &Session, from: usize) -> Result<(), AftercareError> {
    if from > session.messages.len() {
        return Err(AftercareError::Storage(format!(
            "Session {} holds fewer messages than stored; message log is append-only",
            session.id
        )));
    }
    let mut stmt = conn
        .prepare_cached(
            "INSERT INTO messages (session_id, seq, role, text, image_ref, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .map_err(|e| AftercareError::Storage(e.to_string()))?;
    for (seq, message) in session.messages.iter().enumerate().skip(from) {
        stmt.execute(rusqlite::params![
            session.id.to_string(),
            seq as i64,
            message.role.to_string(),
            message.text,
            message.image.as_ref().map(|i| i.as_str()),
            message.timestamp.0,
        ])
        .map_err(|e| AftercareError::Storage(format!("Failed to append message: {}", e)))?;
    }
    Ok(())
}

struct SessionRow {
    id: String,
    routing_state: String,
    failed_attempts: u32,
    low_confidence_streak: u32,
    escalated: bool,
    escalation_reason: Option<String>,
    facts: String,
    created_at: i64,
    updated_at: i64,
    closed_at: Option<i64>,
    turns_without_resolution: u32,
}

const SESSION_COLUMNS: &str = "id, routing_state, failed_attempts, low_confidence_streak, escalated,
     escalation_reason, facts, created_at, updated_at, closed_at, turns_without_resolution";

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        routing_state: row.get(1)?,
        failed_attempts: row.get(2)?,
        low_confidence_streak: row.get(3)?,
        escalated: row.get::<_, i32>(4)? != 0,
        escalation_reason: row.get(5)?,
        facts: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        closed_at: row.get(9)?,
        turns_without_resolution: row.get(10)?,
    })
}

fn row_to_session(conn: &Connection, row: SessionRow) -> Result<Session, AftercareError> {
    let id = Uuid::parse_str(&row.id)
        .map_err(|e| AftercareError::Storage(format!("Invalid session id: {}", e)))?;
    let routing_state = RoutingState::from_tag(&row.routing_state).ok_or_else(|| {
        AftercareError::Storage(format!("Invalid routing state: {}", row.routing_state))
    })?;
    let escalation_reason = row
        .escalation_reason
        .map(|r| r.parse::<EscalationReason>().map_err(AftercareError::Storage))
        .transpose()?;
    let facts: SessionFacts = serde_json::from_str(&row.facts)?;

    Ok(Session {
        id,
        messages: load_messages(conn, id)?,
        routing_state,
        failed_resolution_attempts: row.failed_attempts,
        low_confidence_streak: row.low_confidence_streak,
        turns_without_resolution: row.turns_without_resolution,
        escalated: row.escalated,
        escalation_reason,
        facts,
        created_at: Timestamp(row.created_at),
        updated_at: Timestamp(row.updated_at),
        closed_at: row.closed_at.map(Timestamp),
    })
}

fn load_messages(conn: &Connection, id: SessionId) -> Result<Vec<Message>, AftercareError> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT role, text, image_ref, created_at FROM messages
             WHERE session_id = ?1 ORDER BY seq ASC",
        )
        .map_err(|e| AftercareError::Storage(e.to_string()))?;

    let rows = stmt
        .query_map(rusqlite::params![id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })
        .map_err(|e| AftercareError::Storage(e.to_string()))?;

    let mut messages = Vec::new();
    for row in rows {
        let (role, text, image, created_at) =
            row.map_err(|e| AftercareError::Storage(e.to_string()))?;
        let role: MessageRole = role.parse().map_err(AftercareError::Storage)?;
        messages.push(Message {
            role,
            text,
            image: image.map(ImageRef),
            timestamp: Timestamp(created_at),
        });
    }
    Ok(messages)
}

pub(crate) fn load_session(
    conn: &Connection,
    id: SessionId,
) -> Result<Option<Session>, AftercareError> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS),
            rusqlite::params![id.to_string()],
            read_row,
        )
        .optional()
        .map_err(|e| AftercareError::Storage(e.to_string()))?;

    row.map(|r| row_to_session(conn, r)).transpose()
}

pub(crate) fn inactive_ids(
    conn: &Connection,
    cutoff: Timestamp,
) -> Result<Vec<SessionId>, AftercareError> {
    let mut stmt = conn
        .prepare(
            "SELECT id FROM sessions
             WHERE closed_at IS NULL AND updated_at < ?1
             ORDER BY updated_at ASC",
        )
        .map_err(|e| AftercareError::Storage(e.to_string()))?;
    let rows = stmt
        .query_map(rusqlite::params![cutoff.0], |row| row.get::<_, String>(0))
        .map_err(|e| AftercareError::Storage(e.to_string()))?;

    let mut ids = Vec::new();
    for row in rows {
        let raw = row.map_err(|e| AftercareError::Storage(e.to_string()))?;
        let id = Uuid::parse_str(&raw)
            .map_err(|e| AftercareError::Storage(format!("Invalid session id: {}", e)))?;
        ids.push(id);
    }
    Ok(ids)
}

pub(crate) fn list_sessions(conn: &Connection) -> Result<Vec<Session>, AftercareError> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM sessions ORDER BY updated_at DESC, created_at DESC",
            SESSION_COLUMNS
        ))
        .map_err(|e| AftercareError::Storage(e.to_string()))?;
    let rows = stmt
        .query_map([], read_row)
        .map_err(|e| AftercareError::Storage(e.to_string()))?;

    let mut raw = Vec::new();
    for row in rows {
        raw.push(row.map_err(|e| AftercareError::Storage(e.to_string()))?);
    }
    raw.into_iter().map(|r| row_to_session(conn, r)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> SessionRepository {
        let db = Arc::new(Database::in_memory().unwrap());
        SessionRepository::new(db)
    }

    #[test]
    fn test_insert_and_find() {
        let repo = setup();
        let session = Session::new(Uuid::new_v4());
        repo.insert(&session).unwrap();

        let found = repo.find_by_id(session.id).unwrap().unwrap();
        assert_eq!(found.id, session.id);
        assert_eq!(found.routing_state, RoutingState::Idle);
        assert!(found.messages.is_empty());
        assert_eq!(repo.count().unwrap(), 1);
    }

    #[test]
    fn test_find_missing_returns_none() {
        let repo = setup();
        assert!(repo.find_by_id(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_save_persists_header_and_new_messages() {
        let repo = setup();
        let mut session = Session::new(Uuid::new_v4());
        repo.insert(&session).unwrap();

        session.append(Message::customer("Where is my order #123").with_image(ImageRef("a.jpg".into())));
        session.append(Message::agent("It is on its way."));
        session.failed_resolution_attempts = 2;
        session.low_confidence_streak = 1;
        session.turns_without_resolution = 3;
        session.escalated = true;
        session.escalation_reason = Some(EscalationReason::CustomerRequest);
        session.routing_state = RoutingState::Escalated;
        session.facts.order_id = Some("123".into());
        session.facts.order_total = Some(49.5);
        repo.save(&session).unwrap();

        let found = repo.find_by_id(session.id).unwrap().unwrap();
        assert_eq!(found.messages.len(), 2);
        assert_eq!(found.messages[0].role, MessageRole::Customer);
        assert_eq!(found.messages[0].image, Some(ImageRef("a.jpg".into())));
        assert_eq!(found.messages[1].text, "It is on its way.");
        assert_eq!(found.failed_resolution_attempts, 2);
        assert_eq!(found.low_confidence_streak, 1);
        assert_eq!(found.turns_without_resolution, 3);
        assert!(found.escalated);
        assert_eq!(found.escalation_reason, Some(EscalationReason::CustomerRequest));
        assert_eq!(found.routing_state, RoutingState::Escalated);
        assert_eq!(found.facts.order_id.as_deref(), Some("123"));
        assert_eq!(found.facts.order_total, Some(49.5));
    }

    #[test]
    fn test_save_appends_without_rewriting() {
        let repo = setup();
        let mut session = Session::new(Uuid::new_v4());
        repo.insert(&session).unwrap();

        session.append(Message::customer("one"));
        repo.save(&session).unwrap();
        session.append(Message::customer("two"));
        repo.save(&session).unwrap();
        repo.save(&session).unwrap();

        let found = repo.find_by_id(session.id).unwrap().unwrap();
        let texts: Vec<_> = found.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two"]);
    }

    #[test]
    fn test_save_rejects_truncated_log() {
        let repo = setup();
        let mut session = Session::new(Uuid::new_v4());
        session.append(Message::customer("one"));
        repo.insert(&session).unwrap();

        session.messages.clear();
        assert!(matches!(repo.save(&session), Err(AftercareError::Storage(_))));
    }

    #[test]
    fn test_save_unknown_session() {
        let repo = setup();
        let session = Session::new(Uuid::new_v4());
        assert!(matches!(
            repo.save(&session),
            Err(AftercareError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_find_inactive_skips_closed_and_recent() {
        let repo = setup();

        let mut stale = Session::new(Uuid::new_v4());
        stale.updated_at = Timestamp(1_000);
        repo.insert(&stale).unwrap();

        let mut stale_closed = Session::new(Uuid::new_v4());
        stale_closed.updated_at = Timestamp(1_000);
        stale_closed.closed_at = Some(Timestamp(1_000));
        stale_closed.routing_state = RoutingState::Closed;
        repo.insert(&stale_closed).unwrap();

        let fresh = Session::new(Uuid::new_v4());
        repo.insert(&fresh).unwrap();

        let ids = repo.find_inactive(Timestamp(2_000)).unwrap();
        assert_eq!(ids, vec![stale.id]);
    }

    #[test]
    fn test_list_orders_by_recency() {
        let repo = setup();
        let mut older = Session::new(Uuid::new_v4());
        older.updated_at = Timestamp(100);
        let mut newer = Session::new(Uuid::new_v4());
        newer.updated_at = Timestamp(200);
        repo.insert(&older).unwrap();
        repo.insert(&newer).unwrap();

        let ids: Vec<_> = repo.list().unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);
    }
}
