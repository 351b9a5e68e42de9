//! Database schema migrations.
//!
//! Version 1 creates the sessions and messages tables. Version 2 adds the
//! turns-without-resolution counter.

use rusqlite::Connection;
use tracing::info;

use aftercare_core::error::AftercareError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), AftercareError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| AftercareError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| AftercareError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: session_schema");
    }

    if current_version < 2 {
        apply_v2(conn)?;
        info!("Applied migration v2: turns_without_resolution");
    }

    Ok(())
}

fn apply_v1(conn: &Connection) -> Result<(), AftercareError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sessions (
            id                      TEXT PRIMARY KEY NOT NULL,
            routing_state           TEXT NOT NULL DEFAULT 'idle'
                                    CHECK (routing_state IN ('idle', 'classifying', 'dispatching',
                                        'awaiting', 'composing', 'escalated', 'closed')),
            failed_attempts         INTEGER NOT NULL DEFAULT 0,
            low_confidence_streak   INTEGER NOT NULL DEFAULT 0,
            escalated               INTEGER NOT NULL DEFAULT 0,
            escalation_reason       TEXT,
            facts                   TEXT NOT NULL DEFAULT '{}',
            created_at              INTEGER NOT NULL,
            updated_at              INTEGER NOT NULL,
            closed_at               INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_updated
            ON sessions (updated_at DESC);

        CREATE INDEX IF NOT EXISTS idx_sessions_open
            ON sessions (updated_at ASC)
            WHERE closed_at IS NULL;

        -- Append-only message log; seq is the position within the session.
        CREATE TABLE IF NOT EXISTS messages (
            session_id  TEXT NOT NULL,
            seq         INTEGER NOT NULL,
            role        TEXT NOT NULL CHECK (role IN ('customer', 'agent', 'system')),
            text        TEXT NOT NULL DEFAULT '',
            image_ref   TEXT,
            created_at  INTEGER NOT NULL,
            PRIMARY KEY (session_id, seq),
            FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
        );

        INSERT INTO schema_migrations (version, name) VALUES (1, 'session_schema');
        ",
    )
    .map_err(|e| AftercareError::Storage(format!("Migration v1 failed: {}", e)))?;

    Ok(())
}

fn apply_v2(conn: &Connection) -> Result<(), AftercareError> {
    conn.execute_batch(
        "
        ALTER TABLE sessions
            ADD COLUMN turns_without_resolution INTEGER NOT NULL DEFAULT 0;

        INSERT INTO schema_migrations (version, name) VALUES (2, 'turns_without_resolution');
        ",
    )
    .map_err(|e| AftercareError::Storage(format!("Migration v2 failed: {}", e)))?;

    Ok(())
}
