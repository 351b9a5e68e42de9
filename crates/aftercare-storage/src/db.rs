//! Database connection management.
//!
//! One rusqlite Connection behind a Mutex, opened in WAL mode.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

use aftercare_core::error::AftercareError;

use crate::migrations;

/// Thread-safe SQLite database wrapper.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path and run pending migrations.
    pub fn new(path: &Path) -> Result<Self, AftercareError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AftercareError::Storage(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| AftercareError::Storage(format!("Failed to set pragmas: {}", e)))?;

        info!("Database opened at {}", path.display());
        Self::from_connection(conn)
    }

    /// Open an in-memory database (tests and demo mode).
    pub fn in_memory() -> Result<Self, AftercareError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AftercareError::Storage(format!("Failed to open in-memory db: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| AftercareError::Storage(format!("Failed to set pragmas: {}", e)))?;

        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, AftercareError> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Execute a closure with the underlying connection.
    ///
    /// The mutex is held for the duration of the closure, so everything the
    /// closure does is serialised against other callers.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, AftercareError>
    where
        F: FnOnce(&Connection) -> Result<T, AftercareError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| AftercareError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}
