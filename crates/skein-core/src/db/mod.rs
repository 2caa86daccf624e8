//! SQLite database layer for the Skein backend.
//!
//! Uses rusqlite with WAL mode for concurrent read performance.
//! All database operations are executed via `tokio::task::spawn_blocking`
//! to avoid blocking the async runtime.
//!
//! Every mutation in the schema below is a single-row, single-statement
//! update keyed by id; cross-row consistency is the responsibility of
//! recompute-safe workflow steps, not transactions.

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::ServerError;

/// Thread-safe handle to the SQLite database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a SQLite database at the given path.
    pub fn open(db_path: &str) -> Result<Self, ServerError> {
        let path = Path::new(db_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(db_path)
            .map_err(|e| ServerError::Database(format!("Failed to open database: {}", e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| ServerError::Database(format!("Failed to set pragmas: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_tables()?;

        tracing::info!("SQLite database opened at: {}", db_path);
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, ServerError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ServerError::Database(format!("Failed to open in-memory db: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| ServerError::Database(format!("Failed to set pragmas: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_tables()?;
        Ok(db)
    }

    /// Execute a closure with access to the database connection.
    /// Automatically handles locking and error conversion.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, ServerError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ServerError::Database(format!("Lock poisoned: {}", e)))?;
        f(&conn).map_err(|e| ServerError::Database(e.to_string()))
    }

    /// Execute a closure with access to the database connection (async-friendly).
    pub async fn with_conn_async<F, T>(&self, f: F) -> Result<T, ServerError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.with_conn(f))
            .await
            .map_err(|e| ServerError::Database(format!("Task join error: {}", e)))?
    }

    /// Create all tables if they don't exist.
    fn initialize_tables(&self) -> Result<(), ServerError> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS threads (
                    id              TEXT PRIMARY KEY,
                    title           TEXT NOT NULL,
                    state           TEXT NOT NULL DEFAULT 'planning',
                    chat            TEXT NOT NULL DEFAULT '[]',
                    stream_id       TEXT,
                    created_at      INTEGER NOT NULL,
                    updated_at      INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS specs (
                    id              TEXT PRIMARY KEY,
                    thread_id       TEXT REFERENCES threads(id) ON DELETE CASCADE,
                    title           TEXT NOT NULL,
                    content         TEXT NOT NULL,
                    repo            TEXT NOT NULL,
                    spec_type       TEXT NOT NULL DEFAULT 'initial',
                    version         INTEGER NOT NULL DEFAULT 1,
                    branch          TEXT,
                    created_at      INTEGER NOT NULL,
                    updated_at      INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_specs_thread ON specs(thread_id);
                CREATE INDEX IF NOT EXISTS idx_specs_branch ON specs(branch);

                CREATE TABLE IF NOT EXISTS jobs (
                    id              TEXT PRIMARY KEY,
                    spec_id         TEXT NOT NULL REFERENCES specs(id) ON DELETE CASCADE,
                    status          TEXT NOT NULL DEFAULT 'queued',
                    branch          TEXT,
                    pr_url          TEXT,
                    error           TEXT,
                    created_at      INTEGER NOT NULL,
                    updated_at      INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_jobs_spec ON jobs(spec_id);

                CREATE TABLE IF NOT EXISTS workflow_runs (
                    id              TEXT PRIMARY KEY,
                    workflow        TEXT NOT NULL,
                    args            TEXT NOT NULL,
                    status          TEXT NOT NULL DEFAULT 'pending',
                    stream_id       TEXT NOT NULL,
                    error           TEXT,
                    created_at      INTEGER NOT NULL,
                    updated_at      INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_runs_stream ON workflow_runs(stream_id);

                CREATE TABLE IF NOT EXISTS workflow_steps (
                    run_id          TEXT NOT NULL REFERENCES workflow_runs(id) ON DELETE CASCADE,
                    seq             INTEGER NOT NULL,
                    name            TEXT NOT NULL,
                    output          TEXT NOT NULL,
                    completed_at    INTEGER NOT NULL,
                    PRIMARY KEY (run_id, seq)
                );

                CREATE TABLE IF NOT EXISTS stream_chunks (
                    stream_id       TEXT NOT NULL,
                    seq             INTEGER NOT NULL,
                    body            TEXT NOT NULL,
                    PRIMARY KEY (stream_id, seq)
                );
                ",
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reopened_database_sees_earlier_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skein.db").to_string_lossy().to_string();

        {
            let db = Database::open(&path).unwrap();
            db.with_conn_async(|conn| {
                conn.execute(
                    "INSERT INTO threads (id, title, state, chat, created_at, updated_at)
                     VALUES ('t-1', 'T', 'planning', '[]', 0, 0)",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();
        }

        // A replacement process opens the same file and finds the row.
        let db = Database::open(&path).unwrap();
        let count: i64 = db
            .with_conn_async(|conn| {
                conn.query_row("SELECT COUNT(*) FROM threads WHERE id = 't-1'", [], |r| {
                    r.get(0)
                })
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
