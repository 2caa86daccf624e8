//! Persistence for runs, step checkpoints, and stream chunks.

use chrono::Utc;
use rusqlite::{OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::error::ServerError;

/// Externally a run is simply `running` until it reaches a terminal status;
/// suspension between steps is invisible to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Persisted description of a run: enough to re-derive a live execution on
/// any process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub id: String,
    pub workflow: String,
    pub args: serde_json::Value,
    pub status: RunStatus,
    pub stream_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl RunRecord {
    pub fn new(workflow: &str, args: serde_json::Value) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow: workflow.to_string(),
            args,
            status: RunStatus::Pending,
            stream_id: uuid::Uuid::new_v4().to_string(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One completed step's checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub seq: u32,
    pub name: String,
    pub output: serde_json::Value,
}

#[derive(Clone)]
pub struct RunStore {
    db: Database,
}

impl RunStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    // ─── Runs ───────────────────────────────────────────────────────────

    pub async fn create_run(&self, run: &RunRecord) -> Result<(), ServerError> {
        let r = run.clone();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT INTO workflow_runs (id, workflow, args, status, stream_id, error, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    rusqlite::params![
                        r.id,
                        r.workflow,
                        r.args.to_string(),
                        r.status.as_str(),
                        r.stream_id,
                        r.error,
                        r.created_at,
                        r.updated_at,
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, ServerError> {
        let run_id = run_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", SELECT_RUN))?;
                stmt.query_row(rusqlite::params![run_id], |row| Ok(row_to_run(row)))
                    .optional()
            })
            .await
    }

    pub async fn run_by_stream(&self, stream_id: &str) -> Result<Option<RunRecord>, ServerError> {
        let stream_id = stream_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!("{} WHERE stream_id = ?1", SELECT_RUN))?;
                stmt.query_row(rusqlite::params![stream_id], |row| Ok(row_to_run(row)))
                    .optional()
            })
            .await
    }

    pub async fn update_status(
        &self,
        run_id: &str,
        status: RunStatus,
        error: Option<String>,
    ) -> Result<(), ServerError> {
        let run_id = run_id.to_string();
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "UPDATE workflow_runs SET status = ?1, error = ?2, updated_at = ?3 WHERE id = ?4",
                    rusqlite::params![status.as_str(), error, now, run_id],
                )?;
                Ok(())
            })
            .await
    }

    // ─── Step checkpoints ───────────────────────────────────────────────

    /// Record a completed step. `INSERT OR REPLACE` keeps a crashed write
    /// retry harmless.
    pub async fn save_step(
        &self,
        run_id: &str,
        seq: u32,
        name: &str,
        output: &serde_json::Value,
    ) -> Result<(), ServerError> {
        let run_id = run_id.to_string();
        let name = name.to_string();
        let output = output.to_string();
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO workflow_steps (run_id, seq, name, output, completed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![run_id, seq, name, output, now],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn load_steps(&self, run_id: &str) -> Result<Vec<StepRecord>, ServerError> {
        let run_id = run_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT seq, name, output FROM workflow_steps WHERE run_id = ?1 ORDER BY seq ASC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![run_id], |row| {
                        let output_str: String = row.get(2)?;
                        Ok(StepRecord {
                            seq: row.get(0)?,
                            name: row.get(1)?,
                            output: serde_json::from_str(&output_str)
                                .unwrap_or(serde_json::Value::Null),
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    // ─── Stream chunks ──────────────────────────────────────────────────

    pub async fn append_chunk(
        &self,
        stream_id: &str,
        seq: u64,
        body: &str,
    ) -> Result<(), ServerError> {
        let stream_id = stream_id.to_string();
        let body = body.to_string();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO stream_chunks (stream_id, seq, body) VALUES (?1, ?2, ?3)",
                    rusqlite::params![stream_id, seq as i64, body],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn chunks_from(
        &self,
        stream_id: &str,
        start: u64,
    ) -> Result<Vec<(u64, String)>, ServerError> {
        let stream_id = stream_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT seq, body FROM stream_chunks
                     WHERE stream_id = ?1 AND seq >= ?2 ORDER BY seq ASC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![stream_id, start as i64], |row| {
                        Ok((row.get::<_, i64>(0)? as u64, row.get::<_, String>(1)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    pub async fn chunk_count(&self, stream_id: &str) -> Result<u64, ServerError> {
        let stream_id = stream_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM stream_chunks WHERE stream_id = ?1",
                    rusqlite::params![stream_id],
                    |row| row.get(0),
                )?;
                Ok(count as u64)
            })
            .await
    }
}

const SELECT_RUN: &str =
    "SELECT id, workflow, args, status, stream_id, error, created_at, updated_at
     FROM workflow_runs";

fn row_to_run(row: &Row<'_>) -> RunRecord {
    let args_str: String = row.get(2).unwrap_or_default();
    RunRecord {
        id: row.get(0).unwrap_or_default(),
        workflow: row.get(1).unwrap_or_default(),
        args: serde_json::from_str(&args_str).unwrap_or(serde_json::Value::Null),
        status: RunStatus::from_str(&row.get::<_, String>(3).unwrap_or_default()),
        stream_id: row.get(4).unwrap_or_default(),
        error: row.get(5).unwrap_or_default(),
        created_at: row.get(6).unwrap_or(0),
        updated_at: row.get(7).unwrap_or(0),
    }
}
