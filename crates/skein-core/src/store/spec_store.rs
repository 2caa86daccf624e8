use chrono::Utc;
use rusqlite::{OptionalExtension, Row};

use crate::db::Database;
use crate::error::ServerError;
use crate::models::spec::{Spec, SpecType};

#[derive(Clone)]
pub struct SpecStore {
    db: Database,
}

impl SpecStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(&self, spec: &Spec) -> Result<(), ServerError> {
        let s = spec.clone();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT INTO specs (id, thread_id, title, content, repo, spec_type, version, branch, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    rusqlite::params![
                        s.id,
                        s.thread_id,
                        s.title,
                        s.content,
                        s.repo,
                        s.spec_type.as_str(),
                        s.version,
                        s.branch,
                        s.created_at.timestamp_millis(),
                        s.updated_at.timestamp_millis(),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Spec>, ServerError> {
        let id = id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", SELECT_SPEC))?;
                stmt.query_row(rusqlite::params![id], |row| Ok(row_to_spec(row)))
                    .optional()
            })
            .await
    }

    /// Full-replace update of a draft's mutable fields. `None` leaves a field
    /// untouched.
    pub async fn update_draft(
        &self,
        id: &str,
        title: Option<String>,
        content: Option<String>,
        repo: Option<String>,
    ) -> Result<(), ServerError> {
        let id = id.to_string();
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "UPDATE specs SET
                       title = COALESCE(?1, title),
                       content = COALESCE(?2, content),
                       repo = COALESCE(?3, repo),
                       updated_at = ?4
                     WHERE id = ?5",
                    rusqlite::params![title, content, repo, now, id],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn set_branch(&self, id: &str, branch: &str) -> Result<(), ServerError> {
        let id = id.to_string();
        let branch = branch.to_string();
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "UPDATE specs SET branch = ?1, updated_at = ?2 WHERE id = ?3",
                    rusqlite::params![branch, now, id],
                )?;
                Ok(())
            })
            .await
    }

    /// The thread's draft eligible for finalize: its most recently created
    /// spec that no Job references yet. Once a Job is created against it, the
    /// thread has no draft until the planner creates a new one.
    pub async fn latest_draft(&self, thread_id: &str) -> Result<Option<Spec>, ServerError> {
        let thread_id = thread_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE thread_id = ?1
                       AND NOT EXISTS (SELECT 1 FROM jobs j WHERE j.spec_id = specs.id)
                     ORDER BY created_at DESC, rowid DESC LIMIT 1",
                    SELECT_SPEC
                ))?;
                stmt.query_row(rusqlite::params![thread_id], |row| Ok(row_to_spec(row)))
                    .optional()
            })
            .await
    }

    /// Most recent spec targeting the given branch, used to thread webhook
    /// feedback back to its conversation and to number update specs.
    pub async fn latest_on_branch(&self, branch: &str) -> Result<Option<Spec>, ServerError> {
        let branch = branch.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE branch = ?1 ORDER BY version DESC, created_at DESC LIMIT 1",
                    SELECT_SPEC
                ))?;
                stmt.query_row(rusqlite::params![branch], |row| Ok(row_to_spec(row)))
                    .optional()
            })
            .await
    }
}

const SELECT_SPEC: &str =
    "SELECT id, thread_id, title, content, repo, spec_type, version, branch, created_at, updated_at
     FROM specs";

fn row_to_spec(row: &Row<'_>) -> Spec {
    let created_ms: i64 = row.get(8).unwrap_or(0);
    let updated_ms: i64 = row.get(9).unwrap_or(0);

    Spec {
        id: row.get(0).unwrap_or_default(),
        thread_id: row.get(1).unwrap_or_default(),
        title: row.get(2).unwrap_or_default(),
        content: row.get(3).unwrap_or_default(),
        repo: row.get(4).unwrap_or_default(),
        spec_type: SpecType::from_str(&row.get::<_, String>(5).unwrap_or_default()),
        version: row.get(6).unwrap_or(1),
        branch: row.get(7).unwrap_or_default(),
        created_at: chrono::DateTime::from_timestamp_millis(created_ms).unwrap_or_else(Utc::now),
        updated_at: chrono::DateTime::from_timestamp_millis(updated_ms).unwrap_or_else(Utc::now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::Job;
    use crate::store::job_store::JobStore;

    #[tokio::test]
    async fn latest_draft_skips_specs_with_jobs() {
        let db = Database::open_in_memory().unwrap();
        let specs = SpecStore::new(db.clone());
        let jobs = JobStore::new(db);

        let first = Spec::new_draft(
            "t-1".to_string(),
            "First".to_string(),
            "# First".to_string(),
            "demo".to_string(),
        );
        specs.create(&first).await.unwrap();

        // Eligible while no job references it.
        let draft = specs.latest_draft("t-1").await.unwrap().unwrap();
        assert_eq!(draft.id, first.id);

        // Finalizing (creating a job) consumes the draft.
        jobs.create(&Job::new(first.id.clone())).await.unwrap();
        assert!(specs.latest_draft("t-1").await.unwrap().is_none());

        // A newer draft becomes eligible again.
        let second = Spec::new_draft(
            "t-1".to_string(),
            "Second".to_string(),
            "# Second".to_string(),
            "demo".to_string(),
        );
        specs.create(&second).await.unwrap();
        let draft = specs.latest_draft("t-1").await.unwrap().unwrap();
        assert_eq!(draft.id, second.id);
    }

    #[tokio::test]
    async fn latest_on_branch_prefers_highest_version() {
        let db = Database::open_in_memory().unwrap();
        let specs = SpecStore::new(db);

        let v1 = Spec::new_update(
            None,
            "U1".to_string(),
            "c1".to_string(),
            "demo".to_string(),
            "feat/autogen-abc".to_string(),
            1,
        );
        let v2 = Spec::new_update(
            None,
            "U2".to_string(),
            "c2".to_string(),
            "demo".to_string(),
            "feat/autogen-abc".to_string(),
            2,
        );
        specs.create(&v1).await.unwrap();
        specs.create(&v2).await.unwrap();

        let latest = specs
            .latest_on_branch("feat/autogen-abc")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.version, 2);
    }

    #[tokio::test]
    async fn update_draft_replaces_only_given_fields() {
        let db = Database::open_in_memory().unwrap();
        let specs = SpecStore::new(db);

        let spec = Spec::new_draft(
            "t-2".to_string(),
            "Old".to_string(),
            "old content".to_string(),
            "demo".to_string(),
        );
        specs.create(&spec).await.unwrap();

        specs
            .update_draft(&spec.id, Some("New".to_string()), None, None)
            .await
            .unwrap();

        let loaded = specs.get(&spec.id).await.unwrap().unwrap();
        assert_eq!(loaded.title, "New");
        assert_eq!(loaded.content, "old content");
    }
}
