use chrono::Utc;
use rusqlite::{OptionalExtension, Row};

use crate::db::Database;
use crate::error::ServerError;
use crate::models::job::{Job, JobStatus};

#[derive(Clone)]
pub struct JobStore {
    db: Database,
}

impl JobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(&self, job: &Job) -> Result<(), ServerError> {
        let j = job.clone();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT INTO jobs (id, spec_id, status, branch, pr_url, error, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    rusqlite::params![
                        j.id,
                        j.spec_id,
                        j.status.as_str(),
                        j.branch,
                        j.pr_url,
                        j.error,
                        j.created_at.timestamp_millis(),
                        j.updated_at.timestamp_millis(),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Job>, ServerError> {
        let id = id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, spec_id, status, branch, pr_url, error, created_at, updated_at
                     FROM jobs WHERE id = ?1",
                )?;
                stmt.query_row(rusqlite::params![id], |row| Ok(row_to_job(row)))
                    .optional()
            })
            .await
    }

    pub async fn update_status(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<(), ServerError> {
        let id = id.to_string();
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "UPDATE jobs SET status = ?1, error = ?2, updated_at = ?3 WHERE id = ?4",
                    rusqlite::params![status.as_str(), error, now, id],
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
                    "UPDATE jobs SET branch = ?1, updated_at = ?2 WHERE id = ?3",
                    rusqlite::params![branch, now, id],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn set_pr(&self, id: &str, pr_url: &str, status: JobStatus) -> Result<(), ServerError> {
        let id = id.to_string();
        let pr_url = pr_url.to_string();
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "UPDATE jobs SET pr_url = ?1, status = ?2, updated_at = ?3 WHERE id = ?4",
                    rusqlite::params![pr_url, status.as_str(), now, id],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn list_by_spec(&self, spec_id: &str) -> Result<Vec<Job>, ServerError> {
        let spec_id = spec_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, spec_id, status, branch, pr_url, error, created_at, updated_at
                     FROM jobs WHERE spec_id = ?1 ORDER BY created_at DESC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![spec_id], |row| Ok(row_to_job(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }
}

fn row_to_job(row: &Row<'_>) -> Job {
    let created_ms: i64 = row.get(6).unwrap_or(0);
    let updated_ms: i64 = row.get(7).unwrap_or(0);

    Job {
        id: row.get(0).unwrap_or_default(),
        spec_id: row.get(1).unwrap_or_default(),
        status: JobStatus::from_str(&row.get::<_, String>(2).unwrap_or_default()),
        branch: row.get(3).unwrap_or_default(),
        pr_url: row.get(4).unwrap_or_default(),
        error: row.get(5).unwrap_or_default(),
        created_at: chrono::DateTime::from_timestamp_millis(created_ms).unwrap_or_else(Utc::now),
        updated_at: chrono::DateTime::from_timestamp_millis(updated_ms).unwrap_or_else(Utc::now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::spec::Spec;
    use crate::store::spec_store::SpecStore;

    async fn seed_spec(db: &Database) -> Spec {
        let specs = SpecStore::new(db.clone());
        let spec = Spec::new_draft(
            "t-1".to_string(),
            "S".to_string(),
            "# S".to_string(),
            "demo".to_string(),
        );
        specs.create(&spec).await.unwrap();
        spec
    }

    #[tokio::test]
    async fn status_transitions_persist_error_message() {
        let db = Database::open_in_memory().unwrap();
        let spec = seed_spec(&db).await;
        let jobs = JobStore::new(db);

        let job = Job::new(spec.id);
        jobs.create(&job).await.unwrap();

        jobs.update_status(&job.id, JobStatus::Apply, None)
            .await
            .unwrap();
        jobs.update_status(&job.id, JobStatus::Failed, Some("sandbox timeout".to_string()))
            .await
            .unwrap();

        let loaded = jobs.get(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Failed);
        assert!(loaded.status.is_terminal());
        assert_eq!(loaded.error.as_deref(), Some("sandbox timeout"));
    }

    #[tokio::test]
    async fn set_pr_records_url_and_status() {
        let db = Database::open_in_memory().unwrap();
        let spec = seed_spec(&db).await;
        let jobs = JobStore::new(db);

        let job = Job::new(spec.id);
        jobs.create(&job).await.unwrap();
        jobs.set_pr(&job.id, "https://github.com/x/y/pull/1", JobStatus::PrOpen)
            .await
            .unwrap();

        let loaded = jobs.get(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::PrOpen);
        assert_eq!(loaded.pr_url.as_deref(), Some("https://github.com/x/y/pull/1"));
    }
}
