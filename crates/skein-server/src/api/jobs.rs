//! Job API — /api/job/{id}
//!
//! PUT manually (re)starts the worker workflow for a job, e.g. for jobs
//! queued by webhook feedback or after a failure the user wants retried.

use axum::extract::{Path, State};
use axum::routing::put;
use axum::{Json, Router};

use skein_core::workflows::WORKER_WORKFLOW;
use skein_core::{AppState, ServerError};

pub fn router() -> Router<AppState> {
    Router::new().route("/{id}", put(trigger_job))
}

async fn trigger_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    if state.jobs.get(&id).await?.is_none() {
        return Err(ServerError::NotFound(format!("Job {} not found", id)));
    }

    let run = state
        .engine
        .start(WORKER_WORKFLOW, serde_json::json!({ "jobId": id }))
        .await?;
    tracing::info!(job = %id, run = %run.run_id, "worker run started");

    Ok(Json(serde_json::json!({ "jobId": id, "runId": run.run_id })))
}
