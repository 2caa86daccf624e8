//! Thread API — /api/thread/{id} and /api/threads
//!
//! CRUD over conversation threads plus the stream-reattach endpoint:
//! `GET /api/thread/{id}/stream?startIndex=` resolves thread → stream → run
//! output and replays from the requested offset.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tokio_stream::StreamExt;

use skein_core::models::Thread;
use skein_core::{AppState, ServerError};

pub fn thread_router() -> Router<AppState> {
    Router::new()
        .route("/{id}", get(get_thread).put(rename_thread).delete(delete_thread))
        .route("/{id}/stream", get(get_thread_stream))
}

pub fn threads_router() -> Router<AppState> {
    Router::new().route("/", get(list_threads))
}

async fn list_threads(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let threads = state.threads.list().await?;
    Ok(Json(serde_json::json!({ "threads": threads })))
}

async fn get_thread(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Thread>, ServerError> {
    state
        .threads
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ServerError::NotFound(format!("Thread {} not found", id)))
}

#[derive(Debug, Deserialize)]
struct RenameRequest {
    title: String,
}

async fn rename_thread(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RenameRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let title = body.title.trim();
    if title.is_empty() {
        return Err(ServerError::BadRequest("Invalid title".to_string()));
    }

    if state.threads.get(&id).await?.is_none() {
        return Err(ServerError::NotFound("Thread not found".to_string()));
    }

    state.threads.update_title(&id, title).await?;
    Ok(Json(serde_json::json!({ "id": id, "title": title })))
}

async fn delete_thread(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    if state.threads.get(&id).await?.is_none() {
        return Err(ServerError::NotFound(format!("Thread {} not found", id)));
    }
    state.threads.delete(&id).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamQuery {
    start_index: Option<u64>,
}

async fn get_thread_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>, ServerError> {
    let thread = state
        .threads
        .get(&id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("Thread {} not found", id)))?;
    let stream_id = thread
        .stream_id
        .ok_or_else(|| ServerError::NotFound(format!("Thread {} has no stream", id)))?;

    let start_index = query.start_index.unwrap_or(0);
    let stream = state.engine.subscribe(&stream_id, start_index).await;
    let events = stream.map(|item| match item {
        Ok(body) => Ok::<_, Infallible>(Event::default().event("chunk").data(body)),
        Err(e) => Ok(Event::default().event("error").data(e.to_string())),
    });

    Ok(Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    ))
}
