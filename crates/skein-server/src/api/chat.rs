//! Chat API — /api/chat
//!
//! POST starts (or continues) a planning conversation: the thread is loaded
//! or created, one planner run is started, and the run's output stream is
//! returned as SSE with an `x-workflow-run-id` header for reattachment.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderValue;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use tokio_stream::StreamExt;

use skein_core::models::{ChatMessage, Thread, ThreadState};
use skein_core::workflows::{planner::PlanArgs, PLANNER_WORKFLOW};
use skein_core::{AppState, ServerError};

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(post_chat))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    thread_id: Option<String>,
    messages: Vec<ChatMessage>,
}

async fn post_chat(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> Result<Response, ServerError> {
    tracing::info!("incoming /api/chat");

    let thread = resolve_thread(&state, body.thread_id, &body.messages).await?;

    // Prior messages plus a thread-context note so planner tools can address
    // the right thread.
    let context = ChatMessage::system(format!("Thread Context: threadId={}", thread.id));
    let mut messages = vec![context];
    messages.extend(body.messages);

    let args = serde_json::to_value(PlanArgs {
        thread_id: thread.id.clone(),
        messages,
    })
    .map_err(|e| ServerError::Internal(format!("plan args serialization: {}", e)))?;

    let run = state.engine.start(PLANNER_WORKFLOW, args).await?;
    state.threads.set_stream(&thread.id, &run.stream_id).await?;
    tracing::info!(thread = %thread.id, run = %run.run_id, "planner run started");

    let stream = state.engine.subscribe(&run.stream_id, 0).await;
    let events = stream.map(|item| match item {
        Ok(body) => Ok::<_, Infallible>(Event::default().event("chunk").data(body)),
        Err(e) => Ok(Event::default().event("error").data(e.to_string())),
    });

    let mut response = Sse::new(events)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("ping"),
        )
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&run.run_id) {
        response.headers_mut().insert("x-workflow-run-id", value);
    }
    Ok(response)
}

/// Load the thread, or create one — honoring a client-provided id that does
/// not exist yet.
async fn resolve_thread(
    state: &AppState,
    thread_id: Option<String>,
    messages: &[ChatMessage],
) -> Result<Thread, ServerError> {
    if let Some(id) = thread_id {
        if let Some(thread) = state.threads.get(&id).await? {
            tracing::info!(thread = %id, "loaded existing thread");
            if thread.state != ThreadState::Planning {
                state.threads.update_state(&id, ThreadState::Planning).await?;
            }
            return Ok(thread);
        }
        tracing::info!(thread = %id, "thread not found, creating with provided id");
        let thread = Thread::new(id, "New Thread".to_string(), messages.to_vec());
        state.threads.save(&thread).await?;
        return Ok(thread);
    }

    let thread = Thread::new(
        uuid::Uuid::new_v4().to_string(),
        "New Thread".to_string(),
        messages.to_vec(),
    );
    state.threads.save(&thread).await?;
    tracing::info!(thread = %thread.id, "created new thread");
    Ok(thread)
}
