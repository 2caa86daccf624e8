pub mod chat;
pub mod jobs;
pub mod threads;
pub mod webhooks;

use axum::Router;

use skein_core::AppState;

/// Build the complete API router with all sub-routes.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/api/chat", chat::router())
        .nest("/api/thread", threads::thread_router())
        .nest("/api/threads", threads::threads_router())
        .nest("/api/job", jobs::router())
        .nest("/api/webhook", webhooks::router())
}
