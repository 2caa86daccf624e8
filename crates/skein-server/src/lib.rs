//! Skein Server — HTTP adapter for the Skein pipeline.
//!
//! A standalone Rust backend exposing the planner/worker pipeline over a
//! RESTful HTTP API via axum, with SSE streaming of workflow run output.
//! All domain logic lives in `skein-core`; this crate is routing, request
//! shaping, and server bootstrap.

pub mod api;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use skein_core::{AppState, AppStateInner, Database};

/// Configuration for the Skein backend server.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3420,
            db_path: "skein.db".to_string(),
        }
    }
}

/// Create a shared `AppState` from a database path.
pub fn create_app_state(db_path: &str) -> Result<AppState, String> {
    let db = Database::open(db_path).map_err(|e| format!("Failed to open database: {}", e))?;
    Ok(Arc::new(AppStateInner::new(db)))
}

/// Build the full application router for the given state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api::api_router())
        .route("/api/health", axum::routing::get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the backend server. Returns the actual address it listens on.
pub async fn start_server(config: ServerConfig) -> Result<SocketAddr, String> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skein_server=info,skein_core=info,tower_http=info".into()),
        )
        .init();

    tracing::info!(
        "Starting Skein backend server on {}:{}",
        config.host,
        config.port
    );

    let state = create_app_state(&config.db_path)?;
    start_server_with_state(config, state).await
}

/// Start the HTTP server with a pre-built `AppState`.
pub async fn start_server_with_state(
    config: ServerConfig,
    state: AppState,
) -> Result<SocketAddr, String> {
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| format!("Invalid address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind to {}: {}", addr, e))?;

    let local_addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to get local address: {}", e))?;

    tracing::info!("Skein backend server listening on {}", local_addr);

    // Spawn the server in a background task
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok(local_addr)
}

async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "server": "skein-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
