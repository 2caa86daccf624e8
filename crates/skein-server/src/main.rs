use skein_server::{start_server, ServerConfig};

#[tokio::main]
async fn main() {
    let config = ServerConfig {
        host: std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
        port: std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3420),
        db_path: std::env::var("SKEIN_DB_PATH").unwrap_or_else(|_| "skein.db".to_string()),
    };

    if let Err(e) = start_server(config).await {
        eprintln!("Failed to start server: {}", e);
        std::process::exit(1);
    }

    // The server runs in a background task; keep the process alive until
    // interrupted.
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
}
