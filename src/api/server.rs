use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    check_results, create_channel, create_check, delete_channel, delete_check, dispatch_event,
    edit_channel, get_channel, get_check, health_check, list_channels, list_checks, list_logs,
    log_stats, retry_log, run_check, test_channel, toggle_channel, update_check, AppState,
};
use crate::monitor::{Monitor, MonitorConfig};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub monitor: MonitorConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            monitor: MonitorConfig::default(),
        }
    }
}

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Health checks
        .route("/checks", get(list_checks).post(create_check))
        .route(
            "/checks/:id",
            get(get_check).put(update_check).delete(delete_check),
        )
        .route("/checks/:id/run", post(run_check))
        .route("/checks/:id/results", get(check_results))
        // Channels
        .route("/channels", get(list_channels).post(create_channel))
        .route(
            "/channels/:id",
            get(get_channel).put(edit_channel).delete(delete_channel),
        )
        .route("/channels/:id/toggle", post(toggle_channel))
        .route("/channels/:id/test", post(test_channel))
        // Events and delivery log
        .route("/events", post(dispatch_event))
        .route("/notification-logs", get(list_logs))
        .route("/notification-logs/stats", get(log_stats))
        .route("/notification-logs/:id/retry", post(retry_log))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run_server(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let monitor = Arc::new(Monitor::in_memory(config.monitor.clone())?);
    monitor.start();

    let state = Arc::new(AppState {
        monitor: Arc::clone(&monitor),
    });
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Starting healthwatch server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&monitor)))
        .await?;

    tracing::info!("healthwatch server stopped");
    Ok(())
}

async fn shutdown_signal(monitor: Arc<Monitor>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C signal handler");
        std::future::pending::<()>().await;
    }

    tracing::info!("Shutdown signal received, stopping monitor...");
    monitor.shutdown();
}
