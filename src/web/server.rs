//! Axum web server setup and configuration

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use super::routes::create_routes;
use super::AppState;
use crate::config::Config;

/// Start the Axum web server
pub async fn start_server(state: AppState, config: Arc<Config>) -> Result<()> {
    let app = create_app(state);

    let host = config.api_host.as_deref().unwrap_or("127.0.0.1");
    let port = config.api_port.unwrap_or(3000);
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .context("Invalid API_HOST or API_PORT")?;

    info!("Starting API server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}

/// Create the Axum router without starting the server
pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    create_routes(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
