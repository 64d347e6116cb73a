//! HTTP Server module - local status API.
//!
//! This module provides the optional status API for kanshi, including
//! routing, request handling, and response formatting.

pub mod handlers;
pub mod response;
pub mod state;

#[cfg(test)]
mod handlers_tests;

use axum::{
    routing::{get, post},
    Router,
};
use state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::StatusApiConfig;
use crate::error::{KanshiError, Result};

/// Creates the API router with all endpoints.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(handlers::health))
        .route("/api/v1/services", get(handlers::list_services))
        .route("/api/v1/services/:name", get(handlers::get_service))
        .route(
            "/api/v1/services/:name/start",
            post(handlers::start_service),
        )
        .route("/api/v1/services/:name/stop", post(handlers::stop_service))
        .route(
            "/api/v1/services/:name/restart",
            post(handlers::restart_service),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds the configured address.
pub async fn bind(config: &StatusApiConfig) -> Result<TcpListener> {
    let addr = SocketAddr::new(
        config
            .bind
            .parse()
            .map_err(|e| KanshiError::config(format!("Invalid bind address: {}", e)))?,
        config.port,
    );

    TcpListener::bind(addr)
        .await
        .map_err(|e| KanshiError::internal_with_source(format!("Failed to bind to {}", addr), e))
}

/// Serves the status API until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Status API listening on {}", addr);
    }

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| KanshiError::internal_with_source("Status API error", e))?;

    info!("Status API stopped");
    Ok(())
}
