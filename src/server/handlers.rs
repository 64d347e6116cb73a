//! HTTP request handlers.
//!
//! This module contains all the HTTP endpoint handlers for the status API.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use crate::error::KanshiError;
use crate::server::response::{
    ApiResponse, HealthData, HealthStatus, ServiceAction, ServiceOperationData, ServicesListData,
};
use crate::server::state::AppState;
use crate::supervisor::{ProcessSnapshot, ProcessState};

/// Version string for the application.
const VERSION: &str = env!("CARGO_PKG_VERSION");

fn status_code(err: &KanshiError) -> StatusCode {
    StatusCode::from_u16(err.code().http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn failure<T>(state: &AppState, err: &KanshiError) -> (StatusCode, Json<ApiResponse<T>>) {
    state.increment_failed();
    (status_code(err), Json(ApiResponse::from_error(err)))
}

/// Health check handler.
///
/// GET /api/v1/health
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.increment_requests();

    let supervisor = &state.supervisor;
    let snapshots = supervisor.snapshots();
    let enabled: Vec<&ProcessSnapshot> = snapshots
        .iter()
        .filter(|s| supervisor.registry().get(&s.name).is_some_and(|d| d.enabled))
        .collect();
    let running = enabled
        .iter()
        .filter(|s| s.state == ProcessState::Running)
        .count();

    let status = if supervisor.is_shutting_down() {
        HealthStatus::ShuttingDown
    } else if running == enabled.len() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    };

    let data = HealthData {
        status,
        version: VERSION.to_string(),
        uptime_seconds: state.uptime_seconds(),
        services_total: enabled.len(),
        services_running: running,
    };

    let code = match status {
        HealthStatus::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (code, Json(ApiResponse::success(data)))
}

/// Query parameters for listing services.
#[derive(Debug, Deserialize)]
pub struct ListServicesQuery {
    /// Filter by state.
    pub state: Option<String>,
}

/// List services handler.
///
/// GET /api/v1/services
pub async fn list_services(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListServicesQuery>,
) -> impl IntoResponse {
    state.increment_requests();

    let services: Vec<ProcessSnapshot> = state
        .supervisor
        .snapshots()
        .into_iter()
        .filter(|s| {
            query
                .state
                .as_deref()
                .map_or(true, |wanted| s.state.to_string() == wanted)
        })
        .collect();

    let data = ServicesListData {
        total: services.len(),
        services,
    };
    (StatusCode::OK, Json(ApiResponse::success(data)))
}

/// Get service details handler.
///
/// GET /api/v1/services/:name
pub async fn get_service(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    state.increment_requests();

    match state.supervisor.snapshot(&name) {
        Some(snapshot) => (StatusCode::OK, Json(ApiResponse::success(snapshot))),
        None => failure(&state, &KanshiError::not_found(name)),
    }
}

/// Start service handler.
///
/// POST /api/v1/services/:name/start
pub async fn start_service(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    service_action(state, name, ServiceAction::Start).await
}

/// Stop service handler.
///
/// POST /api/v1/services/:name/stop
pub async fn stop_service(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    service_action(state, name, ServiceAction::Stop).await
}

/// Restart service handler.
///
/// POST /api/v1/services/:name/restart
pub async fn restart_service(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    service_action(state, name, ServiceAction::Restart).await
}

/// Common service action handler.
async fn service_action(
    state: Arc<AppState>,
    service: String,
    action: ServiceAction,
) -> (StatusCode, Json<ApiResponse<ServiceOperationData>>) {
    state.increment_requests();

    let Some(previous) = state.supervisor.snapshot(&service) else {
        return failure(&state, &KanshiError::not_found(service));
    };
    if state.supervisor.is_shutting_down() {
        return failure(&state, &KanshiError::ShuttingDown);
    }

    info!(service = %service, action = %action, "Processing service action");
    let started = Instant::now();

    let result = match action {
        ServiceAction::Start => state.handle.start(service.as_str()).await.map(|()| None),
        ServiceAction::Stop => state.handle.stop(service.as_str()).await.map(Some),
        ServiceAction::Restart => state.handle.restart(service.as_str()).await.map(|()| None),
    };

    match result {
        Ok(stop_outcome) => {
            let current_state = state
                .supervisor
                .snapshot(&service)
                .map(|s| s.state)
                .unwrap_or(ProcessState::Stopped);
            let data = ServiceOperationData {
                service,
                action,
                previous_state: previous.state,
                current_state,
                stop_outcome,
                duration_ms: started.elapsed().as_millis() as u64,
            };
            (StatusCode::OK, Json(ApiResponse::success(data)))
        }
        Err(err) => {
            error!(service = %service, action = %action, error = %err, "Service action failed");
            failure(&state, &err)
        }
    }
}
