//! API response types and formatting.
//!
//! This module defines the standard API response format used by all endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ErrorResponse, KanshiError};
use crate::supervisor::{ProcessSnapshot, ProcessState, StopOutcome};

/// Standard API response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the request was successful.
    pub success: bool,
    /// Response data (present on success).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error information (present on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,
    /// Response timestamp.
    pub timestamp: DateTime<Utc>,
}

impl<T> ApiResponse<T> {
    /// Creates a successful response with data.
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Creates a failed response with an error.
    pub fn error(error: ErrorResponse) -> ApiResponse<T> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(error),
            timestamp: Utc::now(),
        }
    }

    /// Creates a failed response from a KanshiError.
    pub fn from_error(err: &KanshiError) -> ApiResponse<T> {
        Self::error(ErrorResponse::from_error(err))
    }
}

/// Supervisor health response data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthData {
    /// Health status.
    pub status: HealthStatus,
    /// Application version.
    pub version: String,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
    /// Enabled services.
    pub services_total: usize,
    /// Enabled services currently Running.
    pub services_running: usize,
}

/// Health status enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Every enabled service is Running.
    Healthy,
    /// At least one enabled service is not Running.
    Degraded,
    /// Shutdown has begun.
    ShuttingDown,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::ShuttingDown => write!(f, "shutting_down"),
        }
    }
}

/// Service list response data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesListData {
    /// Process table snapshots in registry order.
    pub services: Vec<ProcessSnapshot>,
    /// Number of services returned.
    pub total: usize,
}

/// Lifecycle action on a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
}

impl fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceAction::Start => write!(f, "start"),
            ServiceAction::Stop => write!(f, "stop"),
            ServiceAction::Restart => write!(f, "restart"),
        }
    }
}

impl FromStr for ServiceAction {
    type Err = KanshiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "start" => Ok(ServiceAction::Start),
            "stop" => Ok(ServiceAction::Stop),
            "restart" => Ok(ServiceAction::Restart),
            _ => Err(KanshiError::invalid_request(format!("Invalid action: {}", s))),
        }
    }
}

/// Service operation response data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceOperationData {
    /// Service name.
    pub service: String,
    /// Action performed.
    pub action: ServiceAction,
    /// State before the action.
    pub previous_state: ProcessState,
    /// State after the action.
    pub current_state: ProcessState,
    /// How a stop ended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_outcome: Option<StopOutcome>,
    /// Duration in milliseconds.
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_response_success() {
        let response: ApiResponse<String> = ApiResponse::success("test data".to_string());

        assert!(response.success);
        assert_eq!(response.data, Some("test data".to_string()));
        assert!(response.error.is_none());
    }

    #[test]
    fn test_api_response_from_error() {
        use crate::error::ErrorCode;
        let response: ApiResponse<String> = ApiResponse::from_error(&KanshiError::ShuttingDown);

        assert!(!response.success);
        assert!(response.data.is_none());
        assert_eq!(response.error.unwrap().code, ErrorCode::ShuttingDown);
    }

    #[test]
    fn test_health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::ShuttingDown).unwrap(),
            "\"shutting_down\""
        );
        assert_eq!(HealthStatus::Degraded.to_string(), "degraded");
    }

    #[test]
    fn test_service_action_parse() {
        assert_eq!(
            "Restart".parse::<ServiceAction>().unwrap(),
            ServiceAction::Restart
        );
        assert_eq!(ServiceAction::Stop.to_string(), "stop");
        assert!("reload".parse::<ServiceAction>().is_err());
    }

    #[test]
    fn test_operation_data_serialization() {
        let data = ServiceOperationData {
            service: "api".to_string(),
            action: ServiceAction::Stop,
            previous_state: ProcessState::Running,
            current_state: ProcessState::Stopped,
            stop_outcome: Some(StopOutcome::Forced),
            duration_ms: 12,
        };

        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["action"], "stop");
        assert_eq!(json["previous_state"], "running");
        assert_eq!(json["stop_outcome"], "forced");
    }
}
