//! Error types and error handling for kanshi.
//!
//! This module defines all error types used throughout the supervisor,
//! including error codes for the status API and CLI exit codes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::validator::Violation;

/// Stable error codes reported by the status API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// E001: Configuration is invalid
    #[serde(rename = "E001")]
    ConfigInvalid,

    /// E002: Service does not exist
    #[serde(rename = "E002")]
    ServiceNotFound,

    /// E003: Pre-flight validation failed
    #[serde(rename = "E003")]
    ValidationFailed,

    /// E004: Process could not be started
    #[serde(rename = "E004")]
    StartFailed,

    /// E005: Operation timed out
    #[serde(rename = "E005")]
    Timeout,

    /// E006: Failed to connect to a supervisor
    #[serde(rename = "E006")]
    ConnectionError,

    /// E007: Health probe failed
    #[serde(rename = "E007")]
    ProbeFailed,

    /// E008: Request is invalid
    #[serde(rename = "E008")]
    InvalidRequest,

    /// E009: Supervisor is shutting down
    #[serde(rename = "E009")]
    ShuttingDown,

    /// E010: Internal failure
    #[serde(rename = "E010")]
    Internal,
}

impl ErrorCode {
    /// Returns the error code as a string (e.g., "E001").
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigInvalid => "E001",
            ErrorCode::ServiceNotFound => "E002",
            ErrorCode::ValidationFailed => "E003",
            ErrorCode::StartFailed => "E004",
            ErrorCode::Timeout => "E005",
            ErrorCode::ConnectionError => "E006",
            ErrorCode::ProbeFailed => "E007",
            ErrorCode::InvalidRequest => "E008",
            ErrorCode::ShuttingDown => "E009",
            ErrorCode::Internal => "E010",
        }
    }

    /// Returns the HTTP status code for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::ConfigInvalid => 500,
            ErrorCode::ServiceNotFound => 404,
            ErrorCode::ValidationFailed => 500,
            ErrorCode::StartFailed => 500,
            ErrorCode::Timeout => 504,
            ErrorCode::ConnectionError => 502,
            ErrorCode::ProbeFailed => 500,
            ErrorCode::InvalidRequest => 400,
            ErrorCode::ShuttingDown => 503,
            ErrorCode::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Process exit codes.
pub mod exit_code {
    /// Clean shutdown after a successful run
    pub const SUCCESS: i32 = 0;
    /// Configuration or pre-flight validation failure; nothing was spawned
    pub const VALIDATION_FAILURE: i32 = 1;
    /// One or more services failed to reach Running during start-up
    pub const START_FAILURE: i32 = 2;
    /// Shutdown finished but at least one process had to be force-killed
    pub const FORCED_SHUTDOWN: i32 = 3;
    /// General runtime error
    pub const GENERAL_ERROR: i32 = 4;
    /// A critical service failed permanently and brought the supervisor down
    pub const CRITICAL_FAILURE: i32 = 5;
    /// Command line argument error
    pub const CLI_ERROR: i32 = 64;
}

/// A single service that did not come up during `start_all`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartFailure {
    /// Service name.
    pub service: String,
    /// Human readable cause.
    pub cause: String,
}

impl fmt::Display for StartFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.service, self.cause)
    }
}

/// The main error type for kanshi.
#[derive(Debug, Error)]
pub enum KanshiError {
    /// Configuration is invalid or cannot be loaded.
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Pre-flight validation reported one or more violations.
    #[error("Validation failed with {} violation(s)", .violations.len())]
    Validation { violations: Vec<Violation> },

    /// The OS refused to launch the process.
    #[error("Failed to spawn service '{service}': {source}")]
    Spawn {
        service: String,
        #[source]
        source: std::io::Error,
    },

    /// The process stayed alive but never confirmed readiness.
    #[error("Service '{service}' did not become ready within {seconds}s")]
    ReadinessTimeout {
        service: String,
        seconds: u64,
        output: Vec<String>,
    },

    /// The process exited while it was expected to come up.
    #[error("Service '{service}' exited during start-up ({status})")]
    ServiceExited {
        service: String,
        status: String,
        output: Vec<String>,
    },

    /// A dependency was not Running when the service was due to start.
    #[error("Service '{service}' cannot start: dependency '{dependency}' is not running")]
    DependencyNotRunning { service: String, dependency: String },

    /// `start_all` failed for at least one service.
    #[error("{} service(s) failed to start: {}", .failures.len(), join_failures(.failures))]
    StartFailed { failures: Vec<StartFailure> },

    /// A health probe failed.
    #[error("Probe failed for service '{service}': {message}")]
    Probe { service: String, message: String },

    /// Target service does not exist.
    #[error("Service not found: {service}")]
    ServiceNotFound { service: String },

    /// The supervisor no longer accepts lifecycle commands.
    #[error("Supervisor is shutting down")]
    ShuttingDown,

    /// A blocking wait was interrupted by shutdown.
    #[error("Start of service '{service}' was cancelled")]
    Cancelled { service: String },

    /// Failed to reach a supervisor's status API.
    #[error("Connection error: {target}")]
    Connection {
        target: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A remote supervisor answered with an error response.
    #[error("[{code}] {message}")]
    Remote { code: ErrorCode, message: String },

    /// Request is invalid.
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Unexpected internal failure.
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parsing error.
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

fn join_failures(failures: &[StartFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl KanshiError {
    /// Returns the error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            KanshiError::Config { .. } | KanshiError::Yaml(_) => ErrorCode::ConfigInvalid,
            KanshiError::Validation { .. } => ErrorCode::ValidationFailed,
            KanshiError::Spawn { .. }
            | KanshiError::ServiceExited { .. }
            | KanshiError::DependencyNotRunning { .. }
            | KanshiError::StartFailed { .. } => ErrorCode::StartFailed,
            KanshiError::ReadinessTimeout { .. } => ErrorCode::Timeout,
            KanshiError::Probe { .. } => ErrorCode::ProbeFailed,
            KanshiError::ServiceNotFound { .. } => ErrorCode::ServiceNotFound,
            KanshiError::ShuttingDown | KanshiError::Cancelled { .. } => ErrorCode::ShuttingDown,
            KanshiError::Connection { .. } => ErrorCode::ConnectionError,
            KanshiError::Remote { code, .. } => *code,
            KanshiError::InvalidRequest { .. } | KanshiError::Json(_) => ErrorCode::InvalidRequest,
            KanshiError::Internal { .. } | KanshiError::Io(_) => ErrorCode::Internal,
        }
    }

    /// Returns the process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            KanshiError::Config { .. } | KanshiError::Yaml(_) | KanshiError::Validation { .. } => {
                exit_code::VALIDATION_FAILURE
            }
            KanshiError::Spawn { .. }
            | KanshiError::ReadinessTimeout { .. }
            | KanshiError::ServiceExited { .. }
            | KanshiError::DependencyNotRunning { .. }
            | KanshiError::StartFailed { .. } => exit_code::START_FAILURE,
            _ => exit_code::GENERAL_ERROR,
        }
    }

    /// Captured child output attached to a start failure, if any.
    pub fn output(&self) -> &[String] {
        match self {
            KanshiError::ReadinessTimeout { output, .. }
            | KanshiError::ServiceExited { output, .. } => output,
            _ => &[],
        }
    }

    /// Creates a configuration error with a message.
    pub fn config(message: impl Into<String>) -> Self {
        KanshiError::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a configuration error with a message and source.
    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        KanshiError::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates an internal error with a message.
    pub fn internal(message: impl Into<String>) -> Self {
        KanshiError::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an internal error with a message and source.
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        KanshiError::Internal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a connection error.
    pub fn connection(target: impl Into<String>) -> Self {
        KanshiError::Connection {
            target: target.into(),
            source: None,
        }
    }

    /// Creates a connection error with a source.
    pub fn connection_with_source(
        target: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        KanshiError::Connection {
            target: target.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a service-not-found error.
    pub fn not_found(service: impl Into<String>) -> Self {
        KanshiError::ServiceNotFound {
            service: service.into(),
        }
    }

    /// Creates an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        KanshiError::InvalidRequest {
            message: message.into(),
        }
    }
}

/// Error details for API responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context fields.
    #[serde(flatten)]
    pub fields: HashMap<String, serde_json::Value>,
}

impl ErrorDetails {
    /// Creates empty error details.
    pub fn new() -> Self {
        Self {
            fields: HashMap::new(),
        }
    }

    /// Adds a field to the error details.
    pub fn with_field(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

impl Default for ErrorDetails {
    fn default() -> Self {
        Self::new()
    }
}

/// Error response structure for the status API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code (e.g., "E001").
    pub code: ErrorCode,

    /// Human-readable error message.
    pub message: String,

    /// Additional error details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
}

impl ErrorResponse {
    /// Creates a new error response.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Creates an error response from a KanshiError.
    pub fn from_error(error: &KanshiError) -> Self {
        let details = match error {
            KanshiError::ServiceNotFound { service } => Some(
                ErrorDetails::new()
                    .with_field("service", service.clone())
                    .with_field("suggestion", "Check the services section of the configuration"),
            ),
            KanshiError::ReadinessTimeout {
                service,
                seconds,
                output,
            } => Some(
                ErrorDetails::new()
                    .with_field("service", service.clone())
                    .with_field("timeout_seconds", *seconds)
                    .with_field("output", output.clone()),
            ),
            KanshiError::ServiceExited {
                service, output, ..
            } => Some(
                ErrorDetails::new()
                    .with_field("service", service.clone())
                    .with_field("output", output.clone()),
            ),
            KanshiError::DependencyNotRunning {
                service,
                dependency,
            } => Some(
                ErrorDetails::new()
                    .with_field("service", service.clone())
                    .with_field("dependency", dependency.clone()),
            ),
            KanshiError::Spawn { service, .. } | KanshiError::Cancelled { service } => {
                Some(ErrorDetails::new().with_field("service", service.clone()))
            }
            _ => None,
        };

        Self {
            code: error.code(),
            message: error.to_string(),
            details,
        }
    }
}

/// Result type alias for kanshi operations.
pub type Result<T> = std::result::Result<T, KanshiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::ViolationKind;

    #[test]
    fn test_error_code_as_str() {
        assert_eq!(ErrorCode::ConfigInvalid.as_str(), "E001");
        assert_eq!(ErrorCode::ServiceNotFound.as_str(), "E002");
        assert_eq!(ErrorCode::ShuttingDown.as_str(), "E009");
        assert_eq!(ErrorCode::Internal.as_str(), "E010");
    }

    #[test]
    fn test_error_code_http_status() {
        assert_eq!(ErrorCode::ServiceNotFound.http_status(), 404);
        assert_eq!(ErrorCode::InvalidRequest.http_status(), 400);
        assert_eq!(ErrorCode::ShuttingDown.http_status(), 503);
        assert_eq!(ErrorCode::Timeout.http_status(), 504);
    }

    #[test]
    fn test_exit_codes_follow_taxonomy() {
        assert_eq!(
            KanshiError::config("cycle").exit_code(),
            exit_code::VALIDATION_FAILURE
        );

        let err = KanshiError::Validation {
            violations: vec![Violation::new(
                Some("api"),
                ViolationKind::MissingEnv,
                "DATABASE_URL is not set",
            )],
        };
        assert_eq!(err.exit_code(), exit_code::VALIDATION_FAILURE);

        let err = KanshiError::StartFailed {
            failures: vec![StartFailure {
                service: "api".to_string(),
                cause: "exited".to_string(),
            }],
        };
        assert_eq!(err.exit_code(), exit_code::START_FAILURE);

        let err = KanshiError::ReadinessTimeout {
            service: "api".to_string(),
            seconds: 5,
            output: vec![],
        };
        assert_eq!(err.exit_code(), exit_code::START_FAILURE);

        assert_eq!(
            KanshiError::connection("127.0.0.1:7070").exit_code(),
            exit_code::GENERAL_ERROR
        );
    }

    #[test]
    fn test_start_failed_display_names_every_service() {
        let err = KanshiError::StartFailed {
            failures: vec![
                StartFailure {
                    service: "broker".to_string(),
                    cause: "spawn failed".to_string(),
                },
                StartFailure {
                    service: "api".to_string(),
                    cause: "dependency 'broker' is not running".to_string(),
                },
            ],
        };
        let message = err.to_string();
        assert!(message.starts_with("2 service(s) failed to start"));
        assert!(message.contains("broker: spawn failed"));
        assert!(message.contains("api: dependency"));
    }

    #[test]
    fn test_error_response_carries_output() {
        let err = KanshiError::ServiceExited {
            service: "worker".to_string(),
            status: "exit status: 3".to_string(),
            output: vec!["boom".to_string()],
        };
        let response = ErrorResponse::from_error(&err);

        assert_eq!(response.code, ErrorCode::StartFailed);
        let details = response.details.unwrap();
        assert_eq!(
            details.fields.get("output"),
            Some(&serde_json::json!(["boom"]))
        );
    }

    #[test]
    fn test_error_response_serialization() {
        let response = ErrorResponse::new(ErrorCode::ServiceNotFound, "Service not found: api");
        let json = serde_json::to_string(&response).unwrap();

        assert!(json.contains("\"code\":\"E002\""));
        assert!(json.contains("Service not found: api"));
    }

    #[test]
    fn test_error_display() {
        let err = KanshiError::DependencyNotRunning {
            service: "api".to_string(),
            dependency: "broker".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Service 'api' cannot start: dependency 'broker' is not running"
        );
    }
}
