//! kanshi - single-host process supervisor
//!
//! This crate starts a fixed set of services in dependency order, watches
//! their health, restarts them within a bounded budget, and tears them down
//! gracefully on shutdown.
//!
//! # Modules
//!
//! - [`cli`] - Command-line interface definitions
//! - [`config`] - Configuration file parsing and validation
//! - [`error`] - Error types and exit codes
//! - [`registry`] - Service definitions and the dependency graph
//! - [`validator`] - Pre-flight checks against the host
//! - [`supervisor`] - Process table, spawning and stopping
//! - [`health`] - Periodic probes and the restart policy
//! - [`shutdown`] - One-shot teardown
//! - [`server`] / [`client`] - Optional local status API
//! - [`runner`] - Wiring for `kanshi run`

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod health;
pub mod registry;
pub mod runner;
pub mod server;
pub mod shutdown;
pub mod supervisor;
pub mod validator;

// Re-exports for convenience
pub use cli::Cli;
pub use client::SupervisorClient;
pub use config::Config;
pub use error::{ErrorCode, KanshiError, Result};
pub use health::HealthMonitor;
pub use registry::ServiceRegistry;
pub use shutdown::{ShutdownCoordinator, ShutdownReason, ShutdownReport};
pub use supervisor::{ProcessState, ProcessSupervisor};
pub use validator::ConfigValidator;
