//! HTTP client module for kanshi.
//!
//! This module provides the client used by the CLI to talk to a running
//! supervisor's status API.

pub mod api;

pub use api::SupervisorClient;
