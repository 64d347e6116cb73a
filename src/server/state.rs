//! Application state management.
//!
//! This module manages the shared state across HTTP request handlers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::supervisor::{ProcessSupervisor, SupervisorHandle};

/// Shared application state.
pub struct AppState {
    /// Read access to the process table.
    pub supervisor: Arc<ProcessSupervisor>,
    /// Lifecycle commands go through the control loop.
    pub handle: SupervisorHandle,
    /// Application start time.
    pub start_time: Instant,
    /// Statistics counters.
    pub stats: Stats,
}

impl AppState {
    pub fn new(supervisor: Arc<ProcessSupervisor>, handle: SupervisorHandle) -> Self {
        Self {
            supervisor,
            handle,
            start_time: Instant::now(),
            stats: Stats::default(),
        }
    }

    /// Returns the uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Increments the total request counter.
    pub fn increment_requests(&self) {
        self.stats.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the failed request counter.
    pub fn increment_failed(&self) {
        self.stats.requests_failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Statistics counters.
#[derive(Default)]
pub struct Stats {
    /// Total requests received.
    pub requests_total: AtomicU64,
    /// Failed requests.
    pub requests_failed: AtomicU64,
}

impl Stats {
    /// Gets the current statistics as a snapshot.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of statistics counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub requests_total: u64,
    pub requests_failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_counters() {
        let stats = Stats::default();
        stats.requests_total.fetch_add(3, Ordering::Relaxed);
        stats.requests_failed.fetch_add(1, Ordering::Relaxed);

        assert_eq!(
            stats.snapshot(),
            StatsSnapshot {
                requests_total: 3,
                requests_failed: 1
            }
        );
    }
}
