//! Shutdown coordination.
//!
//! [`ShutdownCoordinator`] runs the teardown sequence exactly once no matter
//! how many triggers (signals, critical failures) arrive. Later callers wait
//! for the first sequence and receive the same [`ShutdownReport`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::exit_code;
use crate::supervisor::{ProcessSupervisor, StopOutcome};

/// What started the shutdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShutdownReason {
    /// An OS termination signal.
    Signal { name: String },
    /// A critical service failed permanently.
    Fatal { service: String },
    /// The run finished on its own (e.g. start-up aborted).
    Requested,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Signal { name } => write!(f, "signal {}", name),
            ShutdownReason::Fatal { service } => write!(f, "critical service '{}' failed", service),
            ShutdownReason::Requested => write!(f, "requested"),
        }
    }
}

/// Outcome of the teardown sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutdownReport {
    pub reason: ShutdownReason,
    /// Services stopped, in stop order.
    pub stopped: Vec<(String, StopOutcome)>,
    /// Services that ignored SIGTERM and were killed.
    pub forced: Vec<String>,
    pub elapsed: Duration,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.forced.is_empty()
    }

    /// Process exit code for this shutdown.
    pub fn exit_code(&self) -> i32 {
        match self.reason {
            ShutdownReason::Fatal { .. } => exit_code::CRITICAL_FAILURE,
            _ if !self.is_clean() => exit_code::FORCED_SHUTDOWN,
            _ => exit_code::SUCCESS,
        }
    }
}

/// One-shot teardown gate.
pub struct ShutdownCoordinator {
    supervisor: Arc<ProcessSupervisor>,
    fired: AtomicBool,
    done: watch::Sender<Option<ShutdownReport>>,
}

impl ShutdownCoordinator {
    pub fn new(supervisor: Arc<ProcessSupervisor>) -> Self {
        let (done, _) = watch::channel(None);
        Self {
            supervisor,
            fired: AtomicBool::new(false),
            done,
        }
    }

    /// Whether a shutdown has been triggered.
    pub fn is_triggered(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Runs the teardown sequence, or waits for the one already running.
    pub async fn shutdown(&self, reason: ShutdownReason) -> ShutdownReport {
        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(reason = %reason, "Shutdown already in progress");
            let mut rx = self.done.subscribe();
            let shared = match rx.wait_for(Option::is_some).await {
                Ok(report) => report.clone(),
                Err(_) => None,
            };
            if let Some(report) = shared {
                return report;
            }
        }

        info!(reason = %reason, "Shutting down");
        let started = Instant::now();
        self.supervisor.begin_shutdown();
        let stopped = self.supervisor.stop_all().await;

        let report = ShutdownReport {
            reason,
            forced: stopped.forced(),
            stopped: stopped.stopped,
            elapsed: started.elapsed(),
        };
        if report.is_clean() {
            info!(
                services = report.stopped.len(),
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Shutdown complete"
            );
        } else {
            warn!(
                forced = ?report.forced,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Shutdown complete; some services had to be killed"
            );
        }

        self.done.send_replace(Some(report.clone()));
        report
    }
}

/// Completes on SIGINT, SIGTERM or SIGQUIT and returns the signal's name.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
    };
    Ok(name)
}
