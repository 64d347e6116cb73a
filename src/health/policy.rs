//! Restart decisions.
//!
//! [`evaluate`] applies one probe outcome to a table entry's counters and
//! returns what the monitor must do next. It performs no I/O.

use std::time::Instant;

use crate::config::{RestartPolicy, ServiceDefinition};
use crate::supervisor::{ExitInfo, SupervisedProcess};

/// What a probe observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Healthy,
    Unhealthy(String),
    /// The owned process is gone.
    Exited(ExitInfo),
}

/// Action the monitor takes for one outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Nothing to do.
    Healthy,
    /// Failing, but below the failure threshold.
    Degraded { consecutive_failures: u32 },
    /// Replace the process; the restart has been counted.
    Restart { reason: String },
    /// Mark Failed and alert. Terminal for this run.
    Fail { reason: String },
    /// Clean exit that the policy does not restart.
    Completed,
}

/// Clears the restart accounting once a full window has passed since the
/// last failure.
pub fn refresh_window(def: &ServiceDefinition, entry: &mut SupervisedProcess, now: Instant) {
    if let Some(last) = entry.last_failure_at {
        if now.saturating_duration_since(last) >= def.restart_window() {
            entry.restart_count = 0;
            entry.consecutive_failures = 0;
            entry.last_failure_at = None;
        }
    }
}

/// Applies `outcome` to `entry` and decides the next step.
pub fn evaluate(
    def: &ServiceDefinition,
    entry: &mut SupervisedProcess,
    outcome: ProbeOutcome,
    now: Instant,
) -> Decision {
    refresh_window(def, entry, now);

    match outcome {
        ProbeOutcome::Healthy => {
            entry.consecutive_failures = 0;
            Decision::Healthy
        }
        ProbeOutcome::Exited(info) if info.success() => match def.restart_policy {
            RestartPolicy::Always => {
                entry.last_failure_at = Some(now);
                budget(def, entry, format!("process exited ({})", info))
            }
            RestartPolicy::OnFailure | RestartPolicy::Never => Decision::Completed,
        },
        ProbeOutcome::Exited(info) => {
            entry.last_failure_at = Some(now);
            let reason = format!("process exited ({})", info);
            match def.restart_policy {
                RestartPolicy::Never => Decision::Fail { reason },
                RestartPolicy::OnFailure | RestartPolicy::Always => {
                    budget(def, entry, reason)
                }
            }
        }
        ProbeOutcome::Unhealthy(reason) => {
            entry.last_failure_at = Some(now);
            entry.consecutive_failures += 1;
            if entry.consecutive_failures < def.health_check.failure_threshold {
                return Decision::Degraded {
                    consecutive_failures: entry.consecutive_failures,
                };
            }
            match def.restart_policy {
                RestartPolicy::Never => Decision::Fail { reason },
                RestartPolicy::OnFailure | RestartPolicy::Always => {
                    budget(def, entry, reason)
                }
            }
        }
    }
}

fn budget(def: &ServiceDefinition, entry: &mut SupervisedProcess, reason: String) -> Decision {
    if entry.restart_count < def.max_restarts {
        entry.restart_count += 1;
        Decision::Restart { reason }
    } else {
        Decision::Fail {
            reason: format!(
                "{} (gave up after {} restart(s) within {}s)",
                reason, entry.restart_count, def.restart_window_seconds
            ),
        }
    }
}
