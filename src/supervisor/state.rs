//! Runtime records kept in the process table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

use super::process::ChildProcess;

/// Lifecycle state of a supervised service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    /// Spawned, readiness not yet confirmed.
    Starting,
    /// Ready and being probed.
    Running,
    /// Terminate requested.
    Stopping,
    /// No live process.
    Stopped,
    /// Terminal for this run; never restarted automatically.
    Failed,
    /// Being replaced after a health failure.
    Restarting,
}

impl ProcessState {
    /// Whether this state may be followed by `next`.
    pub(crate) fn can_transition_to(self, next: ProcessState) -> bool {
        use ProcessState::*;
        matches!(
            (self, next),
            (Starting, Running)
                | (Starting, Failed)
                | (Starting, Stopping)
                | (Running, Stopping)
                | (Running, Restarting)
                | (Running, Failed)
                | (Restarting, Starting)
                | (Restarting, Stopping)
                | (Restarting, Failed)
                | (Stopping, Stopped)
                | (Stopped, Starting)
                | (Failed, Stopping)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessState::Failed | ProcessState::Stopped)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::Starting => write!(f, "starting"),
            ProcessState::Running => write!(f, "running"),
            ProcessState::Stopping => write!(f, "stopping"),
            ProcessState::Stopped => write!(f, "stopped"),
            ProcessState::Failed => write!(f, "failed"),
            ProcessState::Restarting => write!(f, "restarting"),
        }
    }
}

/// Runtime record for one service, owned by the supervisor's table.
#[derive(Debug)]
pub struct SupervisedProcess {
    pub service_name: String,
    /// Exclusively owned; never handed out of the supervisor.
    pub(crate) child: Option<ChildProcess>,
    state: ProcessState,
    pub started_at: Option<DateTime<Utc>>,
    pub last_probe_at: Option<Instant>,
    pub last_probe_wall: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub restart_count: u32,
    /// Most recent failed probe or crash; restart accounting resets once a
    /// full window passes after it.
    pub last_failure_at: Option<Instant>,
    /// Reason recorded with the latest Failed transition.
    pub last_error: Option<String>,
}

impl SupervisedProcess {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            child: None,
            state: ProcessState::Starting,
            started_at: None,
            last_probe_at: None,
            last_probe_wall: None,
            consecutive_failures: 0,
            restart_count: 0,
            last_failure_at: None,
            last_error: None,
        }
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Moves to `next` if the lifecycle allows it. Returns whether it moved.
    pub fn transition(&mut self, next: ProcessState) -> bool {
        if self.state == next {
            return true;
        }
        if !self.state.can_transition_to(next) {
            tracing::warn!(
                service = %self.service_name,
                from = %self.state,
                to = %next,
                "Rejected state transition"
            );
            return false;
        }
        tracing::debug!(
            service = %self.service_name,
            from = %self.state,
            to = %next,
            "State transition"
        );
        self.state = next;
        true
    }

    /// Marks the entry Failed with a reason.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.last_error = Some(reason.into());
        self.transition(ProcessState::Failed);
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.pid())
    }

    /// Records a probe time.
    pub fn touch_probe(&mut self) {
        self.last_probe_at = Some(Instant::now());
        self.last_probe_wall = Some(Utc::now());
    }

    pub fn snapshot(&self) -> ProcessSnapshot {
        ProcessSnapshot {
            name: self.service_name.clone(),
            state: self.state,
            pid: self.pid(),
            started_at: self.started_at,
            last_probe_at: self.last_probe_wall,
            consecutive_failures: self.consecutive_failures,
            restart_count: self.restart_count,
            last_error: self.last_error.clone(),
        }
    }
}

/// Read-only copy of a table entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    pub name: String,
    pub state: ProcessState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_probe_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub restart_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}
