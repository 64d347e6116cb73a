//! Process supervisor.
//!
//! [`ProcessSupervisor`] owns the process table and is the only component that
//! holds child process handles. Lifecycle operations (start, stop, restart)
//! are serialized by an operation lock; the table itself sits behind a plain
//! mutex that is only held for short state transitions, never across I/O.

pub mod control;
pub mod process;
pub mod state;

#[cfg(test)]
mod supervisor_tests;

pub use control::{ControlLoop, SupervisorCommand, SupervisorHandle};
pub use process::{ChildProcess, ExitInfo};
pub use state::{ProcessSnapshot, ProcessState, SupervisedProcess};

use chrono::Utc;
use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ProbeKind, ServiceDefinition, SupervisorSettings};
use crate::error::{KanshiError, Result, StartFailure};
use crate::health::probe;
use crate::registry::ServiceRegistry;

/// Upper bound on waiting for the kernel to reap a SIGKILLed process.
const KILL_WAIT: Duration = Duration::from_secs(5);

/// How a stop request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// Nothing was running.
    AlreadyStopped,
    /// The process exited after SIGTERM.
    Graceful,
    /// The graceful timeout expired and the process was killed.
    Forced,
}

/// Result of `start_all`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartReport {
    /// Services that reached Running, in start order.
    pub started: Vec<String>,
    /// Services that did not, with their causes.
    pub failures: Vec<StartFailure>,
}

impl StartReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Result of `stop_all`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StopReport {
    /// Every service that was tracked, in the order it was stopped.
    pub stopped: Vec<(String, StopOutcome)>,
}

impl StopReport {
    /// Services that had to be force-killed.
    pub fn forced(&self) -> Vec<String> {
        self.stopped
            .iter()
            .filter(|(_, outcome)| *outcome == StopOutcome::Forced)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.stopped
            .iter()
            .all(|(_, outcome)| *outcome != StopOutcome::Forced)
    }
}

type ProcessTable = HashMap<String, SupervisedProcess>;

/// Owner of the process table.
pub struct ProcessSupervisor {
    registry: Arc<ServiceRegistry>,
    settings: SupervisorSettings,
    table: Mutex<ProcessTable>,
    /// Serializes start, stop and restart.
    ops: tokio::sync::Mutex<()>,
    accepting: AtomicBool,
    cancel: CancellationToken,
    http: reqwest::Client,
}

impl ProcessSupervisor {
    /// Creates a supervisor with an empty table.
    pub fn new(registry: Arc<ServiceRegistry>, settings: SupervisorSettings) -> Result<Self> {
        Ok(Self {
            registry,
            settings,
            table: Mutex::new(HashMap::new()),
            ops: tokio::sync::Mutex::new(()),
            accepting: AtomicBool::new(true),
            cancel: CancellationToken::new(),
            http: probe::http_client()?,
        })
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    /// Token cancelled when shutdown begins.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stops accepting lifecycle commands and cancels in-flight starts.
    pub fn begin_shutdown(&self) {
        if self.accepting.swap(false, Ordering::AcqRel) {
            info!("Supervisor no longer accepts lifecycle commands");
        }
        self.cancel.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        !self.accepting.load(Ordering::Acquire)
    }

    fn lock_table(&self) -> MutexGuard<'_, ProcessTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` with the table locked. `f` must not block.
    pub(crate) fn with_table<R>(&self, f: impl FnOnce(&mut ProcessTable) -> R) -> R {
        f(&mut self.lock_table())
    }

    /// Runs `f` on one entry, if tracked.
    pub(crate) fn with_entry<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut SupervisedProcess) -> R,
    ) -> Option<R> {
        self.lock_table().get_mut(name).map(f)
    }

    /// Current state of a tracked service.
    pub fn state_of(&self, name: &str) -> Option<ProcessState> {
        self.lock_table().get(name).map(|p| p.state())
    }

    /// Snapshot of one service. Untracked services report Stopped.
    pub fn snapshot(&self, name: &str) -> Option<ProcessSnapshot> {
        if !self.registry.contains(name) {
            return None;
        }
        let table = self.lock_table();
        Some(
            table
                .get(name)
                .map(SupervisedProcess::snapshot)
                .unwrap_or_else(|| untracked(name)),
        )
    }

    /// Snapshots of every registered service, in registry order.
    pub fn snapshots(&self) -> Vec<ProcessSnapshot> {
        let table = self.lock_table();
        self.registry
            .services()
            .iter()
            .map(|def| {
                table
                    .get(&def.name)
                    .map(SupervisedProcess::snapshot)
                    .unwrap_or_else(|| untracked(&def.name))
            })
            .collect()
    }

    /// Starts every enabled service in dependency order.
    ///
    /// Without `best_effort`, the first failure stops everything already
    /// started (in reverse order) and the call fails with `StartFailed`.
    pub async fn start_all(&self, best_effort: bool) -> Result<StartReport> {
        let _ops = self.ops.lock().await;
        let mut report = StartReport::default();

        for def in self.registry.start_order() {
            match self.start_locked(def).await {
                Ok(()) => report.started.push(def.name.clone()),
                Err(e) => {
                    error!(service = %def.name, error = %e, "Service failed to start");
                    for line in e.output() {
                        error!(service = %def.name, "  | {}", line);
                    }
                    report.failures.push(StartFailure {
                        service: def.name.clone(),
                        cause: e.to_string(),
                    });
                    if !best_effort || self.cancel.is_cancelled() {
                        break;
                    }
                }
            }
        }

        if report.is_complete() {
            info!(services = report.started.len(), "All services running");
            return Ok(report);
        }

        if best_effort && !self.cancel.is_cancelled() {
            warn!(
                started = report.started.len(),
                failed = report.failures.len(),
                "Start-up finished with failures"
            );
            return Ok(report);
        }

        warn!(
            started = report.started.len(),
            "Rolling back started services"
        );
        self.stop_all_locked().await;
        Err(KanshiError::StartFailed {
            failures: report.failures,
        })
    }

    /// Starts one service and waits for it to become ready.
    pub async fn start_one(&self, def: &ServiceDefinition) -> Result<()> {
        let _ops = self.ops.lock().await;
        self.start_locked(def).await
    }

    /// Stops one service. `graceful_timeout` defaults to the service's own.
    pub async fn stop_one(&self, name: &str, graceful_timeout: Option<Duration>) -> StopOutcome {
        let _ops = self.ops.lock().await;
        self.stop_locked(name, graceful_timeout).await
    }

    /// Stops every tracked service in reverse dependency order.
    pub async fn stop_all(&self) -> StopReport {
        let _ops = self.ops.lock().await;
        self.stop_all_locked().await
    }

    /// Replaces a service's process.
    ///
    /// A Running or Restarting entry keeps its restart accounting; any other
    /// entry is stopped and started afresh.
    pub async fn restart_one(&self, name: &str) -> Result<()> {
        self.replace(name, true).await.map(|_| ())
    }

    /// Replaces the process of a service the health monitor is restarting.
    ///
    /// Only a Restarting entry is replaced. Returns `false` without starting
    /// anything when the service was stopped or restarted by an operator
    /// while the request was queued.
    pub async fn recover_one(&self, name: &str) -> Result<bool> {
        self.replace(name, false).await
    }

    async fn replace(&self, name: &str, fresh: bool) -> Result<bool> {
        let def = self
            .registry
            .get(name)
            .cloned()
            .ok_or_else(|| KanshiError::not_found(name))?;
        let _ops = self.ops.lock().await;
        self.ensure_accepting()?;

        let in_place = self
            .with_entry(name, |entry| {
                let eligible = match entry.state() {
                    ProcessState::Restarting => true,
                    ProcessState::Running => fresh,
                    _ => false,
                };
                (eligible && entry.transition(ProcessState::Restarting))
                    .then(|| entry.child.clone())
            })
            .flatten();

        match in_place {
            Some(child) => {
                info!(service = %name, "Restarting service");
                if let Some(child) = child {
                    let timeout = def.stop_timeout(self.settings.graceful_timeout());
                    self.terminate(name, &child, timeout).await;
                }
                self.with_entry(name, |entry| {
                    entry.child = None;
                    entry.consecutive_failures = 0;
                });
            }
            None if fresh => {
                self.stop_locked(name, None).await;
            }
            None => {
                debug!(service = %name, "Service no longer awaiting restart");
                return Ok(false);
            }
        }

        self.start_locked(&def).await.map(|()| true)
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.is_shutting_down() {
            Err(KanshiError::ShuttingDown)
        } else {
            Ok(())
        }
    }

    async fn start_locked(&self, def: &ServiceDefinition) -> Result<()> {
        self.ensure_accepting()?;
        let name = def.name.as_str();

        {
            let mut table = self.lock_table();
            for dep in &def.depends_on {
                let running = table
                    .get(dep)
                    .is_some_and(|p| p.state() == ProcessState::Running);
                if !running {
                    return Err(KanshiError::DependencyNotRunning {
                        service: def.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }

            let live = table
                .get(name)
                .and_then(|p| p.child.as_ref())
                .is_some_and(ChildProcess::is_alive);
            match table.get(name).map(SupervisedProcess::state) {
                Some(ProcessState::Running | ProcessState::Starting) if live => {
                    debug!(service = %name, "Service already running");
                    return Ok(());
                }
                Some(state) if live => {
                    return Err(KanshiError::invalid_request(format!(
                        "service '{}' is {} with a live process; stop it first",
                        name, state
                    )));
                }
                // Restarts keep the entry and its restart accounting.
                Some(ProcessState::Restarting | ProcessState::Stopped) => {
                    if let Some(entry) = table.get_mut(name) {
                        entry.transition(ProcessState::Starting);
                    }
                }
                _ => {
                    table.insert(def.name.clone(), SupervisedProcess::new(name));
                }
            }
        }

        info!(service = %name, "Starting service");
        let child = match ChildProcess::spawn(def, self.settings.output_tail_lines) {
            Ok(child) => child,
            Err(e) => {
                self.with_entry(name, |entry| entry.fail(e.to_string()));
                return Err(e);
            }
        };
        self.with_entry(name, |entry| {
            entry.child = Some(child.clone());
            entry.started_at = Some(Utc::now());
        });

        match self.await_ready(def, &child).await {
            Ok(()) => {
                self.with_entry(name, |entry| {
                    entry.consecutive_failures = 0;
                    entry.last_error = None;
                    entry.last_probe_at = None;
                    entry.transition(ProcessState::Running);
                });
                info!(service = %name, pid = ?child.pid(), "Service running");
                Ok(())
            }
            Err(e @ KanshiError::Cancelled { .. }) => {
                warn!(service = %name, "Start cancelled; terminating process");
                self.terminate(name, &child, def.stop_timeout(self.settings.graceful_timeout()))
                    .await;
                self.with_table(|table| {
                    if let Some(mut entry) = table.remove(name) {
                        entry.transition(ProcessState::Stopping);
                        entry.transition(ProcessState::Stopped);
                    }
                });
                Err(e)
            }
            Err(e) => {
                if child.is_alive() {
                    self.terminate(name, &child, def.stop_timeout(self.settings.graceful_timeout()))
                        .await;
                }
                self.with_entry(name, |entry| entry.fail(e.to_string()));
                Err(e)
            }
        }
    }

    /// Waits until the service confirms readiness, exits, times out, or the
    /// supervisor shuts down.
    async fn await_ready(&self, def: &ServiceDefinition, child: &ChildProcess) -> Result<()> {
        let start_timeout = def.start_timeout();
        let spec = def.readiness_probe();
        let exited = |info: ExitInfo| KanshiError::ServiceExited {
            service: def.name.clone(),
            status: info.to_string(),
            output: child.output_tail(),
        };

        let wait = async {
            if spec.kind == ProbeKind::ProcessAlive {
                let settle = self.settings.ready_settle().min(start_timeout);
                return tokio::select! {
                    info = child.wait_exit() => Err(exited(info)),
                    _ = tokio::time::sleep(settle) => Ok(()),
                };
            }

            let probe = match probe::for_spec(&def.name, &spec, &self.http) {
                Ok(Some(probe)) => probe,
                Ok(None) => return Ok(()),
                Err(e) => return Err(e),
            };
            loop {
                tokio::select! {
                    info = child.wait_exit() => return Err(exited(info)),
                    result = probe.check() => match result {
                        Ok(()) => return Ok(()),
                        Err(e) => debug!(
                            service = %def.name,
                            kind = %probe.kind(),
                            error = %e,
                            "Not ready yet"
                        ),
                    },
                }
                tokio::select! {
                    info = child.wait_exit() => return Err(exited(info)),
                    _ = tokio::time::sleep(self.settings.ready_poll()) => {}
                }
            }
        };

        tokio::select! {
            _ = self.cancel.cancelled() => Err(KanshiError::Cancelled {
                service: def.name.clone(),
            }),
            result = tokio::time::timeout(start_timeout, wait) => match result {
                Ok(result) => result,
                Err(_) => Err(KanshiError::ReadinessTimeout {
                    service: def.name.clone(),
                    seconds: def.start_timeout_seconds,
                    output: child.output_tail(),
                }),
            },
        }
    }

    async fn stop_locked(&self, name: &str, graceful_timeout: Option<Duration>) -> StopOutcome {
        let child = {
            let mut table = self.lock_table();
            let Some(entry) = table.get_mut(name) else {
                debug!(service = %name, "Stop requested for untracked service");
                return StopOutcome::AlreadyStopped;
            };
            match entry.child.clone().filter(ChildProcess::is_alive) {
                Some(child) => {
                    entry.transition(ProcessState::Stopping);
                    child
                }
                None => {
                    table.remove(name);
                    debug!(service = %name, "Service already stopped");
                    return StopOutcome::AlreadyStopped;
                }
            }
        };

        let timeout = graceful_timeout.unwrap_or_else(|| {
            self.registry
                .get(name)
                .map(|def| def.stop_timeout(self.settings.graceful_timeout()))
                .unwrap_or_else(|| self.settings.graceful_timeout())
        });
        let outcome = self.terminate(name, &child, timeout).await;

        self.with_table(|table| {
            if let Some(mut entry) = table.remove(name) {
                entry.transition(ProcessState::Stopped);
            }
        });
        outcome
    }

    async fn stop_all_locked(&self) -> StopReport {
        let tracked: Vec<String> = self.with_table(|table| table.keys().cloned().collect());
        let order = self.registry.stop_order(tracked.iter().map(String::as_str));

        let mut report = StopReport::default();
        for name in order {
            let outcome = self.stop_locked(&name, None).await;
            report.stopped.push((name, outcome));
        }
        report
    }

    /// SIGTERM, wait up to `timeout`, then SIGKILL.
    async fn terminate(&self, name: &str, child: &ChildProcess, timeout: Duration) -> StopOutcome {
        if !child.is_alive() {
            return StopOutcome::AlreadyStopped;
        }

        debug!(service = %name, pid = ?child.pid(), "Sending SIGTERM");
        child.signal(Signal::SIGTERM);
        if let Ok(info) = tokio::time::timeout(timeout, child.wait_exit()).await {
            info!(service = %name, status = %info, "Service stopped");
            return StopOutcome::Graceful;
        }

        warn!(
            service = %name,
            timeout_secs = timeout.as_secs_f64(),
            "Service ignored SIGTERM; killing"
        );
        child.signal(Signal::SIGKILL);
        if tokio::time::timeout(KILL_WAIT, child.wait_exit()).await.is_err() {
            error!(service = %name, pid = ?child.pid(), "Process not reaped after SIGKILL");
        }
        StopOutcome::Forced
    }
}

fn untracked(name: &str) -> ProcessSnapshot {
    ProcessSnapshot {
        name: name.to_string(),
        state: ProcessState::Stopped,
        pid: None,
        started_at: None,
        last_probe_at: None,
        consecutive_failures: 0,
        restart_count: 0,
        last_error: None,
    }
}
