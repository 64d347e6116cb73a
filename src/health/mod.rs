//! Health monitor.
//!
//! The monitor wakes on a fixed tick, probes every Running service whose
//! interval has elapsed, and feeds each outcome through the restart policy.
//! Probes run concurrently on a worker pool sized to the number of services;
//! the process table is only locked to pick due services and to commit
//! results.

pub mod alert;
pub mod policy;
pub mod probe;


pub use alert::{Alert, AlertSink, LogAlertSink};
pub use policy::{Decision, ProbeOutcome};
pub use probe::{HttpGetProbe, Probe, TcpConnectProbe};

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::{ProbeSpec, ServiceDefinition, DEFAULT_PROBE_INTERVAL_MS};
use crate::error::{KanshiError, Result};
use crate::supervisor::{ExitInfo, ProcessState, ProcessSupervisor, SupervisorHandle};

/// A critical service failed permanently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalEvent {
    pub service: String,
    pub reason: String,
}

/// Alert delivery plus the fatal path for critical services.
#[derive(Clone)]
struct Escalation {
    alerts: Arc<dyn AlertSink>,
    fatal: Option<mpsc::Sender<FatalEvent>>,
}

impl Escalation {
    fn raise(&self, def: &ServiceDefinition, reason: String, restart_count: u32) {
        self.alerts
            .raise(Alert::new(&def.name, reason.clone(), restart_count));

        if def.critical {
            error!(service = %def.name, "Critical service failed; requesting shutdown");
            if let Some(fatal) = &self.fatal {
                let _ = fatal.try_send(FatalEvent {
                    service: def.name.clone(),
                    reason,
                });
            }
        }
    }
}

struct DueProbe {
    name: String,
    spec: ProbeSpec,
    exit: Option<ExitInfo>,
}

/// Periodic probe loop driving restart decisions.
pub struct HealthMonitor {
    supervisor: Arc<ProcessSupervisor>,
    handle: SupervisorHandle,
    escalation: Escalation,
    workers: Arc<Semaphore>,
    http: reqwest::Client,
}

impl HealthMonitor {
    /// Creates a monitor that logs alerts.
    pub fn new(supervisor: Arc<ProcessSupervisor>, handle: SupervisorHandle) -> Result<Self> {
        let workers = Arc::new(Semaphore::new(supervisor.registry().len().max(1)));
        Ok(Self {
            supervisor,
            handle,
            escalation: Escalation {
                alerts: Arc::new(LogAlertSink),
                fatal: None,
            },
            workers,
            http: probe::http_client()?,
        })
    }

    /// Replaces the alert sink.
    pub fn with_alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.escalation.alerts = sink;
        self
    }

    /// Channel receiving critical-service failures.
    pub fn with_fatal_channel(mut self, fatal: mpsc::Sender<FatalEvent>) -> Self {
        self.escalation.fatal = Some(fatal);
        self
    }

    /// Shortest probe interval among enabled services, but never below the
    /// configured monitor tick.
    pub fn tick(&self) -> Duration {
        let shortest = self
            .supervisor
            .registry()
            .enabled()
            .map(|def| def.health_check.interval())
            .min()
            .unwrap_or(Duration::from_millis(DEFAULT_PROBE_INTERVAL_MS));
        shortest.max(self.supervisor.settings().monitor_tick())
    }

    /// Runs until the supervisor begins shutting down.
    pub async fn run(self) {
        let cancel = self.supervisor.cancellation_token();
        let mut ticker = tokio::time::interval(self.tick());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(tick_ms = self.tick().as_millis() as u64, "Health monitor started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
            }
        }
        debug!("Health monitor stopped");
    }

    /// Probes every due Running service once. Returns how many were probed.
    pub async fn run_cycle(&self) -> usize {
        let due = self.collect_due(Instant::now());
        if due.is_empty() {
            return 0;
        }

        let mut probes = JoinSet::new();
        for item in due {
            let workers = self.workers.clone();
            let network = match item.exit {
                Some(_) => Ok(None),
                None => probe::for_spec(&item.name, &item.spec, &self.http),
            };
            probes.spawn(async move {
                let _permit = workers.acquire_owned().await.ok();
                let outcome = match (item.exit, network) {
                    (Some(info), _) => ProbeOutcome::Exited(info),
                    (None, Ok(None)) => ProbeOutcome::Healthy,
                    (None, Ok(Some(probe))) => match probe.check().await {
                        Ok(()) => ProbeOutcome::Healthy,
                        Err(e) => {
                            debug!(
                                service = %item.name,
                                kind = %probe.kind(),
                                error = %e,
                                "Check failed"
                            );
                            ProbeOutcome::Unhealthy(e.to_string())
                        }
                    },
                    (None, Err(e)) => ProbeOutcome::Unhealthy(e.to_string()),
                };
                (item.name, outcome)
            });
        }

        let mut probed = 0;
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((name, outcome)) => {
                    probed += 1;
                    self.commit(&name, outcome);
                }
                Err(e) => warn!(error = %e, "Probe task failed"),
            }
        }
        probed
    }

    fn collect_due(&self, now: Instant) -> Vec<DueProbe> {
        let registry = self.supervisor.registry();
        self.supervisor.with_table(|table| {
            table
                .values_mut()
                .filter(|entry| entry.state() == ProcessState::Running)
                .filter_map(|entry| {
                    let def = registry.get(&entry.service_name)?;
                    let due = entry.last_probe_at.map_or(true, |last| {
                        now.saturating_duration_since(last) >= def.health_check.interval()
                    });
                    if !due {
                        return None;
                    }
                    entry.touch_probe();
                    let exit = match &entry.child {
                        Some(child) => child.exit(),
                        None => Some(ExitInfo {
                            code: None,
                            signal: None,
                        }),
                    };
                    Some(DueProbe {
                        name: entry.service_name.clone(),
                        spec: def.health_check.probe(),
                        exit,
                    })
                })
                .collect()
        })
    }

    fn commit(&self, name: &str, outcome: ProbeOutcome) {
        let Some(def) = self.supervisor.registry().get(name) else {
            return;
        };
        let now = Instant::now();

        let applied = self
            .supervisor
            .with_entry(name, |entry| {
                // Stopped or restarted while the probe was in flight.
                if entry.state() != ProcessState::Running {
                    return None;
                }
                let decision = policy::evaluate(def, entry, outcome, now);
                match &decision {
                    Decision::Restart { .. } => {
                        entry.transition(ProcessState::Restarting);
                    }
                    Decision::Fail { reason } => entry.fail(reason.clone()),
                    Decision::Completed => {
                        entry.transition(ProcessState::Stopping);
                        entry.transition(ProcessState::Stopped);
                        entry.child = None;
                    }
                    Decision::Healthy | Decision::Degraded { .. } => {}
                }
                Some((decision, entry.restart_count))
            })
            .flatten();

        let Some((decision, restart_count)) = applied else {
            return;
        };
        match decision {
            Decision::Healthy => debug!(service = %name, "Probe succeeded"),
            Decision::Degraded {
                consecutive_failures,
            } => warn!(
                service = %name,
                consecutive_failures,
                threshold = def.health_check.failure_threshold,
                "Probe failed"
            ),
            Decision::Restart { reason } => {
                warn!(
                    service = %name,
                    restart_count,
                    max_restarts = def.max_restarts,
                    reason = %reason,
                    "Restarting unhealthy service"
                );
                self.spawn_restart(def.clone());
            }
            Decision::Fail { reason } => {
                error!(service = %name, reason = %reason, "Service marked failed");
                self.escalation.raise(def, reason, restart_count);
            }
            Decision::Completed => info!(service = %name, "Service exited cleanly"),
        }
    }

    fn spawn_restart(&self, def: ServiceDefinition) {
        let handle = self.handle.clone();
        let supervisor = self.supervisor.clone();
        let escalation = self.escalation.clone();

        tokio::spawn(async move {
            match handle.recover(def.name.as_str()).await {
                Ok(true) => info!(service = %def.name, "Service restarted"),
                Ok(false) => {
                    debug!(service = %def.name, "Restart skipped; service left Restarting")
                }
                Err(KanshiError::ShuttingDown | KanshiError::Cancelled { .. }) => {
                    debug!(service = %def.name, "Restart abandoned during shutdown");
                }
                Err(e) => {
                    let reason = format!("restart failed: {}", e);
                    let restart_count = supervisor
                        .with_entry(&def.name, |entry| {
                            if entry.state() != ProcessState::Failed {
                                entry.fail(reason.clone());
                            }
                            entry.restart_count
                        })
                        .unwrap_or(0);
                    error!(service = %def.name, error = %e, "Restart failed");
                    escalation.raise(&def, reason, restart_count);
                }
            }
        });
    }
}
