//! Wires the components together for `kanshi run`.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{exit_code, KanshiError, Result};
use crate::health::{FatalEvent, HealthMonitor};
use crate::registry::ServiceRegistry;
use crate::server::{self, state::AppState};
use crate::shutdown::{wait_for_shutdown_signal, ShutdownCoordinator, ShutdownReason};
use crate::supervisor::{control, ProcessSupervisor};
use crate::validator::ConfigValidator;

/// Capacity of the fatal event channel.
const FATAL_QUEUE: usize = 8;

/// Builds the registry and runs the pre-flight checks. Nothing is spawned.
pub fn preflight(config: &Config) -> Result<Arc<ServiceRegistry>> {
    let registry = Arc::new(ServiceRegistry::new(config.services.clone())?);

    let violations = ConfigValidator::new(&registry).validate();
    if !violations.is_empty() {
        for violation in &violations {
            error!("{}", violation);
        }
        return Err(KanshiError::Validation { violations });
    }

    info!(services = registry.len(), "Configuration validated");
    Ok(registry)
}

/// Runs the supervisor until a signal or a critical failure, then tears
/// everything down. Returns the process exit code.
pub async fn run(config: &Config, best_effort: bool) -> Result<i32> {
    let registry = preflight(config)?;
    let best_effort = best_effort || config.supervisor.best_effort;

    let supervisor = Arc::new(ProcessSupervisor::new(
        registry,
        config.supervisor.clone(),
    )?);
    let coordinator = Arc::new(ShutdownCoordinator::new(supervisor.clone()));
    let (handle, control_loop) = control::channel(supervisor.clone());

    // Bound before anything is spawned so a busy port fails cleanly.
    let listener = if config.status_api.enabled {
        Some(server::bind(&config.status_api).await?)
    } else {
        None
    };

    let mut tasks: Vec<JoinHandle<()>> = vec![tokio::spawn(control_loop.run())];
    if let Some(listener) = listener {
        let state = Arc::new(AppState::new(supervisor.clone(), handle.clone()));
        let cancel = supervisor.cancellation_token();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = server::serve(listener, state, cancel).await {
                error!(error = %e, "Status API failed");
            }
        }));
    }

    let mut signals = tokio::spawn(listen_for_signals(coordinator.clone()));

    info!(best_effort, "Starting services");
    match supervisor.start_all(best_effort).await {
        Ok(report) => {
            for failure in &report.failures {
                warn!(service = %failure.service, cause = %failure.cause, "Service left down");
            }
        }
        Err(err) if coordinator.is_triggered() => {
            // A signal interrupted start-up; the signal task owns the teardown.
            info!(error = %err, "Start-up interrupted");
            let report = coordinator.shutdown(ShutdownReason::Requested).await;
            join_all(tasks).await;
            return Ok(report.exit_code());
        }
        Err(err) => {
            coordinator.shutdown(ShutdownReason::Requested).await;
            signals.abort();
            join_all(tasks).await;
            return Err(err);
        }
    }

    let (fatal_tx, mut fatal_rx) = mpsc::channel::<FatalEvent>(FATAL_QUEUE);
    let monitor = HealthMonitor::new(supervisor.clone(), handle)?.with_fatal_channel(fatal_tx);
    tasks.push(tokio::spawn(monitor.run()));

    let code = tokio::select! {
        joined = &mut signals => match joined {
            Ok(Some(code)) => code,
            Ok(None) | Err(_) => {
                coordinator.shutdown(ShutdownReason::Requested).await;
                exit_code::GENERAL_ERROR
            }
        },
        Some(event) = fatal_rx.recv() => {
            error!(service = %event.service, reason = %event.reason, "Critical service failed");
            signals.abort();
            coordinator
                .shutdown(ShutdownReason::Fatal { service: event.service })
                .await
                .exit_code()
        }
    };

    join_all(tasks).await;
    info!(exit_code = code, "Supervisor exiting");
    Ok(code)
}

/// Waits for a termination signal and runs the shutdown. `None` when the
/// signal handlers could not be installed.
async fn listen_for_signals(coordinator: Arc<ShutdownCoordinator>) -> Option<i32> {
    match wait_for_shutdown_signal().await {
        Ok(name) => {
            info!(signal = name, "Received signal");
            let report = coordinator
                .shutdown(ShutdownReason::Signal {
                    name: name.to_string(),
                })
                .await;
            Some(report.exit_code())
        }
        Err(e) => {
            error!(error = %e, "Failed to install signal handlers");
            None
        }
    }
}

async fn join_all(tasks: Vec<JoinHandle<()>>) {
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }
}
