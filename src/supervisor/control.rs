//! Sequential command loop in front of the supervisor.
//!
//! Health restarts and status API requests are sent as [`SupervisorCommand`]s
//! through a bounded channel and executed one at a time.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ProcessSupervisor, StopOutcome};
use crate::error::{KanshiError, Result};

/// Lifecycle request with a reply channel.
#[derive(Debug)]
pub enum SupervisorCommand {
    Start {
        service: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Stop {
        service: String,
        reply: oneshot::Sender<Result<StopOutcome>>,
    },
    Restart {
        service: String,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Health-driven restart; replies `false` if the service left Restarting.
    Recover {
        service: String,
        reply: oneshot::Sender<Result<bool>>,
    },
}

impl SupervisorCommand {
    fn service(&self) -> &str {
        match self {
            SupervisorCommand::Start { service, .. }
            | SupervisorCommand::Stop { service, .. }
            | SupervisorCommand::Restart { service, .. }
            | SupervisorCommand::Recover { service, .. } => service,
        }
    }

    /// Replies with `error`. Requesters that gave up are ignored.
    fn reject(self, error: KanshiError) {
        match self {
            SupervisorCommand::Start { reply, .. } | SupervisorCommand::Restart { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            SupervisorCommand::Stop { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            SupervisorCommand::Recover { reply, .. } => {
                let _ = reply.send(Err(error));
            }
        }
    }
}

/// Cloneable sender side of the control loop.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    tx: mpsc::Sender<SupervisorCommand>,
}

impl SupervisorHandle {
    /// Starts a stopped service.
    pub async fn start(&self, service: impl Into<String>) -> Result<()> {
        let service = service.into();
        self.request(|reply| SupervisorCommand::Start { service, reply })
            .await
    }

    /// Stops a service.
    pub async fn stop(&self, service: impl Into<String>) -> Result<StopOutcome> {
        let service = service.into();
        self.request(|reply| SupervisorCommand::Stop { service, reply })
            .await
    }

    /// Replaces a service's process.
    pub async fn restart(&self, service: impl Into<String>) -> Result<()> {
        let service = service.into();
        self.request(|reply| SupervisorCommand::Restart { service, reply })
            .await
    }

    /// Restart requested by the health monitor. Never revives a service
    /// that was stopped in the meantime.
    pub async fn recover(&self, service: impl Into<String>) -> Result<bool> {
        let service = service.into();
        self.request(|reply| SupervisorCommand::Recover { service, reply })
            .await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> SupervisorCommand,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| KanshiError::ShuttingDown)?;
        rx.await.map_err(|_| KanshiError::ShuttingDown)?
    }
}

/// Receiver side; run it on its own task.
pub struct ControlLoop {
    supervisor: Arc<ProcessSupervisor>,
    rx: mpsc::Receiver<SupervisorCommand>,
    cancel: CancellationToken,
}

/// Creates a handle and the loop that serves it.
pub fn channel(supervisor: Arc<ProcessSupervisor>) -> (SupervisorHandle, ControlLoop) {
    let (tx, rx) = mpsc::channel(supervisor.settings().command_queue.max(1));
    let cancel = supervisor.cancellation_token();
    (
        SupervisorHandle { tx },
        ControlLoop {
            supervisor,
            rx,
            cancel,
        },
    )
}

impl ControlLoop {
    /// Processes commands until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        debug!("Control loop started");
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                command = self.rx.recv() => match command {
                    Some(command) => self.dispatch(command).await,
                    None => break,
                },
            }
        }

        self.rx.close();
        while let Ok(command) = self.rx.try_recv() {
            command.reject(KanshiError::ShuttingDown);
        }
        debug!("Control loop stopped");
    }

    async fn dispatch(&self, command: SupervisorCommand) {
        let name = command.service().to_string();
        let Some(def) = self.supervisor.registry().get(&name).cloned() else {
            warn!(service = %name, "Command for unknown service");
            command.reject(KanshiError::not_found(name));
            return;
        };
        if self.supervisor.is_shutting_down() {
            command.reject(KanshiError::ShuttingDown);
            return;
        }

        match command {
            SupervisorCommand::Start { reply, .. } => {
                info!(service = %name, "Start requested");
                let _ = reply.send(self.supervisor.start_one(&def).await);
            }
            SupervisorCommand::Stop { reply, .. } => {
                info!(service = %name, "Stop requested");
                let _ = reply.send(Ok(self.supervisor.stop_one(&name, None).await));
            }
            SupervisorCommand::Restart { reply, .. } => {
                info!(service = %name, "Restart requested");
                let _ = reply.send(self.supervisor.restart_one(&name).await);
            }
            SupervisorCommand::Recover { reply, .. } => {
                debug!(service = %name, "Health restart requested");
                let _ = reply.send(self.supervisor.recover_one(&name).await);
            }
        }
    }
}
