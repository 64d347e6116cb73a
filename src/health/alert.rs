//! Alerts for services that failed permanently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

/// Raised when a service reaches terminal Failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub service: String,
    pub reason: String,
    pub restart_count: u32,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(service: impl Into<String>, reason: impl Into<String>, restart_count: u32) -> Self {
        Self {
            service: service.into(),
            reason: reason.into(),
            restart_count,
            raised_at: Utc::now(),
        }
    }
}

/// Destination for alerts.
pub trait AlertSink: Send + Sync {
    fn raise(&self, alert: Alert);
}

/// Writes alerts to the log at error level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn raise(&self, alert: Alert) {
        error!(
            service = %alert.service,
            restart_count = alert.restart_count,
            raised_at = %alert.raised_at,
            reason = %alert.reason,
            "ALERT: service failed permanently"
        );
    }
}

/// Keeps alerts in memory.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    alerts: std::sync::Mutex<Vec<Alert>>,
}

#[cfg(test)]
impl RecordingSink {
    pub(crate) fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl AlertSink for RecordingSink {
    fn raise(&self, alert: Alert) {
        self.alerts.lock().unwrap().push(alert);
    }
}
