//! Service definition types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::KanshiError;

/// Default health probe interval in milliseconds.
pub const DEFAULT_PROBE_INTERVAL_MS: u64 = 30_000;

/// Default health probe timeout in milliseconds.
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5_000;

/// Static description of one supervised child process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceDefinition {
    /// Unique service name.
    pub name: String,

    /// Executable and argument template (shell-words syntax, `${VAR}` placeholders).
    pub command: String,

    /// Working directory.
    pub working_dir: Option<PathBuf>,

    /// Environment variables added to the child's environment.
    pub env: BTreeMap<String, String>,

    /// Services that must be Running before this one starts.
    pub depends_on: Vec<String>,

    /// Whether the service is started at all.
    pub enabled: bool,

    /// Restart policy applied when health probes fail.
    pub restart_policy: RestartPolicy,

    /// Readiness deadline in seconds.
    pub start_timeout_seconds: u64,

    /// Per-service override of the supervisor's graceful stop timeout.
    pub stop_timeout_seconds: Option<u64>,

    /// Readiness probe used by start (defaults to process liveness).
    pub readiness: Option<ProbeSpec>,

    /// Periodic health probe.
    pub health_check: HealthCheck,

    /// Maximum automatic restarts within `restart_window_seconds`.
    pub max_restarts: u32,

    /// Sliding window for restart accounting, in seconds.
    pub restart_window_seconds: u64,

    /// Environment variables that must be set before anything is spawned.
    pub required_env: Vec<String>,

    /// TCP ports the service binds; they must be free at start-up.
    pub ports: Vec<u16>,

    /// File that receives the child's output lines.
    pub log_file: Option<PathBuf>,

    /// Terminal failure of this service shuts the whole supervisor down.
    pub critical: bool,
}

impl Default for ServiceDefinition {
    fn default() -> Self {
        Self {
            name: String::new(),
            command: String::new(),
            working_dir: None,
            env: BTreeMap::new(),
            depends_on: Vec::new(),
            enabled: true,
            restart_policy: RestartPolicy::OnFailure,
            start_timeout_seconds: 30,
            stop_timeout_seconds: None,
            readiness: None,
            health_check: HealthCheck::default(),
            max_restarts: 3,
            restart_window_seconds: 300,
            required_env: Vec::new(),
            ports: Vec::new(),
            log_file: None,
            critical: false,
        }
    }
}

impl ServiceDefinition {
    /// Creates a definition with defaults for everything but name and command.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_seconds)
    }

    pub fn restart_window(&self) -> Duration {
        Duration::from_secs(self.restart_window_seconds)
    }

    /// Graceful stop timeout, falling back to the supervisor default.
    pub fn stop_timeout(&self, default: Duration) -> Duration {
        self.stop_timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(default)
    }

    /// The probe used to confirm readiness during start.
    pub fn readiness_probe(&self) -> ProbeSpec {
        self.readiness.clone().unwrap_or_default()
    }
}

/// Rule governing whether a failing service is restarted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Mark the service Failed on the first failure.
    Never,
    /// Restart on probe failure or non-zero exit.
    #[default]
    OnFailure,
    /// Restart on any failure, including a clean exit.
    Always,
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartPolicy::Never => write!(f, "never"),
            RestartPolicy::OnFailure => write!(f, "on_failure"),
            RestartPolicy::Always => write!(f, "always"),
        }
    }
}

impl FromStr for RestartPolicy {
    type Err = KanshiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "never" => Ok(RestartPolicy::Never),
            "on_failure" => Ok(RestartPolicy::OnFailure),
            "always" => Ok(RestartPolicy::Always),
            _ => Err(KanshiError::config(format!("Unknown restart policy: {}", s))),
        }
    }
}

/// Probe kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    /// The owned child process has not exited.
    #[default]
    ProcessAlive,
    /// A TCP connection to `target` succeeds.
    TcpConnect,
    /// `GET target` answers with a 2xx status.
    HttpGet,
}

impl ProbeKind {
    /// Whether this kind needs a `target`.
    pub fn needs_target(self) -> bool {
        !matches!(self, ProbeKind::ProcessAlive)
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeKind::ProcessAlive => write!(f, "process_alive"),
            ProbeKind::TcpConnect => write!(f, "tcp_connect"),
            ProbeKind::HttpGet => write!(f, "http_get"),
        }
    }
}

impl FromStr for ProbeKind {
    type Err = KanshiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "process_alive" => Ok(ProbeKind::ProcessAlive),
            "tcp_connect" => Ok(ProbeKind::TcpConnect),
            "http_get" => Ok(ProbeKind::HttpGet),
            _ => Err(KanshiError::config(format!("Unknown probe kind: {}", s))),
        }
    }
}

/// One bounded-timeout check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSpec {
    /// Probe kind.
    pub kind: ProbeKind,

    /// `host:port` for TCP, URL for HTTP.
    pub target: Option<String>,

    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for ProbeSpec {
    fn default() -> Self {
        Self {
            kind: ProbeKind::ProcessAlive,
            target: None,
            timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
        }
    }
}

impl ProbeSpec {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Periodic health check descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheck {
    /// Probe kind.
    pub kind: ProbeKind,

    /// `host:port` for TCP, URL for HTTP.
    pub target: Option<String>,

    /// Time between probes in milliseconds.
    pub interval_ms: u64,

    /// Per-probe timeout in milliseconds.
    pub timeout_ms: u64,

    /// Consecutive failures before the restart policy is consulted.
    pub failure_threshold: u32,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            kind: ProbeKind::ProcessAlive,
            target: None,
            interval_ms: DEFAULT_PROBE_INTERVAL_MS,
            timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            failure_threshold: 1,
        }
    }
}

impl HealthCheck {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// The probe half of the descriptor.
    pub fn probe(&self) -> ProbeSpec {
        ProbeSpec {
            kind: self.kind,
            target: self.target.clone(),
            timeout_ms: self.timeout_ms,
        }
    }
}
