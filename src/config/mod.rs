//! Configuration module for kanshi.
//!
//! The whole configuration is read once from a YAML file into an explicit
//! [`Config`] value which is then handed to every component.

mod logging;
mod service;
mod supervisor;

pub use logging::{LogFormat, LogLevel, LogOutput, LoggingConfig};
pub use service::{
    HealthCheck, ProbeKind, ProbeSpec, RestartPolicy, ServiceDefinition,
    DEFAULT_PROBE_INTERVAL_MS, DEFAULT_PROBE_TIMEOUT_MS,
};
pub use supervisor::{StatusApiConfig, SupervisorSettings};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::KanshiError;

/// Files searched when no explicit path is given.
pub const DEFAULT_CONFIG_PATHS: [&str; 3] = ["/etc/kanshi/config.yaml", "kanshi.yaml", "kanshi.yml"];

/// Environment variable naming the configuration file.
pub const ENV_CONFIG_PATH: &str = "KANSHI_CONFIG";

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Supervisor-wide settings.
    pub supervisor: SupervisorSettings,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Local status API.
    pub status_api: StatusApiConfig,

    /// Service definitions in registry order.
    pub services: Vec<ServiceDefinition>,
}

impl Config {
    /// Loads configuration from an optional path.
    /// If path is None, the default search paths are tried in order.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, KanshiError> {
        match path {
            Some(p) => Self::load_from_path(p),
            None => {
                let found = DEFAULT_CONFIG_PATHS
                    .iter()
                    .map(PathBuf::from)
                    .find(|p| p.exists())
                    .ok_or_else(|| {
                        KanshiError::config(format!(
                            "No configuration file found (tried {})",
                            DEFAULT_CONFIG_PATHS.join(", ")
                        ))
                    })?;
                Self::load_from_path(found)
            }
        }
    }

    /// Loads configuration from a YAML file.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, KanshiError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            KanshiError::config_with_source(
                format!("Failed to read config file '{}'", path.as_ref().display()),
                e,
            )
        })?;

        Self::load_from_str(&content)
    }

    /// Loads configuration from a YAML string.
    pub fn load_from_str(content: &str) -> Result<Self, KanshiError> {
        let config: Config = serde_yaml::from_str(content)
            .map_err(|e| KanshiError::config_with_source("Failed to parse config", e))?;

        config.validate()?;
        Ok(config)
    }

    /// Schema-level checks. Graph checks live in the registry and
    /// environment checks in the validator.
    fn validate(&self) -> Result<(), KanshiError> {
        if self.services.is_empty() {
            return Err(KanshiError::config("services must define at least one service"));
        }

        for def in &self.services {
            if def.name.trim().is_empty() {
                return Err(KanshiError::config("services[].name is required"));
            }
            let name = &def.name;
            if def.command.trim().is_empty() {
                return Err(KanshiError::config(format!(
                    "services.{}.command is required",
                    name
                )));
            }
            if def.start_timeout_seconds == 0 {
                return Err(KanshiError::config(format!(
                    "services.{}.start_timeout_seconds must be > 0",
                    name
                )));
            }

            let check = &def.health_check;
            if check.interval_ms == 0 {
                return Err(KanshiError::config(format!(
                    "services.{}.health_check.interval_ms must be > 0",
                    name
                )));
            }
            if check.failure_threshold == 0 {
                return Err(KanshiError::config(format!(
                    "services.{}.health_check.failure_threshold must be > 0",
                    name
                )));
            }

            let probes = std::iter::once(("health_check", check.probe()))
                .chain(def.readiness.clone().map(|r| ("readiness", r)));
            for (section, probe) in probes {
                if probe.timeout_ms == 0 {
                    return Err(KanshiError::config(format!(
                        "services.{}.{}.timeout_ms must be > 0",
                        name, section
                    )));
                }
                if probe.kind.needs_target() && probe.target.is_none() {
                    return Err(KanshiError::config(format!(
                        "services.{}.{}.target is required for {}",
                        name, section, probe.kind
                    )));
                }
            }
        }

        if self.logging.output == LogOutput::File && self.logging.file_path.is_none() {
            return Err(KanshiError::config(
                "logging.file_path is required when output is file",
            ));
        }

        if self.status_api.enabled && self.status_api.port == 0 {
            return Err(KanshiError::config("status_api.port must be > 0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"
services:
  - name: broker
    command: "sleep 60"
"#;

    fn write_config(yaml: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_minimal() {
        let file = write_config(MINIMAL);
        let config = Config::load(Some(file.path())).unwrap();

        assert_eq!(config.services.len(), 1);
        assert_eq!(config.services[0].name, "broker");
        assert_eq!(config.supervisor.graceful_timeout(), Duration::from_secs(10));
        assert!(!config.status_api.enabled);
    }

    #[test]
    fn test_load_full() {
        let yaml = r#"
supervisor:
  graceful_timeout_seconds: 3
  best_effort: true

logging:
  level: debug
  format: json

status_api:
  enabled: true
  port: 7171

services:
  - name: broker
    command: "redis-server --port 6379"
    ports: [6379]
    health_check:
      kind: tcp_connect
      target: "127.0.0.1:6379"
  - name: worker
    command: "python -m worker"
    depends_on: [broker]
    restart_policy: never
    required_env: [BROKER_URL]
    env:
      BROKER_URL: "redis://127.0.0.1:6379"
"#;
        let config = Config::load_from_str(yaml).unwrap();

        assert_eq!(config.supervisor.graceful_timeout_seconds, 3);
        assert!(config.supervisor.best_effort);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.status_api.port, 7171);

        let names: Vec<_> = config.services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["broker", "worker"]);

        let worker = &config.services[1];
        assert_eq!(worker.depends_on, vec!["broker"]);
        assert_eq!(worker.restart_policy, RestartPolicy::Never);
        assert_eq!(worker.required_env, vec!["BROKER_URL"]);
    }

    #[test]
    fn test_no_services_is_an_error() {
        let err = Config::load_from_str("supervisor: {}\n").unwrap_err();
        assert!(err.to_string().contains("at least one service"));
    }

    #[test]
    fn test_missing_command() {
        let yaml = r#"
services:
  - name: broken
"#;
        let err = Config::load_from_str(yaml).unwrap_err();
        assert!(err.to_string().contains("services.broken.command"));
    }

    #[test]
    fn test_tcp_check_requires_target() {
        let yaml = r#"
services:
  - name: api
    command: "sleep 60"
    health_check:
      kind: tcp_connect
"#;
        let err = Config::load_from_str(yaml).unwrap_err();
        assert!(err.to_string().contains("health_check.target"));
    }

    #[test]
    fn test_readiness_requires_target() {
        let yaml = r#"
services:
  - name: api
    command: "sleep 60"
    readiness:
      kind: http_get
"#;
        let err = Config::load_from_str(yaml).unwrap_err();
        assert!(err.to_string().contains("readiness.target"));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let yaml = r#"
services:
  - name: api
    command: "sleep 60"
    health_check:
      interval_ms: 0
"#;
        let err = Config::load_from_str(yaml).unwrap_err();
        assert!(err.to_string().contains("interval_ms"));
    }

    #[test]
    fn test_file_logging_requires_path() {
        let yaml = r#"
logging:
  output: file
services:
  - name: api
    command: "sleep 60"
"#;
        let err = Config::load_from_str(yaml).unwrap_err();
        assert!(err.to_string().contains("file_path"));
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load(Some("/nonexistent/kanshi.yaml")).unwrap_err();
        assert_eq!(err.exit_code(), crate::error::exit_code::VALIDATION_FAILURE);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::load_from_str(MINIMAL).unwrap();
        let yaml = serde_yaml::to_string(&config).unwrap();

        assert!(yaml.contains("graceful_timeout_seconds:"));
        assert!(yaml.contains("name: broker"));
    }
}
