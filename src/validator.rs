//! Pre-flight validation of the host environment.
//!
//! [`ConfigValidator`] runs once before anything is spawned and collects every
//! problem it can find instead of stopping at the first one, so a single
//! `kanshi check` shows the full list.

use nix::unistd::{access, AccessFlags};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::{Ipv4Addr, TcpListener};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::registry::ServiceRegistry;

/// Category of a pre-flight problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// A required environment value is missing or empty.
    MissingEnv,
    /// A declared port is already bound on this host.
    PortInUse,
    /// Two services declare the same port.
    PortConflict,
    /// A working or output directory is missing or not writable.
    UnwritableDirectory,
    /// The command's executable cannot be resolved.
    CommandNotFound,
    /// An enabled service depends on a disabled one.
    DisabledDependency,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ViolationKind::MissingEnv => "missing_env",
            ViolationKind::PortInUse => "port_in_use",
            ViolationKind::PortConflict => "port_conflict",
            ViolationKind::UnwritableDirectory => "unwritable_directory",
            ViolationKind::CommandNotFound => "command_not_found",
            ViolationKind::DisabledDependency => "disabled_dependency",
        };
        write!(f, "{}", s)
    }
}

/// One pre-flight problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Offending service, if the problem is tied to one.
    pub service: Option<String>,
    /// Problem category.
    pub kind: ViolationKind,
    /// Human readable description.
    pub message: String,
}

impl Violation {
    pub fn new(service: Option<&str>, kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            service: service.map(str::to_string),
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.service {
            Some(service) => write!(f, "[{}] {}: {}", service, self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

/// Checks required configuration and host resources before start-up.
pub struct ConfigValidator<'a> {
    registry: &'a ServiceRegistry,
    /// Environment the children inherit.
    environment: HashMap<String, String>,
}

impl<'a> ConfigValidator<'a> {
    /// Validator against the supervisor's own environment.
    pub fn new(registry: &'a ServiceRegistry) -> Self {
        Self::with_environment(registry, std::env::vars().collect())
    }

    /// Validator against an explicit environment.
    pub fn with_environment(
        registry: &'a ServiceRegistry,
        environment: HashMap<String, String>,
    ) -> Self {
        Self {
            registry,
            environment,
        }
    }

    /// Returns every violation found. Empty means start-up may proceed.
    pub fn validate(&self) -> Vec<Violation> {
        let mut violations = Vec::new();
        let mut claimed_ports: HashMap<u16, &str> = HashMap::new();

        for def in self.registry.enabled() {
            let name = def.name.as_str();
            debug!(service = name, "Validating service");

            for key in &def.required_env {
                let value = def
                    .env
                    .get(key)
                    .or_else(|| self.environment.get(key))
                    .filter(|v| !v.is_empty());
                if value.is_none() {
                    violations.push(Violation::new(
                        Some(name),
                        ViolationKind::MissingEnv,
                        format!("required environment variable {} is not set", key),
                    ));
                }
            }

            for dep in &def.depends_on {
                if self.registry.get(dep).is_some_and(|d| !d.enabled) {
                    violations.push(Violation::new(
                        Some(name),
                        ViolationKind::DisabledDependency,
                        format!("depends on disabled service '{}'", dep),
                    ));
                }
            }

            for &port in &def.ports {
                if let Some(other) = claimed_ports.insert(port, name) {
                    violations.push(Violation::new(
                        Some(name),
                        ViolationKind::PortConflict,
                        format!("port {} is also declared by '{}'", port, other),
                    ));
                } else if !port_is_free(port) {
                    violations.push(Violation::new(
                        Some(name),
                        ViolationKind::PortInUse,
                        format!("port {} is already in use", port),
                    ));
                }
            }

            if let Some(dir) = &def.working_dir {
                if let Err(reason) = check_writable_dir(dir) {
                    violations.push(Violation::new(
                        Some(name),
                        ViolationKind::UnwritableDirectory,
                        format!("working_dir {}: {}", dir.display(), reason),
                    ));
                }
            }

            if let Some(log_file) = &def.log_file {
                let parent = log_file
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or_else(|| Path::new("."));
                if let Err(reason) = check_writable_dir(parent) {
                    violations.push(Violation::new(
                        Some(name),
                        ViolationKind::UnwritableDirectory,
                        format!("log_file directory {}: {}", parent.display(), reason),
                    ));
                }
            }

            if let Err(reason) = self.check_command(def.command.as_str(), def.working_dir.as_deref())
            {
                violations.push(Violation::new(
                    Some(name),
                    ViolationKind::CommandNotFound,
                    reason,
                ));
            }
        }

        violations
    }

    /// Resolves the executable the way the OS would when spawning.
    fn check_command(&self, command: &str, working_dir: Option<&Path>) -> Result<(), String> {
        let parts = shell_words::split(command)
            .map_err(|e| format!("cannot parse command '{}': {}", command, e))?;
        let program = parts
            .first()
            .ok_or_else(|| "command is empty".to_string())?;

        if program.contains("${") {
            // Expanded at spawn time; nothing to resolve yet.
            return Ok(());
        }

        if program.contains('/') {
            let path = match working_dir {
                Some(dir) if Path::new(program).is_relative() => dir.join(program),
                _ => PathBuf::from(program),
            };
            return if is_executable(&path) {
                Ok(())
            } else {
                Err(format!("{} is not an executable file", path.display()))
            };
        }

        let search = self.environment.get("PATH").cloned().unwrap_or_default();
        if std::env::split_paths(&search).any(|dir| is_executable(&dir.join(program))) {
            Ok(())
        } else {
            Err(format!("'{}' was not found on PATH", program))
        }
    }
}

fn port_is_free(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).is_ok()
}

fn check_writable_dir(dir: &Path) -> Result<(), String> {
    if !dir.is_dir() {
        return Err("not a directory".to_string());
    }
    access(dir, AccessFlags::W_OK).map_err(|e| format!("not writable ({})", e))
}

fn is_executable(path: &Path) -> bool {
    path.is_file() && access(path, AccessFlags::X_OK).is_ok()
}
