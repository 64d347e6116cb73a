//! Command-line interface definition for kanshi.
//!
//! This module defines the CLI structure using clap derive macros,
//! including all subcommands and their arguments.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{LogLevel, ENV_CONFIG_PATH};
use crate::server::response::ServiceAction;

/// kanshi - single-host process supervisor
///
/// Starts a set of services in dependency order, keeps them healthy, and
/// tears them down gracefully.
#[derive(Debug, Parser)]
#[command(name = "kanshi")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = ENV_CONFIG_PATH)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Level forced by `-v`/`-q`, if any. `None` keeps the configured level.
    pub fn level_override(&self) -> Option<LogLevel> {
        if self.quiet {
            return Some(LogLevel::Error);
        }

        match self.verbose {
            0 => None,
            1 => Some(LogLevel::Debug),
            _ => Some(LogLevel::Trace),
        }
    }
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start every service and supervise until signalled
    Run(RunArgs),

    /// Validate the configuration and environment without spawning anything
    Check,

    /// Print the start order of the enabled services
    Order,

    /// Query a running supervisor
    Status(StatusArgs),

    /// Start a service on a running supervisor
    Start(ActionArgs),

    /// Stop a service on a running supervisor
    Stop(ActionArgs),

    /// Restart a service on a running supervisor
    Restart(ActionArgs),

    /// Configuration file operations
    #[command(subcommand)]
    Config(ConfigCommands),
}

impl Commands {
    /// Lifecycle action and its arguments for start/stop/restart.
    pub fn action(&self) -> Option<(ServiceAction, &ActionArgs)> {
        match self {
            Commands::Start(args) => Some((ServiceAction::Start, args)),
            Commands::Stop(args) => Some((ServiceAction::Stop, args)),
            Commands::Restart(args) => Some((ServiceAction::Restart, args)),
            _ => None,
        }
    }
}

/// Arguments for the `run` subcommand.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Keep going when a service fails to start
    #[arg(long)]
    pub best_effort: bool,
}

/// Arguments for the `status` subcommand.
#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Status API URL (defaults to the configured status_api address)
    #[arg(short, long)]
    pub target: Option<String>,

    /// Show a single service
    #[arg(short, long)]
    pub service: Option<String>,
}

/// Arguments for the lifecycle subcommands.
#[derive(Debug, Args)]
pub struct ActionArgs {
    /// Target service name
    pub service: String,

    /// Status API URL (defaults to the configured status_api address)
    #[arg(short, long)]
    pub target: Option<String>,
}

/// Configuration subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_debug() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_command() {
        let cli = Cli::parse_from(["kanshi", "run"]);

        match cli.command {
            Commands::Run(args) => assert!(!args.best_effort),
            _ => panic!("Expected Run command"),
        }

        let cli = Cli::parse_from(["kanshi", "run", "--best-effort"]);
        match cli.command {
            Commands::Run(args) => assert!(args.best_effort),
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_check_and_order() {
        assert!(matches!(
            Cli::parse_from(["kanshi", "check"]).command,
            Commands::Check
        ));
        assert!(matches!(
            Cli::parse_from(["kanshi", "order"]).command,
            Commands::Order
        ));
    }

    #[test]
    fn test_status_command() {
        let cli = Cli::parse_from([
            "kanshi",
            "status",
            "--target",
            "http://127.0.0.1:7171",
            "--service",
            "api",
        ]);

        match cli.command {
            Commands::Status(args) => {
                assert_eq!(args.target.as_deref(), Some("http://127.0.0.1:7171"));
                assert_eq!(args.service.as_deref(), Some("api"));
            }
            _ => panic!("Expected Status command"),
        }
    }

    #[test]
    fn test_action_commands() {
        let cli = Cli::parse_from(["kanshi", "restart", "worker"]);
        let (action, args) = cli.command.action().unwrap();
        assert_eq!(action, ServiceAction::Restart);
        assert_eq!(args.service, "worker");
        assert!(args.target.is_none());

        let cli = Cli::parse_from(["kanshi", "stop", "worker", "-t", "http://host:7070"]);
        let (action, args) = cli.command.action().unwrap();
        assert_eq!(action, ServiceAction::Stop);
        assert_eq!(args.target.as_deref(), Some("http://host:7070"));

        assert!(Cli::parse_from(["kanshi", "check"]).command.action().is_none());
    }

    #[test]
    fn test_action_requires_service() {
        assert!(Cli::try_parse_from(["kanshi", "start"]).is_err());
    }

    #[test]
    fn test_config_show() {
        let cli = Cli::parse_from(["kanshi", "config", "show"]);

        match cli.command {
            Commands::Config(ConfigCommands::Show) => {}
            _ => panic!("Expected Config Show command"),
        }
    }

    #[test]
    fn test_global_config_option() {
        let cli = Cli::parse_from(["kanshi", "-c", "/custom/kanshi.yaml", "check"]);

        assert_eq!(cli.config, Some(PathBuf::from("/custom/kanshi.yaml")));
    }

    #[test]
    fn test_verbose_levels() {
        let cli = Cli::parse_from(["kanshi", "check"]);
        assert_eq!(cli.level_override(), None);

        let cli = Cli::parse_from(["kanshi", "-v", "check"]);
        assert_eq!(cli.level_override(), Some(LogLevel::Debug));

        let cli = Cli::parse_from(["kanshi", "-vvv", "check"]);
        assert_eq!(cli.level_override(), Some(LogLevel::Trace));
    }

    #[test]
    fn test_quiet_mode() {
        let cli = Cli::parse_from(["kanshi", "-q", "check"]);
        assert_eq!(cli.level_override(), Some(LogLevel::Error));
    }

    #[test]
    fn test_unknown_subcommand() {
        let err = Cli::try_parse_from(["kanshi", "serve"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidSubcommand);
    }
}
