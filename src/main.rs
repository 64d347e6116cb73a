//! kanshi - single-host process supervisor
//!
//! Entry point for the kanshi application.

use clap::Parser;
use kanshi::cli::{Cli, Commands, ConfigCommands, StatusArgs};
use kanshi::client::SupervisorClient;
use kanshi::config::Config;
use kanshi::error::exit_code;
use kanshi::registry::ServiceRegistry;
use kanshi::server::response::ServiceAction;
use kanshi::supervisor::ProcessSnapshot;
use kanshi::{runner, KanshiError};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() {
                exit_code::CLI_ERROR
            } else {
                exit_code::SUCCESS
            };
            let _ = e.print();
            return exit_with(code);
        }
    };

    // Remote commands given an explicit --target work without a config file.
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => Some(config),
        Err(e) if needs_config(&cli.command) => {
            eprintln!("Error: {}", e);
            return exit_with(e.exit_code());
        }
        Err(_) => None,
    };

    let logging = config
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_default();
    if let Err(e) = logging.install(cli.level_override()) {
        eprintln!("Failed to initialize logging: {}", e);
        return exit_with(exit_code::GENERAL_ERROR);
    }

    match run(&cli, config) {
        Ok(code) => exit_with(code),
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("Error: {}", e);
            exit_with(e.exit_code())
        }
    }
}

fn exit_with(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn needs_config(command: &Commands) -> bool {
    match command {
        Commands::Status(args) => args.target.is_none(),
        Commands::Start(args) | Commands::Stop(args) | Commands::Restart(args) => {
            args.target.is_none()
        }
        _ => true,
    }
}

/// Main application logic. Returns the process exit code.
fn run(cli: &Cli, config: Option<Config>) -> kanshi::Result<i32> {
    let config = config.ok_or_else(|| KanshiError::config("No configuration loaded"));

    match &cli.command {
        Commands::Run(args) => {
            let config = config?;
            tracing::info!(
                services = config.services.len(),
                status_api = config.status_api.enabled,
                "Starting kanshi"
            );
            runtime()?.block_on(runner::run(&config, args.best_effort))
        }
        Commands::Check => cmd_check(&config?),
        Commands::Order => cmd_order(&config?),
        Commands::Status(args) => {
            let target = target_url(args.target.as_deref(), config.ok())?;
            runtime()?.block_on(cmd_status(&target, args))
        }
        Commands::Config(ConfigCommands::Show) => {
            let yaml = serde_yaml::to_string(&config?).map_err(|e| {
                KanshiError::config_with_source("Failed to serialize configuration", e)
            })?;
            println!("{}", yaml);
            Ok(exit_code::SUCCESS)
        }
        command => {
            let Some((action, args)) = command.action() else {
                return Err(KanshiError::internal("Unhandled command"));
            };
            let target = target_url(args.target.as_deref(), config.ok())?;
            runtime()?.block_on(cmd_action(&target, &args.service, action))
        }
    }
}

fn runtime() -> kanshi::Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new()
        .map_err(|e| KanshiError::internal_with_source("Failed to create async runtime", e))
}

fn target_url(target: Option<&str>, config: Option<Config>) -> kanshi::Result<String> {
    match (target, config) {
        (Some(target), _) => Ok(target.to_string()),
        (None, Some(config)) => Ok(config.status_api.base_url()),
        (None, None) => Err(KanshiError::config(
            "No --target given and no configuration to read status_api from",
        )),
    }
}

/// Handle the `check` command.
fn cmd_check(config: &Config) -> kanshi::Result<i32> {
    match runner::preflight(config) {
        Ok(registry) => {
            println!(
                "✓ Configuration is valid ({} services, {} enabled)",
                registry.len(),
                registry.enabled().count()
            );
            Ok(exit_code::SUCCESS)
        }
        Err(KanshiError::Validation { violations }) => {
            println!("✗ {} problem(s) found:", violations.len());
            for violation in &violations {
                println!("  - {}", violation);
            }
            Ok(exit_code::VALIDATION_FAILURE)
        }
        Err(e) => {
            println!("✗ Configuration is invalid: {}", e);
            Ok(e.exit_code())
        }
    }
}

/// Handle the `order` command.
fn cmd_order(config: &Config) -> kanshi::Result<i32> {
    let registry = ServiceRegistry::new(config.services.clone())?;

    for (i, def) in registry.start_order().iter().enumerate() {
        if def.depends_on.is_empty() {
            println!("{:>3}. {}", i + 1, def.name);
        } else {
            println!(
                "{:>3}. {} (after {})",
                i + 1,
                def.name,
                def.depends_on.join(", ")
            );
        }
    }
    Ok(exit_code::SUCCESS)
}

/// Handle the `status` command.
async fn cmd_status(target: &str, args: &StatusArgs) -> kanshi::Result<i32> {
    let client = SupervisorClient::new(target)?;

    if let Some(service) = &args.service {
        let snapshot = client.service(service).await?;
        print_snapshot(&snapshot);
        return Ok(exit_code::SUCCESS);
    }

    let health = client.health().await?;
    println!("Supervisor Status");
    println!("=================");
    println!("Target: {}", client.base_url());
    println!("Status: {}", health.status);
    println!("Version: {}", health.version);
    println!("Uptime: {}s", health.uptime_seconds);
    println!(
        "Running: {}/{}",
        health.services_running, health.services_total
    );

    let list = client.services(None).await?;
    println!();
    println!(
        "{:<20} {:<11} {:>8} {:>9} {:>9}",
        "SERVICE", "STATE", "PID", "RESTARTS", "FAILURES"
    );
    for s in &list.services {
        println!(
            "{:<20} {:<11} {:>8} {:>9} {:>9}",
            s.name,
            s.state.to_string(),
            s.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
            s.restart_count,
            s.consecutive_failures
        );
    }
    Ok(exit_code::SUCCESS)
}

fn print_snapshot(snapshot: &ProcessSnapshot) {
    println!("Service: {}", snapshot.name);
    println!("State: {}", snapshot.state);
    if let Some(pid) = snapshot.pid {
        println!("PID: {}", pid);
    }
    if let Some(started) = snapshot.started_at {
        println!("Started: {}", started.to_rfc3339());
    }
    if let Some(probed) = snapshot.last_probe_at {
        println!("Last Probe: {}", probed.to_rfc3339());
    }
    println!("Restarts: {}", snapshot.restart_count);
    println!("Consecutive Failures: {}", snapshot.consecutive_failures);
    if let Some(err) = &snapshot.last_error {
        println!("Last Error: {}", err);
    }
}

/// Handle the `start`, `stop` and `restart` commands.
async fn cmd_action(target: &str, service: &str, action: ServiceAction) -> kanshi::Result<i32> {
    tracing::info!(target = %target, service = %service, action = %action, "Sending service action");

    let client = SupervisorClient::new(target)?;
    let result = client.action(service, action).await?;

    println!("Service: {}", result.service);
    println!("Action: {}", result.action);
    println!("Previous State: {}", result.previous_state);
    println!("Current State: {}", result.current_state);
    if let Some(outcome) = result.stop_outcome {
        println!("Stop: {:?}", outcome);
    }
    println!("Duration: {}ms", result.duration_ms);
    Ok(exit_code::SUCCESS)
}
