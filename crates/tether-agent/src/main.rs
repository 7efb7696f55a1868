//! # tether-agent
//!
//! Operational entry point: inspects the effective settings and tool set,
//! and runs or tears down app processes with the same process manager the
//! runtime uses.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tether_core::ids::AppId;
use tether_engine::{create_default_registry, RegistryDeps, TaskStore};
use tether_process::{container, LogStore, ProcessConfig, ProcessManager};
use tether_settings::TetherSettings;
use tether_telemetry::{init_telemetry, TelemetryConfig};
use tokio::process::Command;
use tracing::info;

/// Tether agent tooling.
#[derive(Parser, Debug)]
#[command(name = "tether-agent", about = "Tether execution core tooling")]
struct Cli {
    /// Settings file to use instead of `~/.tether/settings.json`.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the built-in tool definitions as JSON.
    Tools,
    /// Print the effective settings as JSON.
    Settings,
    /// Run a command as the app's process until it exits or Ctrl-C.
    Run {
        app_id: i64,
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
    /// Stop the app's container.
    StopContainer {
        app_id: i64,
        /// Container name, defaults to `{container_prefix}-{app_id}`.
        #[arg(long)]
        name: Option<String>,
    },
    /// Remove the app's dependency-cache volume.
    CleanVolumes { app_id: i64 },
}

fn load_settings(path: Option<&PathBuf>) -> Result<TetherSettings> {
    match path {
        Some(path) => tether_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => tether_settings::load_settings().context("Failed to load settings"),
    }
}

fn process_manager(settings: &TetherSettings) -> ProcessManager {
    ProcessManager::new(
        ProcessConfig::from(&settings.process),
        LogStore::new(settings.logs.max_entries_per_app),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(cli.settings.as_ref())?;

    init_telemetry(TelemetryConfig::from(&settings.telemetry)).context("Failed to initialize logging")?;

    match cli.command {
        Commands::Tools => {
            let registry = create_default_registry(RegistryDeps::from_settings(&settings, TaskStore::new()))
                .context("Failed to build tool registry")?;
            println!("{}", serde_json::to_string_pretty(&registry.definitions())?);
        }
        Commands::Settings => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        Commands::Run { app_id, command } => {
            run_app(&settings, AppId::new(app_id), &command).await?;
        }
        Commands::StopContainer { app_id, name } => {
            let manager = process_manager(&settings);
            let name = name.unwrap_or_else(|| manager.default_container_name(AppId::new(app_id)));
            container::stop_container(&manager.config().container_runtime, &name).await;
        }
        Commands::CleanVolumes { app_id } => {
            process_manager(&settings)
                .remove_volumes(AppId::new(app_id))
                .await;
        }
    }

    Ok(())
}

async fn run_app(settings: &TetherSettings, app_id: AppId, command: &[String]) -> Result<()> {
    let (program, args) = command.split_first().context("No command given")?;
    let child = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to spawn {program}"))?;

    let manager = process_manager(settings);
    let handle = manager.record_host(app_id, child);
    info!(%app_id, run = handle.run_number(), "app started, Ctrl-C to stop");

    let mut printed_up_to = 0;
    let mut ticker = tokio::time::interval(Duration::from_millis(200));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                manager.stop(app_id).await;
                break;
            }
            _ = ticker.tick() => {
                printed_up_to = print_new_logs(&manager, app_id, printed_up_to);
                if !manager.is_running(app_id) {
                    break;
                }
            }
        }
    }
    print_new_logs(&manager, app_id, printed_up_to);
    Ok(())
}

/// Print entries added after `after_seq` and return the last sequence printed.
fn print_new_logs(manager: &ProcessManager, app_id: AppId, after_seq: u64) -> u64 {
    let mut last = after_seq;
    for entry in manager.logs().logs_since(app_id, after_seq) {
        println!("[{}] {:?}: {}", entry.timestamp.format("%H:%M:%S"), entry.level, entry.message);
        last = entry.seq;
    }
    last
}
