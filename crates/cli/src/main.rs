//! simlane CLI - builds and runs test apps on simulators and devices.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use simlane_core::{TargetDevice, TaskLog};
use simlane_execution::{HarnessConfig, RunSummary, Scheduler, Services, TaskReport};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "simlane")]
#[command(about = "Test scheduler for simulators and devices", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, short, global = true, default_value = "simlane.toml")]
    config: PathBuf,

    /// Log debug output
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and run every configured project
    Run {
        /// Write the run summary as JSON
        #[arg(long)]
        summary: Option<PathBuf>,

        /// Print the last log lines of failed tasks
        #[arg(long, default_value = "20")]
        tail: usize,
    },
    /// List available simulators
    ListSimulators,
    /// List attached devices
    ListDevices,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = load_config(&cli.config)?;
    let services = Arc::new(Services::from_config(&config));

    match cli.command {
        Commands::Run { summary, tail } => {
            let mut scheduler = Scheduler::new(Arc::clone(&services));
            scheduler.populate(&config)?;
            let result = scheduler.run().await;

            print_summary(&scheduler, &result, tail);
            if let Some(path) = summary {
                std::fs::write(&path, result.to_json()?)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                info!("summary written to {}", path.display());
            }
            let code = result.exit_code();
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::ListSimulators => {
            let simulators = services.catalog.simulators();
            simulators.load(false).await?;

            let runtimes = simulators.runtimes().collect().await;
            println!("Runtimes ({})", runtimes.len());
            for runtime in runtimes {
                println!("  {} | {}", runtime.identifier, runtime.name);
            }

            let devices = simulators.devices().collect().await;
            println!("Simulators ({})", devices.len());
            for device in devices {
                println!("  {} | {} | {}", device.udid, device.name, device.runtime);
            }

            let pairs = simulators.pairs().collect().await;
            println!("Pairs ({})", pairs.len());
            for pair in pairs {
                println!("  {} <-> {}", pair.gizmo, pair.companion);
            }
        }
        Commands::ListDevices => {
            let devices = services.catalog.devices();
            devices.load(false).await?;

            let all = devices.all().collect().await;
            println!("Devices ({})", all.len());
            for device in all {
                println!(
                    "  {} | {} | {:?} | {:?}{}",
                    device.udid,
                    device.name,
                    device.device_class,
                    device.speed_rank(),
                    device
                        .companion_identifier
                        .as_deref()
                        .map(|phone| format!(" | paired with {phone}"))
                        .unwrap_or_default(),
                );
            }
        }
    }

    Ok(())
}

/// Read the configuration, falling back to defaults if the default file is absent.
fn load_config(path: &Path) -> Result<HarnessConfig> {
    if !path.exists() && path == Path::new("simlane.toml") {
        warn!("no simlane.toml found, using defaults");
        return Ok(HarnessConfig::default());
    }
    HarnessConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
}

fn print_summary(scheduler: &Scheduler, summary: &RunSummary, tail: usize) {
    println!("Tasks ({})", summary.total);
    for report in &summary.tasks {
        for task in report.flatten() {
            print_task(task);
            if tail > 0 && task.members.is_empty() && task.phase.is_failed() {
                if let Some(found) = scheduler.find(task.id) {
                    print_tail(&found.core().log(), tail);
                }
            }
        }
    }
    println!("{summary}");
}

fn print_task(task: &TaskReport) {
    let known = task
        .known_failure
        .as_deref()
        .map(|note| format!(" [known failure: {note}]"))
        .unwrap_or_default();
    println!(
        "  {} | {} | {} | {:.1}s (waited {:.1}s){}",
        task.id, task.state, task.name, task.duration_secs, task.waiting_secs, known
    );
    if let Some(message) = &task.failure_message {
        println!("      {message}");
    }
}

fn print_tail(log: &TaskLog, lines: usize) {
    for line in log.tail(lines).lines() {
        println!("      > {line}");
    }
}
