// CLI module - thin operator surface over the supervisor core

use crate::config::AppConfig;
use crate::error::{Result, VigilError};
use crate::process::{StopCause, Supervisor};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(
    name = "vigil",
    about = "Single-process supervisor with bounded-retry restarts",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run every app defined in a config file until Ctrl-C
    Run {
        /// Path to a TOML or JSON config file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Validate a config file without spawning anything
    Check {
        /// Path to a TOML or JSON config file
        #[arg(short, long)]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse arguments and execute the selected command
    pub fn run() -> Result<()> {
        let cli = Cli::parse();

        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();

        match cli.command {
            Command::Run { config } => {
                let apps = AppConfig::from_file(&config)?;
                let runtime = tokio::runtime::Runtime::new()?;
                runtime.block_on(run_apps(apps))
            }
            Command::Check { config } => {
                let apps = AppConfig::from_file(&config)?;
                println!(
                    "{} valid app definition(s) in {}",
                    apps.len(),
                    config.display()
                );
                Ok(())
            }
        }
    }
}

/// Run one supervisor per app until Ctrl-C or until every supervisor has
/// stopped on its own. Exits nonzero if any app exhausted its restart
/// budget.
async fn run_apps(apps: Vec<AppConfig>) -> Result<()> {
    let mut supervisors = Vec::with_capacity(apps.len());

    for app in apps {
        let (spec, policy) = app.split();
        let name = spec.name.clone();

        let mut supervisor = Supervisor::new();
        supervisor.start(spec, policy)?;
        info!(name = %name, "supervising");

        supervisors.push((name, supervisor));
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
        }
        _ = wait_all(&mut supervisors) => {
            info!("all supervised processes have stopped");
        }
    }

    // stop() returns only after its child has actually been terminated
    // (stop signal, then forced kill after the grace period), so every
    // child is gone before the final report and before the process exits.
    for (_, supervisor) in &mut supervisors {
        supervisor.stop().await;
    }

    let mut exhausted = None;
    for (name, supervisor) in &supervisors {
        let status = supervisor.status();
        info!(
            name = %name,
            state = %status.state,
            restarts = status.restarts,
            "final status"
        );
        if status.stop_cause == Some(StopCause::BudgetExhausted) {
            error!(
                name = %name,
                restarts = status.restarts,
                "gave up after exhausting restart budget"
            );
            exhausted.get_or_insert_with(|| name.clone());
        }
    }

    match exhausted {
        Some(name) => Err(VigilError::RestartBudgetExhausted(name)),
        None => Ok(()),
    }
}

async fn wait_all(supervisors: &mut [(String, Supervisor)]) {
    for (_, supervisor) in supervisors.iter_mut() {
        supervisor.wait().await;
    }
}
