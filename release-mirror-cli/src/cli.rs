use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use release_mirror::synchronise::{SyncEngine, SynchroniseReport, TargetOutcome};

use crate::load_config::load_config;
use crate::shutdown::install_signal_handler;

#[derive(Parser)]
#[clap(
    name = "release-mirror",
    version,
    about = "Mirror GitHub release assets onto local disk, downloading only what is new"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Synchronise every repository listed in the config file
    Sync {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,

        /// Overrides `state_file` from the config
        #[clap(long)]
        state_file: Option<PathBuf>,

        /// Overrides `max_versions` from the config
        #[clap(long)]
        max_versions: Option<usize>,
    },
}

fn print_summary(report: &SynchroniseReport) {
    println!("Synchronise complete.");
    for target in &report.targets {
        let status = match &target.outcome {
            TargetOutcome::Synchronised => "ok".to_string(),
            TargetOutcome::FetchFailed { reason } => format!("fetch failed: {reason}"),
            TargetOutcome::Cancelled => "cancelled".to_string(),
        };
        println!(
            "  {}: {} new, {} already present, {} failed ({status})",
            target.state_key,
            target.transferred(),
            target.skipped(),
            target.failed.len(),
        );
        for failure in &target.failed {
            println!(
                "    failed {} ({}): {}",
                failure.name, failure.version_label, failure.reason
            );
        }
    }
    if report.cancelled {
        println!("Stopped early on shutdown signal.");
    }
}

/// Async CLI entrypoint shared by `main()` and integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");
    let cancel = install_signal_handler();
    run_with_cancel(cli, &cancel).await
}

pub async fn run_with_cancel(cli: Cli, cancel: &CancellationToken) -> Result<()> {
    let result = match cli.command {
        Commands::Sync {
            config,
            state_file,
            max_versions,
        } => {
            let mut config = load_config(config)?;
            if let Some(path) = state_file {
                config.options = config.options.with_state_file(path);
            }
            if let Some(max) = max_versions {
                config.options.max_versions = max;
            }

            println!("Synchronise starting...");
            let engine = SyncEngine::from_options(&config.options)?;
            match engine.synchronise(&config.targets, cancel).await {
                Ok(report) => {
                    print_summary(&report);
                    tracing::debug!(report = ?report, "Synchronise report");
                    Ok(())
                }
                Err(e) => {
                    eprintln!("[ERROR] Synchronisation failed: {}", e);
                    Err(anyhow::Error::new(e))
                }
            }
        }
    };

    let exit_span = tracing::info_span!("exit");
    exit_span.in_scope(|| {
        tracing::info!(success = result.is_ok(), "exit");
    });
    result
}
