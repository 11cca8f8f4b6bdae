//! Propflow - Main entry point

use anyhow::{Context, Result};
use clap::Parser;
use propflow_common::logging::{init_logging, LogConfig, LogLevel};
use propflow_etl::{AppConfig, Cli, Commands, EtlPipeline, RunSummary};
use std::path::{Path, PathBuf};
use std::process;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .log_file_prefix("propflow")
        .filter_directives("suppaftp=warn,aws_config=warn,aws_smithy_runtime=warn,hyper=warn")
        .build();

    // Environment variables take precedence
    let log_config = match log_config.clone().merge_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Ignoring invalid logging environment: {}", e);
            log_config
        },
    };

    let guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: failed to initialize logging: {}", e);
            process::exit(1);
        },
    };

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let log_file = log_config.current_log_file();
    let code = match execute_command(&cli, cancel, log_file).await {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            1
        },
    };

    // Flush file output before exiting
    drop(guard);
    process::exit(code);
}

/// Returns whether every dataset succeeded
async fn execute_command(cli: &Cli, cancel: CancellationToken, log_file: Option<PathBuf>) -> Result<bool> {
    match cli.command {
        Commands::Run => {
            let summary = run_once(&cli.config, cancel, log_file).await?;
            Ok(!summary.has_failures())
        },
        Commands::Schedule { now } => {
            let config = load_config(&cli.config)?;
            let time = config.schedule.time()?;
            let scheduler = propflow_etl::scheduler::DailyScheduler::new(time, cancel.clone());

            scheduler
                .run(now, || {
                    let cancel = cancel.clone();
                    let log_file = log_file.clone();
                    async move {
                        // Configuration is re-read for every run
                        if let Err(e) = run_once(&cli.config, cancel, log_file).await {
                            error!("Scheduled run failed: {:#}", e);
                        }
                    }
                })
                .await;
            Ok(true)
        },
    }
}

async fn run_once(path: &Path, cancel: CancellationToken, log_file: Option<PathBuf>) -> Result<RunSummary> {
    let config = load_config(path)?;
    let pipeline = EtlPipeline::from_config(config, cancel)
        .context("Failed to initialize pipeline")?
        .with_log_file(log_file);

    let summary = pipeline.run().await;
    print_summary(&summary);
    Ok(summary)
}

fn load_config(path: &Path) -> Result<AppConfig> {
    let config = AppConfig::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    info!(
        "Configuration loaded: {} datasets, partition keys {:?}",
        config.datasets.len(),
        config.partition_keys
    );
    Ok(config)
}

fn print_summary(summary: &RunSummary) {
    println!("Total datasets: {}", summary.total);
    println!("Succeeded: {}", summary.succeeded);
    println!("Failed: {}", summary.failed);
    println!("Skipped: {}", summary.skipped);
    println!("Duration: {:.2}s", summary.duration.as_secs_f64());

    for outcome in summary.datasets.iter().filter(|d| d.error.is_some()) {
        println!(
            "  {}: {}",
            outcome.name,
            outcome.error.as_deref().unwrap_or_default()
        );
    }
    if summary.has_failures() {
        warn!("Some datasets failed to process; check the logs for details");
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, cancelling"),
        _ = terminate => info!("Received terminate signal, cancelling"),
    }
    cancel.cancel();
}
