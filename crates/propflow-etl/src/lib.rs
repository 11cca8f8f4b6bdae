//! Propflow ETL Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Moves property data extracts from a remote file server to partitioned,
//! filtered archives delivered to object storage and/or an FTP folder.
//!
//! # Overview
//!
//! - **Transfer**: resumable FTP/FTPS and HTTPS downloads with retry ([`transfer`])
//! - **Extraction**: integrity check and per-archive staging folders ([`extract`])
//! - **County selection**: nested per-county archives picked by FIPS code ([`fips`])
//! - **Filtering**: single-pass partition filter over delimited text ([`filter`])
//! - **Archiving**: repackaging with a naming policy ([`archive`])
//! - **Delivery**: sinks, verification and the cleanup table ([`upload`])
//! - **Orchestration**: [`pipeline::EtlPipeline`] and the daily [`scheduler`]

pub mod archive;
pub mod artifact;
pub mod config;
pub mod dataset;
pub mod error;
pub mod extract;
pub mod fips;
pub mod filter;
pub mod pipeline;
pub mod postprocess;
pub mod scheduler;
pub mod transfer;
pub mod upload;

pub use config::AppConfig;
pub use dataset::DatasetSpec;
pub use error::{PipelineError, Result};
pub use pipeline::{EtlPipeline, RunSummary};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Propflow - property data ETL
#[derive(Parser, Debug)]
#[command(name = "propflow")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (JSON or TOML)
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_PATH, global = true)]
    pub config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every enabled dataset once
    Run,

    /// Run every day at `schedule.daily_time`
    Schedule {
        /// Also run immediately on startup
        #[arg(long)]
        now: bool,
    },
}
