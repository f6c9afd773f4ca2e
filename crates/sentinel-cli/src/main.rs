//! Influx Sentinel CLI
//!
//! Two monitoring plugins over InfluxDB data: `check-time` predicts when a
//! metric will saturate and reports in the OK/WARNING/CRITICAL convention,
//! `anomaly-detection` flags unusual points against weekly thresholds.

mod commands;
mod config;
mod output;

use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use commands::{anomaly, check_time};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Influx Sentinel
#[derive(Parser)]
#[command(name = "sentinel")]
#[command(author, version, about = "Saturation forecasting and anomaly detection for InfluxDB metrics", long_about = None)]
pub struct Cli {
    /// Logging verbosity; RUST_LOG takes precedence when set
    #[arg(long, global = true, value_enum, default_value = "info")]
    pub verbosity: Verbosity,

    /// Log line format on stderr
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Predict the time left before a metric saturates
    CheckTime(check_time::CheckTimeArgs),

    /// Classify recent points of every selector group as normal, warning or anomaly
    AnomalyDetection(anomaly::AnomalyArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Verbosity {
    Debug,
    Info,
    Warn,
    Critical,
}

impl Verbosity {
    fn directive(self) -> &'static str {
        match self {
            Verbosity::Debug => "debug",
            Verbosity::Info => "info",
            Verbosity::Warn => "warn",
            Verbosity::Critical => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

fn init_tracing(verbosity: Verbosity, format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(verbosity.directive()));
    let registry = tracing_subscriber::registry().with(filter);

    // stdout carries the status line or summary only
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_ansi(false))
            .init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // help and version go to stdout and are not failures
            return if e.use_stderr() {
                ExitCode::from(check_time::EXIT_UNKNOWN)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_tracing(cli.verbosity, cli.log_format);

    match cli.command {
        Commands::CheckTime(args) => check_time::run(args).await,
        Commands::AnomalyDetection(args) => anomaly::run(args).await,
    }
}
