//! `check-time`: predict the time left before a metric saturates

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Args, ValueEnum};
use sentinel_lib::error::{EngineError, EngineResult};
use sentinel_lib::observability::LogContext;
use sentinel_lib::pipeline::{
    check_time, status_line, SaturationReport, SaturationSettings, SaturationStatus,
};
use sentinel_lib::predictor::{Regression, ValueNormalizer, ValueType};
use sentinel_lib::source::{InfluxConnection, InfluxDataSource, QueryTarget, Schema};
use sentinel_lib::timeparse::parse_duration;

use super::run_id;
use crate::config::DbArgs;

/// Exit code for configuration, usage and runtime failures
pub const EXIT_UNKNOWN: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DbType {
    /// The metric is its own column
    Icinga,
    /// A kpi column names the metric, a value column holds it
    Telegraf,
}

#[derive(Debug, Clone, Args)]
pub struct CheckTimeArgs {
    /// Range of time to analyze, e.g. 1w2d3h4m5.6s
    #[arg(short = 'n', long)]
    pub window: String,

    /// WARNING (exit 1) when the predicted time left is at or below this
    #[arg(short = 'w', long)]
    pub warning_threshold: String,

    /// CRITICAL (exit 2) when the predicted time left is at or below this
    #[arg(short = 'c', long)]
    pub critical_threshold: String,

    /// Layout of the measurement
    #[arg(long, value_enum)]
    pub db_type: DbType,

    /// Measurement to query
    #[arg(long)]
    pub measurement: String,

    /// usage, usage_percentile, usage_quantile, free, free_percentile or free_quantile
    #[arg(long, default_value = "usage")]
    pub value_type: String,

    /// Column holding the saturation level
    #[arg(long)]
    pub max_column: Option<String>,

    /// Constant saturation level, instead of --max-column
    #[arg(long)]
    pub max_value: Option<f64>,

    /// Extra InfluxQL condition for the WHERE clause,
    /// e.g. "host = 'myhost' AND disk = 'sda'"
    #[arg(long, default_value = "")]
    pub filter: String,

    /// Column to analyze (icinga)
    #[arg(long)]
    pub target_column: Option<String>,

    /// Kpi to analyze (telegraf)
    #[arg(long)]
    pub target_kpi: Option<String>,

    /// Column holding the kpi names (telegraf, default "kpi")
    #[arg(long)]
    pub kpi_column: Option<String>,

    /// Column holding the kpi values (telegraf, default "value")
    #[arg(long)]
    pub value_column: Option<String>,

    /// ordinary or bayesian
    #[arg(long, default_value = "bayesian")]
    pub regression: String,

    /// Write the data, fit and projection as JSON to this path
    #[arg(long, alias = "debug-plot")]
    pub debug_dump: Option<PathBuf>,

    /// Database to read from, overrides the settings
    #[arg(long)]
    pub database: Option<String>,

    #[command(flatten)]
    pub db: DbArgs,
}

/// Prints exactly one status line to stdout and maps it to the exit code
pub async fn run(args: CheckTimeArgs) -> ExitCode {
    match execute(&args).await {
        Ok((status, report)) => {
            println!("{}", status_line(status, &report));
            ExitCode::from(status.exit_code())
        }
        Err(e) => {
            println!("UNKNOWN: {:#}", e);
            ExitCode::from(EXIT_UNKNOWN)
        }
    }
}

async fn execute(args: &CheckTimeArgs) -> Result<(SaturationStatus, SaturationReport)> {
    let settings = saturation_settings(args)?;
    let target = query_target(args)?;

    let mut db = args.db.load()?;
    if let Some(database) = &args.database {
        db.database = database.clone();
    }

    let log = LogContext::new("check-time", run_id());
    log.log_run_started(&db.redacted());

    let connection = Arc::new(InfluxConnection::connect(&db)?);
    let source = InfluxDataSource::new(connection, target);
    let report = check_time(&source, &settings, &log).await?;

    let status = SaturationStatus::evaluate(&report, settings.warning_secs, settings.critical_secs);
    Ok((status, report))
}

fn saturation_settings(args: &CheckTimeArgs) -> EngineResult<SaturationSettings> {
    let value_type: ValueType = args.value_type.parse()?;
    let regression: Regression = args.regression.parse()?;

    if args.max_column.is_some() && args.max_value.is_some() {
        return Err(EngineError::config(
            "--max-column and --max-value are mutually exclusive",
        ));
    }
    if value_type.requires_capacity() && args.max_column.is_none() && args.max_value.is_none() {
        return Err(EngineError::config(format!(
            "value type '{}' needs --max-column or --max-value",
            value_type
        )));
    }

    let mut normalizer = ValueNormalizer::new(value_type);
    if let Some(max) = args.max_value {
        normalizer = normalizer.with_fallback_capacity(max);
    }

    let settings = SaturationSettings {
        window_secs: parse_duration(&args.window)?,
        warning_secs: parse_duration(&args.warning_threshold)?,
        critical_secs: parse_duration(&args.critical_threshold)?,
        normalizer,
        regression,
        debug_dump: args.debug_dump.clone(),
    };
    settings.validate()?;
    Ok(settings)
}

fn query_target(args: &CheckTimeArgs) -> EngineResult<QueryTarget> {
    let schema = match args.db_type {
        DbType::Icinga => {
            if args.target_kpi.is_some() || args.kpi_column.is_some() || args.value_column.is_some() {
                return Err(EngineError::config(
                    "--target-kpi, --kpi-column and --value-column only apply to --db-type telegraf",
                ));
            }
            let target_column = args.target_column.clone().ok_or_else(|| {
                EngineError::config("--db-type icinga requires --target-column")
            })?;
            Schema::Icinga { target_column }
        }
        DbType::Telegraf => {
            if args.target_column.is_some() {
                return Err(EngineError::config(
                    "--target-column only applies to --db-type icinga",
                ));
            }
            let target_kpi = args.target_kpi.clone().ok_or_else(|| {
                EngineError::config("--db-type telegraf requires --target-kpi")
            })?;
            Schema::Telegraf {
                kpi_column: args.kpi_column.clone().unwrap_or_else(|| "kpi".to_string()),
                target_kpi,
                value_column: args.value_column.clone().unwrap_or_else(|| "value".to_string()),
            }
        }
    };

    let mut target = QueryTarget::new(args.measurement.clone(), schema).with_filter(args.filter.clone());
    if let Some(column) = &args.max_column {
        target = target.with_capacity_column(column.clone());
    }
    Ok(target)
}
