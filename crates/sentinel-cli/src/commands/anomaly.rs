//! `anomaly-detection`: classify the live window of every selector group

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use sentinel_lib::anomaly::{TailMode, TrainingConfig};
use sentinel_lib::error::{EngineError, EngineResult};
use sentinel_lib::models::BucketGranularity;
use sentinel_lib::observability::LogContext;
use sentinel_lib::pipeline::{anomaly_detection, AnomalySettings, RunSummary};
use sentinel_lib::source::{
    DryRunSink, FileSink, InfluxConnection, InfluxDataSource, InfluxSink, QueryTarget, Schema, Sink,
};
use sentinel_lib::timeparse::{parse_duration, SECS_PER_DAY, SECS_PER_HOUR};

use super::run_id;
use crate::config::DbArgs;
use crate::output::{print_error, print_summary, OutputFormat};

/// Exit code when at least one group failed
pub const EXIT_GROUP_FAILED: u8 = 1;
/// Exit code for configuration errors
pub const EXIT_CONFIG: u8 = 3;

#[derive(Debug, Clone, Args)]
pub struct AnomalyArgs {
    /// Column holding the data to analyze
    #[arg(long)]
    pub field: String,

    /// Comma separated tag columns to group by, e.g. host,service,disk
    #[arg(long, value_delimiter = ',', required = true)]
    pub selectors: Vec<String>,

    /// Extra InfluxQL condition for the WHERE clauses
    #[arg(long, default_value = "")]
    pub filter: String,

    /// How much time to analyze, counted back from now
    #[arg(long, default_value = "1h")]
    pub window: String,

    /// Training timeframe, counted back from now
    #[arg(long, default_value = "4w")]
    pub training_timeframe: String,

    /// Tail probability below which a point is a warning
    #[arg(long, default_value_t = 0.05)]
    pub warning: f64,

    /// Tail probability below which a point is an anomaly
    #[arg(long, default_value_t = 0.02)]
    pub anomaly: f64,

    /// Width of the weekly buckets: 1h (weekday and hour) or 1d (weekday)
    #[arg(long, default_value = "1h")]
    pub group_by_time: String,

    /// Only flag values that are too high
    #[arg(long)]
    pub ignore_lower_values: bool,

    /// Classify but write nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Write JSON files instead of writing to the output database
    #[arg(long)]
    pub write_to_file: bool,

    /// Directory for --write-to-file
    #[arg(long, default_value = "debug")]
    pub output_dir: PathBuf,

    /// Database to read from, overrides the settings
    #[arg(long)]
    pub input_database: Option<String>,

    #[arg(long)]
    pub input_measurement: String,

    #[arg(long, default_value = "icinga2_ml")]
    pub output_database: String,

    #[arg(long)]
    pub output_measurement: String,

    /// Selector groups processed concurrently
    #[arg(long, default_value_t = 1)]
    pub parallelism: usize,

    /// Summary format
    #[arg(long, short, value_enum, default_value = "table")]
    pub format: OutputFormat,

    #[command(flatten)]
    pub db: DbArgs,
}

pub async fn run(args: AnomalyArgs) -> ExitCode {
    match execute(&args).await {
        Ok(summary) => {
            if let Err(e) = print_summary(&summary, args.format) {
                print_error(&format!("{:#}", e));
            }
            if summary.has_failures() {
                ExitCode::from(EXIT_GROUP_FAILED)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            print_error(&format!("{:#}", e));
            match e.downcast_ref::<EngineError>() {
                Some(engine) if engine.is_fatal() => ExitCode::from(EXIT_CONFIG),
                _ => ExitCode::from(EXIT_GROUP_FAILED),
            }
        }
    }
}

async fn execute(args: &AnomalyArgs) -> Result<RunSummary> {
    let settings = anomaly_settings(args)?;

    let db = args.db.load()?;
    let input = match &args.input_database {
        Some(database) => db.with_database(database.clone()),
        None => db,
    };

    let log = LogContext::new("anomaly-detection", run_id());
    log.log_run_started(&input.redacted());

    let connection = Arc::new(InfluxConnection::connect(&input)?);
    let target = QueryTarget::new(
        args.input_measurement.clone(),
        Schema::Icinga {
            target_column: args.field.clone(),
        },
    )
    .with_filter(args.filter.clone());
    let source = InfluxDataSource::new(connection.clone(), target);

    let sink: Box<dyn Sink> = if args.dry_run {
        Box::new(DryRunSink)
    } else if args.write_to_file {
        Box::new(FileSink::new(
            args.output_dir.clone(),
            args.output_database.clone(),
            args.output_measurement.clone(),
        ))
    } else {
        Box::new(InfluxSink::new(
            connection,
            args.output_database.clone(),
            args.output_measurement.clone(),
        ))
    };

    anomaly_detection(&source, sink.as_ref(), &settings, &log).await
}

fn anomaly_settings(args: &AnomalyArgs) -> EngineResult<AnomalySettings> {
    for (name, p) in [("warning", args.warning), ("anomaly", args.anomaly)] {
        if !(p > 0.0 && p <= 1.0) {
            return Err(EngineError::config(format!(
                "--{} must be a probability in (0, 1], got {}",
                name, p
            )));
        }
    }
    if args.anomaly >= args.warning {
        return Err(EngineError::config(format!(
            "--anomaly ({}) must be smaller than --warning ({})",
            args.anomaly, args.warning
        )));
    }

    let selectors: Vec<String> = args
        .selectors
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if selectors.is_empty() {
        return Err(EngineError::config("--selectors needs at least one column"));
    }

    let settings = AnomalySettings {
        selectors,
        window_secs: parse_duration(&args.window)?,
        training_timeframe_secs: parse_duration(&args.training_timeframe)?,
        training: TrainingConfig {
            warning_q: 1.0 - args.warning,
            anomaly_q: 1.0 - args.anomaly,
            tail_mode: if args.ignore_lower_values {
                TailMode::OneTailedHigh
            } else {
                TailMode::TwoTailed
            },
            granularity: granularity(&args.group_by_time)?,
        },
        parallelism: args.parallelism,
    };
    settings.validate()?;
    Ok(settings)
}

fn granularity(text: &str) -> EngineResult<BucketGranularity> {
    let secs = parse_duration(text)?;
    if secs == SECS_PER_HOUR as f64 {
        Ok(BucketGranularity::Hourly)
    } else if secs == SECS_PER_DAY as f64 {
        Ok(BucketGranularity::Daily)
    } else {
        Err(EngineError::config(format!(
            "--group-by-time must be 1h or 1d, got '{}'",
            text
        )))
    }
}
