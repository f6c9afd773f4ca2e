//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use sentinel_lib::pipeline::{GroupOutcome, RunSummary};
use tabled::{settings::Style, Table, Tabled};

/// Output format for the run summary
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

#[derive(Tabled)]
struct GroupRow {
    #[tabled(rename = "Group")]
    group: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Classified")]
    classified: String,
    #[tabled(rename = "Warnings")]
    warnings: String,
    #[tabled(rename = "Anomalies")]
    anomalies: String,
    #[tabled(rename = "Skipped Points")]
    skipped_points: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

/// Print the anomaly run summary to stdout
pub fn print_summary(summary: &RunSummary, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(summary)?);
        }
        OutputFormat::Table => {
            if summary.groups.is_empty() {
                println!("{}", "No selector groups found".yellow());
                return Ok(());
            }

            let rows: Vec<GroupRow> = summary
                .groups
                .iter()
                .map(|report| {
                    let outcome = color_outcome(&report.outcome);
                    match &report.outcome {
                        GroupOutcome::Written {
                            classified,
                            warnings,
                            anomalies,
                            skipped_points,
                        } => GroupRow {
                            group: report.group.to_string(),
                            outcome,
                            classified: classified.to_string(),
                            warnings: warnings.to_string(),
                            anomalies: color_count(*anomalies),
                            skipped_points: skipped_points.to_string(),
                            detail: String::new(),
                        },
                        GroupOutcome::Skipped { reason } => GroupRow {
                            group: report.group.to_string(),
                            outcome,
                            classified: "-".to_string(),
                            warnings: "-".to_string(),
                            anomalies: "-".to_string(),
                            skipped_points: "-".to_string(),
                            detail: reason.clone(),
                        },
                        GroupOutcome::Failed { error } => GroupRow {
                            group: report.group.to_string(),
                            outcome,
                            classified: "-".to_string(),
                            warnings: "-".to_string(),
                            anomalies: "-".to_string(),
                            skipped_points: "-".to_string(),
                            detail: error.clone(),
                        },
                    }
                })
                .collect();

            println!("{}", Table::new(rows).with(Style::rounded()));
            println!(
                "{} groups, {} warnings, {} anomalies",
                summary.groups.len(),
                summary.total_warnings(),
                summary.total_anomalies()
            );
        }
    }
    Ok(())
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

fn color_outcome(outcome: &GroupOutcome) -> String {
    let label = outcome.label();
    match outcome {
        GroupOutcome::Written { .. } => label.green().to_string(),
        GroupOutcome::Skipped { .. } => label.yellow().to_string(),
        GroupOutcome::Failed { .. } => label.red().to_string(),
    }
}

fn color_count(anomalies: usize) -> String {
    if anomalies > 0 {
        anomalies.to_string().red().bold().to_string()
    } else {
        anomalies.to_string()
    }
}
