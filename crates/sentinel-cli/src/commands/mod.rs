//! Subcommand implementations

pub mod anomaly;
pub mod check_time;

/// Identifies one invocation in the logs
pub fn run_id() -> String {
    format!(
        "{}-{}",
        chrono::Utc::now().format("%Y%m%dT%H%M%S"),
        std::process::id()
    )
}
