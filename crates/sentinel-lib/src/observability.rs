//! Structured logging context
//!
//! A `LogContext` is created once per run and handed to every component
//! call. It carries the run identity (tool, run id, selector group) in a
//! `tracing` span so events emitted from anywhere in the engine are
//! attributed without touching global logger state.

use tracing::{debug, info, warn, Span};

use crate::models::{BucketKey, SelectorGroup};

#[derive(Clone)]
pub struct LogContext {
    tool: &'static str,
    run_id: String,
    group: Option<String>,
    span: Span,
}

impl LogContext {
    pub fn new(tool: &'static str, run_id: impl Into<String>) -> Self {
        let run_id = run_id.into();
        let span = tracing::info_span!("run", tool = tool, run_id = %run_id);
        Self {
            tool,
            run_id,
            group: None,
            span,
        }
    }

    /// A context that attaches to no particular run, handy in tests
    pub fn detached(tool: &'static str) -> Self {
        Self::new(tool, "detached")
    }

    /// Child context scoped to one selector group
    pub fn for_group(&self, group: &SelectorGroup) -> Self {
        let rendered = group.to_string();
        let span = tracing::info_span!(parent: &self.span, "group", selector = %rendered);
        Self {
            tool: self.tool,
            run_id: self.run_id.clone(),
            group: Some(rendered),
            span,
        }
    }

    pub fn tool(&self) -> &'static str {
        self.tool
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn log_run_started(&self, settings: &str) {
        let _guard = self.span.enter();
        info!(event = "run_started", settings = %settings, "Starting run");
    }

    pub fn log_points_fetched(&self, window: &str, points: usize) {
        let _guard = self.span.enter();
        info!(event = "points_fetched", window = %window, points = points, "Fetched data");
    }

    pub fn log_trend_fitted(&self, slope: f64, intercept: f64, score: f64) {
        let _guard = self.span.enter();
        info!(
            event = "trend_fitted",
            slope = slope,
            intercept = intercept,
            score = score,
            "Fitted linear trend"
        );
    }

    pub fn log_saturation(&self, time_left: f64, score: f64) {
        let _guard = self.span.enter();
        if time_left.is_infinite() {
            info!(
                event = "saturation_predicted",
                score = score,
                "Trend is not growing, saturation is never reached"
            );
        } else {
            info!(
                event = "saturation_predicted",
                time_left_secs = time_left,
                score_percent = score * 100.0,
                "Predicted time left before saturation"
            );
        }
    }

    pub fn log_status(&self, status: &str, warning_secs: f64, critical_secs: f64) {
        let _guard = self.span.enter();
        match status {
            "CRITICAL" => warn!(
                event = "status",
                status = %status,
                warning_secs = warning_secs,
                critical_secs = critical_secs,
                "Critical threshold crossed"
            ),
            "WARNING" => warn!(
                event = "status",
                status = %status,
                warning_secs = warning_secs,
                critical_secs = critical_secs,
                "Warning threshold crossed"
            ),
            _ => info!(event = "status", status = %status, "Saturation not within thresholds"),
        }
    }

    pub fn log_groups_found(&self, count: usize) {
        let _guard = self.span.enter();
        info!(event = "groups_found", count = count, "Unique selector combinations found");
    }

    pub fn log_thresholds_trained(&self, buckets: usize, samples: usize) {
        let _guard = self.span.enter();
        info!(
            event = "thresholds_trained",
            buckets = buckets,
            samples = samples,
            "Computed bucket thresholds"
        );
    }

    pub fn log_bucket(&self, key: &BucketKey, warning: f64, anomaly: f64, samples: usize) {
        let _guard = self.span.enter();
        debug!(
            event = "bucket_thresholds",
            bucket = %key,
            warning = warning,
            anomaly = anomaly,
            samples = samples,
            "Bucket thresholds"
        );
    }

    pub fn log_missing_bucket(&self, key: &BucketKey) {
        let _guard = self.span.enter();
        warn!(
            event = "missing_bucket",
            bucket = %key,
            "No training data for bucket, point skipped"
        );
    }

    pub fn log_classified(&self, points: usize, warnings: usize, anomalies: usize) {
        let _guard = self.span.enter();
        info!(
            event = "points_classified",
            points = points,
            warnings = warnings,
            anomalies = anomalies,
            "Classified live window"
        );
    }

    pub fn log_group_skipped(&self, reason: &str) {
        let _guard = self.span.enter();
        info!(event = "group_skipped", reason = %reason, "Skipping selector group");
    }

    pub fn log_group_failed(&self, error: &str) {
        let _guard = self.span.enter();
        warn!(event = "group_failed", error = %error, "Selector group failed");
    }

    pub fn log_written(&self, sink: &str, points: usize) {
        let _guard = self.span.enter();
        info!(event = "results_written", sink = %sink, points = points, "Wrote classifications");
    }
}
