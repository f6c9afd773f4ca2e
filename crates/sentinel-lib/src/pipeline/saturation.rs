//! Saturation check: fit the live window and report time left

use std::fmt;
use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;
use tracing::warn;

use crate::error::{EngineError, EngineResult};
use crate::models::SelectorGroup;
use crate::observability::LogContext;
use crate::predictor::{
    Extrapolator, Prediction, Regression, TrendDiagnostics, ValueNormalizer, MIN_POINTS,
};
use crate::source::DataSource;
use crate::timeparse::format_duration;

/// Inputs of one saturation check
#[derive(Debug, Clone)]
pub struct SaturationSettings {
    pub window_secs: f64,
    /// WARNING when the time left is at or below this
    pub warning_secs: f64,
    /// CRITICAL when the time left is at or below this
    pub critical_secs: f64,
    pub normalizer: ValueNormalizer,
    pub regression: Regression,
    pub debug_dump: Option<PathBuf>,
}

impl SaturationSettings {
    pub fn validate(&self) -> EngineResult<()> {
        if !(self.window_secs.is_finite() && self.window_secs > 0.0) {
            return Err(EngineError::config(format!(
                "window must be a positive duration, got {}",
                format_duration(self.window_secs)
            )));
        }
        for (name, value) in [("warning", self.warning_secs), ("critical", self.critical_secs)] {
            if value.is_nan() || value < 0.0 {
                return Err(EngineError::config(format!(
                    "{} threshold must not be negative, got {}",
                    name,
                    format_duration(value)
                )));
            }
        }
        Ok(())
    }
}

/// Tri-state result of a saturation check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SaturationStatus {
    Ok,
    Warning,
    Critical,
}

impl SaturationStatus {
    /// Critical is checked first; both comparisons are inclusive
    pub fn evaluate(report: &SaturationReport, warning_secs: f64, critical_secs: f64) -> Self {
        let time_left = report.time_to_saturation;
        if time_left <= critical_secs {
            SaturationStatus::Critical
        } else if time_left <= warning_secs {
            SaturationStatus::Warning
        } else {
            SaturationStatus::Ok
        }
    }

    pub fn exit_code(self) -> u8 {
        match self {
            SaturationStatus::Ok => 0,
            SaturationStatus::Warning => 1,
            SaturationStatus::Critical => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SaturationStatus::Ok => "OK",
            SaturationStatus::Warning => "WARNING",
            SaturationStatus::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for SaturationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SaturationReport {
    pub time_to_saturation: f64,
    pub score: f64,
    pub points: usize,
    #[serde(skip)]
    pub prediction: Option<Prediction>,
}

/// `WARNING: 3600.00 1h (97.12%)`
pub fn status_line(status: SaturationStatus, report: &SaturationReport) -> String {
    format!(
        "{}: {:.2} {} ({:.2}%)",
        status,
        report.time_to_saturation,
        format_duration(report.time_to_saturation),
        report.score * 100.0
    )
}

pub async fn check_time(
    source: &dyn DataSource,
    settings: &SaturationSettings,
    log: &LogContext,
) -> Result<SaturationReport> {
    settings.validate()?;

    let samples = source
        .fetch_live_window(&SelectorGroup::new(), settings.window_secs)
        .await?;
    log.log_points_fetched(&format_duration(settings.window_secs), samples.len());

    if samples.len() < MIN_POINTS {
        return Err(EngineError::InsufficientData {
            needed: MIN_POINTS,
            got: samples.len(),
        }
        .into());
    }

    let series = settings.normalizer.normalize_series(&samples)?;
    let prediction = Extrapolator::new(settings.regression).predict(&series, log)?;

    if let Some(path) = &settings.debug_dump {
        let diagnostics = TrendDiagnostics::build(&series, &prediction);
        if let Err(e) = diagnostics.write_to(path) {
            let _guard = log.span().enter();
            warn!(error = %e, path = %path.display(), "Failed to write debug dump");
        }
    }

    let report = SaturationReport {
        time_to_saturation: prediction.time_to_saturation,
        score: prediction.score,
        points: samples.len(),
        prediction: Some(prediction),
    };
    let status = SaturationStatus::evaluate(&report, settings.warning_secs, settings.critical_secs);
    log.log_status(status.as_str(), settings.warning_secs, settings.critical_secs);

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::FakeSource;
    use crate::predictor::ValueType;
    use chrono::{Duration, TimeZone, Utc};
    use crate::models::Sample;
    use tempfile::tempdir;

    fn settings(value_type: ValueType) -> SaturationSettings {
        SaturationSettings {
            window_secs: 1000.0,
            warning_secs: 300.0,
            critical_secs: 100.0,
            normalizer: ValueNormalizer::new(value_type),
            regression: Regression::BayesianRidge,
            debug_dump: None,
        }
    }

    fn rising_samples() -> Vec<Sample> {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        (0..800)
            .map(|i| {
                let value = 8.0 * i as f64 / 799.0;
                Sample::new(start + Duration::seconds(i), value).with_capacity(10.0)
            })
            .collect()
    }

    fn report(time_left: f64) -> SaturationReport {
        SaturationReport {
            time_to_saturation: time_left,
            score: 0.5,
            points: 2,
            prediction: None,
        }
    }

    #[tokio::test]
    async fn test_end_to_end_rising_disk() {
        let source = FakeSource::new().with_live(SelectorGroup::new(), rising_samples());
        let report = check_time(&source, &settings(ValueType::Usage), &LogContext::detached("test"))
            .await
            .unwrap();

        assert_eq!(report.points, 800);
        assert!(
            (report.time_to_saturation - 200.0).abs() <= 50.0,
            "time left {}",
            report.time_to_saturation
        );
        assert!(report.score >= 0.9, "score {}", report.score);
        assert_eq!(
            SaturationStatus::evaluate(&report, 300.0, 100.0),
            SaturationStatus::Warning
        );
    }

    #[tokio::test]
    async fn test_missing_capacity_is_configuration_error() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let samples = vec![
            Sample::new(start, 1.0),
            Sample::new(start + Duration::seconds(10), 2.0),
        ];
        let source = FakeSource::new().with_live(SelectorGroup::new(), samples);
        let err = check_time(&source, &settings(ValueType::Usage), &LogContext::detached("test"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_window_is_insufficient_data() {
        let source = FakeSource::new();
        let err = check_time(&source, &settings(ValueType::Usage), &LogContext::detached("test"))
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<EngineError>(),
            Some(&EngineError::InsufficientData { needed: 2, got: 0 })
        );
    }

    #[tokio::test]
    async fn test_debug_dump_written() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dump/trend.json");
        let mut settings = settings(ValueType::Usage);
        settings.debug_dump = Some(path.clone());

        let source = FakeSource::new().with_live(SelectorGroup::new(), rising_samples());
        check_time(&source, &settings, &LogContext::detached("test"))
            .await
            .unwrap();

        let dump: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(dump["points"].as_array().unwrap().len(), 800);
        assert_eq!(dump["projection"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_status_thresholds_inclusive() {
        assert_eq!(
            SaturationStatus::evaluate(&report(100.0), 300.0, 100.0),
            SaturationStatus::Critical
        );
        assert_eq!(
            SaturationStatus::evaluate(&report(300.0), 300.0, 100.0),
            SaturationStatus::Warning
        );
        assert_eq!(
            SaturationStatus::evaluate(&report(300.5), 300.0, 100.0),
            SaturationStatus::Ok
        );
        assert_eq!(
            SaturationStatus::evaluate(&report(f64::INFINITY), 300.0, 100.0),
            SaturationStatus::Ok
        );
        assert_eq!(SaturationStatus::Critical.exit_code(), 2);
    }

    #[test]
    fn test_status_line_format() {
        let line = status_line(SaturationStatus::Warning, &report(90061.0));
        assert_eq!(line, "WARNING: 90061.00 1d1h1s (50.00%)");

        let never = status_line(SaturationStatus::Ok, &report(f64::INFINITY));
        assert_eq!(never, "OK: inf inf (50.00%)");
    }

    #[test]
    fn test_invalid_window() {
        let mut settings = settings(ValueType::UsagePercentile);
        settings.window_secs = 0.0;
        assert!(matches!(settings.validate(), Err(EngineError::Configuration(_))));
    }
}
