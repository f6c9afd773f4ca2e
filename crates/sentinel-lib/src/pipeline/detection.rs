//! Anomaly detection over every selector group of a measurement

use anyhow::Result;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;

use crate::anomaly::{CyclicalThresholdTrainer, PointClassifier, TrainingConfig};
use crate::error::{EngineError, EngineResult};
use crate::models::SelectorGroup;
use crate::observability::LogContext;
use crate::source::{DataSource, Sink};
use crate::timeparse::format_duration;

#[derive(Debug, Clone)]
pub struct AnomalySettings {
    /// Tag columns whose distinct value combinations form the groups
    pub selectors: Vec<String>,
    pub window_secs: f64,
    pub training_timeframe_secs: f64,
    pub training: TrainingConfig,
    /// Groups processed at once
    pub parallelism: usize,
}

impl Default for AnomalySettings {
    fn default() -> Self {
        Self {
            selectors: Vec::new(),
            window_secs: 3600.0,
            training_timeframe_secs: 4.0 * 7.0 * 86400.0,
            training: TrainingConfig::default(),
            parallelism: 1,
        }
    }
}

impl AnomalySettings {
    pub fn validate(&self) -> EngineResult<()> {
        for (name, value) in [
            ("window", self.window_secs),
            ("training timeframe", self.training_timeframe_secs),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(EngineError::config(format!(
                    "{} must be a positive duration, got {}",
                    name,
                    format_duration(value)
                )));
            }
        }
        if self.parallelism == 0 {
            return Err(EngineError::config("parallelism must be at least 1"));
        }
        self.training.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GroupOutcome {
    Written {
        classified: usize,
        warnings: usize,
        anomalies: usize,
        /// Live points whose bucket had no training data
        skipped_points: usize,
    },
    Skipped {
        reason: String,
    },
    Failed {
        error: String,
    },
}

impl GroupOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            GroupOutcome::Written { .. } => "written",
            GroupOutcome::Skipped { .. } => "skipped",
            GroupOutcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupReport {
    pub group: SelectorGroup,
    #[serde(flatten)]
    pub outcome: GroupOutcome,
}

/// Per-group results in group order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub groups: Vec<GroupReport>,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        self.groups
            .iter()
            .any(|g| matches!(g.outcome, GroupOutcome::Failed { .. }))
    }

    pub fn total_anomalies(&self) -> usize {
        self.groups
            .iter()
            .map(|g| match g.outcome {
                GroupOutcome::Written { anomalies, .. } => anomalies,
                _ => 0,
            })
            .sum()
    }

    pub fn total_warnings(&self) -> usize {
        self.groups
            .iter()
            .map(|g| match g.outcome {
                GroupOutcome::Written { warnings, .. } => warnings,
                _ => 0,
            })
            .sum()
    }
}

/// Train, classify and write every selector group.
///
/// Configuration and parse errors abort the run. Empty data skips the group
/// and any other failure is recorded against the group while its siblings
/// carry on.
pub async fn anomaly_detection(
    source: &dyn DataSource,
    sink: &dyn Sink,
    settings: &AnomalySettings,
    log: &LogContext,
) -> Result<RunSummary> {
    settings.validate()?;
    let trainer = CyclicalThresholdTrainer::new(settings.training.clone())?;

    let mut groups = source
        .fetch_selector_combinations(&settings.selectors, settings.window_secs)
        .await?;
    groups.sort();
    groups.dedup();
    log.log_groups_found(groups.len());

    let trainer = &trainer;
    let reports: Vec<GroupReport> = stream::iter(groups)
        .map(|group| async move {
            let group_log = log.for_group(&group);
            let result = run_group(source, sink, trainer, settings, &group, &group_log).await;
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(err) => match err.downcast_ref::<EngineError>().cloned() {
                    Some(e) if e.is_fatal() => return Err(err),
                    Some(EngineError::InsufficientData { .. }) => {
                        let reason = err.to_string();
                        group_log.log_group_skipped(&reason);
                        GroupOutcome::Skipped { reason }
                    }
                    _ => {
                        let error = format!("{:#}", err);
                        group_log.log_group_failed(&error);
                        GroupOutcome::Failed { error }
                    }
                },
            };
            Ok(GroupReport { group, outcome })
        })
        .buffered(settings.parallelism)
        .try_collect()
        .await?;

    Ok(RunSummary { groups: reports })
}

async fn run_group(
    source: &dyn DataSource,
    sink: &dyn Sink,
    trainer: &CyclicalThresholdTrainer,
    settings: &AnomalySettings,
    group: &SelectorGroup,
    log: &LogContext,
) -> Result<GroupOutcome> {
    let history = source
        .fetch_training_window(group, settings.training_timeframe_secs)
        .await?;
    log.log_points_fetched(&format_duration(settings.training_timeframe_secs), history.len());
    let buckets = trainer.train(&history, log)?;

    let live = source.fetch_live_window(group, settings.window_secs).await?;
    log.log_points_fetched(&format_duration(settings.window_secs), live.len());
    if live.is_empty() {
        let reason = "no data in live window".to_string();
        log.log_group_skipped(&reason);
        return Ok(GroupOutcome::Skipped { reason });
    }

    let classifier = PointClassifier::new(&buckets);
    let mut classified = Vec::with_capacity(live.len());
    let mut skipped_points = 0;
    for point in &live {
        match classifier.classify(point) {
            Ok(c) => classified.push(c),
            Err(EngineError::MissingBucket(key)) => {
                log.log_missing_bucket(&key);
                skipped_points += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    if classified.is_empty() {
        let reason = format!(
            "no data to classify: all {} live points fall in untrained buckets",
            skipped_points
        );
        log.log_group_skipped(&reason);
        return Ok(GroupOutcome::Skipped { reason });
    }

    let warnings = classified.iter().filter(|c| c.is_warning).count();
    let anomalies = classified.iter().filter(|c| c.is_anomaly).count();
    log.log_classified(classified.len(), warnings, anomalies);

    sink.write(group, &classified, log).await?;

    Ok(GroupOutcome::Written {
        classified: classified.len(),
        warnings,
        anomalies,
        skipped_points,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::TailMode;
    use crate::models::{BucketGranularity, Sample};
    use crate::pipeline::testing::{FakeSource, RecordingSink};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn monday_nine() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()
    }

    /// Four Mondays of 09h values 0..=20, one per minute
    fn history() -> Vec<Sample> {
        (0..4)
            .flat_map(|week| {
                (0..=20).map(move |minute| {
                    Sample::new(
                        monday_nine() - Duration::weeks(week + 1) + Duration::minutes(minute),
                        minute as f64,
                    )
                })
            })
            .collect()
    }

    fn live(values: &[f64]) -> Vec<Sample> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Sample::new(monday_nine() + Duration::minutes(i as i64), *v))
            .collect()
    }

    fn settings() -> AnomalySettings {
        AnomalySettings {
            selectors: vec!["host".to_string()],
            training: TrainingConfig {
                warning_q: 0.5,
                anomaly_q: 1.0,
                tail_mode: TailMode::OneTailedHigh,
                granularity: BucketGranularity::Hourly,
            },
            ..AnomalySettings::default()
        }
    }

    fn host(name: &str) -> SelectorGroup {
        SelectorGroup::new().with("host", name)
    }

    #[tokio::test]
    async fn test_groups_classified_in_order() {
        let source = FakeSource::new()
            .with_group(host("b"))
            .with_group(host("a"))
            .with_training(host("a"), history())
            .with_training(host("b"), history())
            .with_live(host("a"), live(&[5.0, 15.0, 25.0]))
            .with_live(host("b"), live(&[1.0]));
        let sink = RecordingSink::default();
        let mut settings = settings();
        settings.parallelism = 4;

        let summary = anomaly_detection(&source, &sink, &settings, &LogContext::detached("test"))
            .await
            .unwrap();

        let names: Vec<String> = summary.groups.iter().map(|g| g.group.to_string()).collect();
        assert_eq!(names, vec!["host=a", "host=b"]);
        assert_eq!(
            summary.groups[0].outcome,
            GroupOutcome::Written {
                classified: 3,
                warnings: 1,
                anomalies: 1,
                skipped_points: 0
            }
        );
        assert_eq!(summary.total_anomalies(), 1);
        assert_eq!(summary.total_warnings(), 1);
        assert!(!summary.has_failures());
        assert_eq!(sink.written.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_group_skipped_and_failure_isolated() {
        let source = FakeSource::new()
            .with_group(host("empty"))
            .with_group(host("broken"))
            .with_group(host("ok"))
            .with_broken(host("broken"))
            .with_training(host("ok"), history())
            .with_live(host("ok"), live(&[3.0]));
        let sink = RecordingSink::default();

        let summary = anomaly_detection(&source, &sink, &settings(), &LogContext::detached("test"))
            .await
            .unwrap();

        assert_eq!(summary.groups.len(), 3);
        assert_eq!(summary.groups[0].group, host("broken"));
        assert!(matches!(summary.groups[0].outcome, GroupOutcome::Failed { .. }));
        assert!(matches!(summary.groups[1].outcome, GroupOutcome::Skipped { .. }));
        assert!(matches!(summary.groups[2].outcome, GroupOutcome::Written { .. }));
        assert!(summary.has_failures());
    }

    #[tokio::test]
    async fn test_empty_live_window_skipped() {
        let source = FakeSource::new()
            .with_group(host("a"))
            .with_training(host("a"), history());
        let sink = RecordingSink::default();

        let summary = anomaly_detection(&source, &sink, &settings(), &LogContext::detached("test"))
            .await
            .unwrap();
        assert!(matches!(summary.groups[0].outcome, GroupOutcome::Skipped { .. }));
        assert!(sink.written.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_untrained_bucket_points_skipped() {
        let mut points = live(&[5.0]);
        points.push(Sample::new(monday_nine() + Duration::days(1), 5.0));
        let source = FakeSource::new()
            .with_group(host("a"))
            .with_training(host("a"), history())
            .with_live(host("a"), points);
        let sink = RecordingSink::default();

        let summary = anomaly_detection(&source, &sink, &settings(), &LogContext::detached("test"))
            .await
            .unwrap();
        assert_eq!(
            summary.groups[0].outcome,
            GroupOutcome::Written {
                classified: 1,
                warnings: 0,
                anomalies: 0,
                skipped_points: 1
            }
        );
    }

    #[tokio::test]
    async fn test_all_points_untrained_skips_group() {
        // history only covers Monday 09h, live points land on Tuesday and Wednesday
        let points = vec![
            Sample::new(monday_nine() + Duration::days(1), 5.0),
            Sample::new(monday_nine() + Duration::days(2), 5.0),
        ];
        let source = FakeSource::new()
            .with_group(host("a"))
            .with_training(host("a"), history())
            .with_live(host("a"), points);
        let sink = RecordingSink::default();

        let summary = anomaly_detection(&source, &sink, &settings(), &LogContext::detached("test"))
            .await
            .unwrap();

        match &summary.groups[0].outcome {
            GroupOutcome::Skipped { reason } => assert!(reason.contains("all 2 live points"), "{}", reason),
            other => panic!("expected skipped, got {:?}", other),
        }
        assert!(sink.written.lock().unwrap().is_empty());
        assert!(!summary.has_failures());
    }

    #[tokio::test]
    async fn test_configuration_error_aborts_run() {
        let source = FakeSource::new().with_group(host("a"));
        let sink = RecordingSink::default();
        let mut settings = settings();
        settings.training.warning_q = 1.0;

        let err = anomaly_detection(&source, &sink, &settings, &LogContext::detached("test"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::Configuration(_))
        ));
    }

    #[test]
    fn test_summary_json_shape() {
        let summary = RunSummary {
            groups: vec![GroupReport {
                group: host("a"),
                outcome: GroupOutcome::Skipped {
                    reason: "no data".to_string(),
                },
            }],
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["groups"][0]["outcome"], "skipped");
        assert_eq!(json["groups"][0]["group"]["host"], "a");
        assert_eq!(json["groups"][0]["reason"], "no data");
    }
}
