//! Cyclical quantile threshold training
//!
//! Groups the training window into time-of-week buckets and computes, for
//! every bucket that received samples, the warning and anomaly cuts as
//! empirical quantiles of that bucket's values.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::models::{BucketGranularity, BucketKey, BucketThresholds, Cuts, Sample};
use crate::observability::LogContext;

/// Which side(s) of the distribution may be flagged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TailMode {
    /// Unusually low and unusually high values are both flagged
    #[default]
    TwoTailed,
    /// Only unusually high values are flagged
    OneTailedHigh,
}

/// Quantile levels and bucketing for one training run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub warning_q: f64,
    pub anomaly_q: f64,
    pub tail_mode: TailMode,
    pub granularity: BucketGranularity,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            warning_q: 0.90,
            anomaly_q: 0.95,
            tail_mode: TailMode::TwoTailed,
            granularity: BucketGranularity::Hourly,
        }
    }
}

impl TrainingConfig {
    /// The warning level must sit strictly below the anomaly level so that the
    /// trained cuts are ordered and the classifier needs a single comparison
    pub fn validate(&self) -> EngineResult<()> {
        for (name, q) in [("warning", self.warning_q), ("anomaly", self.anomaly_q)] {
            if !(0.0..=1.0).contains(&q) {
                return Err(EngineError::config(format!(
                    "{} quantile must be within [0, 1], got {}",
                    name, q
                )));
            }
        }
        if self.warning_q >= self.anomaly_q {
            return Err(EngineError::config(format!(
                "warning quantile ({}) must be lower than anomaly quantile ({})",
                self.warning_q, self.anomaly_q
            )));
        }
        Ok(())
    }

    /// Quantile levels of the upper cuts
    fn upper_levels(&self) -> (f64, f64) {
        match self.tail_mode {
            TailMode::OneTailedHigh => (self.warning_q, self.anomaly_q),
            TailMode::TwoTailed => (
                1.0 - (1.0 - self.warning_q) / 2.0,
                1.0 - (1.0 - self.anomaly_q) / 2.0,
            ),
        }
    }

    /// Quantile levels of the lower cuts, two-tailed only
    fn lower_levels(&self) -> Option<(f64, f64)> {
        match self.tail_mode {
            TailMode::OneTailedHigh => None,
            TailMode::TwoTailed => Some(((1.0 - self.warning_q) / 2.0, (1.0 - self.anomaly_q) / 2.0)),
        }
    }
}

/// Trained thresholds keyed by bucket. A missing key means the bucket had
/// no training data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdBucket {
    granularity: BucketGranularity,
    tail_mode: TailMode,
    buckets: BTreeMap<BucketKey, BucketThresholds>,
}

impl ThresholdBucket {
    pub fn granularity(&self) -> BucketGranularity {
        self.granularity
    }

    pub fn tail_mode(&self) -> TailMode {
        self.tail_mode
    }

    pub fn get(&self, key: &BucketKey) -> Option<&BucketThresholds> {
        self.buckets.get(key)
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Buckets in weekday/hour order
    pub fn iter(&self) -> impl Iterator<Item = (&BucketKey, &BucketThresholds)> {
        self.buckets.iter()
    }
}

/// Builds `ThresholdBucket`s from a training window
#[derive(Debug, Clone)]
pub struct CyclicalThresholdTrainer {
    config: TrainingConfig,
}

impl CyclicalThresholdTrainer {
    pub fn new(config: TrainingConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn train(&self, history: &[Sample], log: &LogContext) -> EngineResult<ThresholdBucket> {
        let mut grouped: BTreeMap<BucketKey, Vec<f64>> = BTreeMap::new();
        for sample in history.iter().filter(|s| s.value.is_finite()) {
            grouped
                .entry(BucketKey::of(&sample.timestamp, self.config.granularity))
                .or_default()
                .push(sample.value);
        }

        let used: usize = grouped.values().map(Vec::len).sum();
        if used == 0 {
            return Err(EngineError::InsufficientData { needed: 1, got: 0 });
        }

        let (upper_warning, upper_anomaly) = self.config.upper_levels();
        let lower_levels = self.config.lower_levels();

        let buckets: BTreeMap<BucketKey, BucketThresholds> = grouped
            .into_iter()
            .map(|(key, mut values)| {
                values.sort_by(f64::total_cmp);
                let upper = Cuts {
                    warning: quantile_sorted(&values, upper_warning),
                    anomaly: quantile_sorted(&values, upper_anomaly),
                };
                let lower = lower_levels.map(|(warning, anomaly)| Cuts {
                    warning: quantile_sorted(&values, warning),
                    anomaly: quantile_sorted(&values, anomaly),
                });
                log.log_bucket(&key, upper.warning, upper.anomaly, values.len());
                (
                    key,
                    BucketThresholds {
                        upper,
                        lower,
                        samples: values.len(),
                    },
                )
            })
            .collect();

        log.log_thresholds_trained(buckets.len(), used);

        Ok(ThresholdBucket {
            granularity: self.config.granularity,
            tail_mode: self.config.tail_mode,
            buckets,
        })
    }
}

/// Empirical quantile with linear interpolation between order statistics
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    Some(quantile_sorted(&sorted, q))
}

fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let last = sorted.len() - 1;
    let position = q.clamp(0.0, 1.0) * last as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let weight = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn ctx() -> LogContext {
        LogContext::detached("test")
    }

    fn one_tailed() -> TrainingConfig {
        TrainingConfig {
            warning_q: 0.90,
            anomaly_q: 0.95,
            tail_mode: TailMode::OneTailedHigh,
            granularity: BucketGranularity::Hourly,
        }
    }

    #[test]
    fn test_quantile_linear_interpolation() {
        let values: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        let q95 = quantile(&values, 0.95).unwrap();
        assert!((q95 - 95.05).abs() < 1e-9);
        assert_eq!(quantile(&values, 0.0), Some(1.0));
        assert_eq!(quantile(&values, 1.0), Some(100.0));
        assert_eq!(quantile(&[], 0.5), None);
        assert_eq!(quantile(&[2.0, 4.0], 0.5), Some(3.0));
    }

    #[test]
    fn test_training_matches_quantiles_and_ignores_order() {
        // 2024-01-01 is a Monday; every sample lands in Mon 10h
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let samples: Vec<Sample> = (1..=100)
            .map(|v| Sample::new(base + Duration::seconds(v), v as f64))
            .collect();
        let mut reversed = samples.clone();
        reversed.reverse();

        let trainer = CyclicalThresholdTrainer::new(one_tailed()).unwrap();
        let a = trainer.train(&samples, &ctx()).unwrap();
        let b = trainer.train(&reversed, &ctx()).unwrap();
        assert_eq!(a, b);

        let key = BucketKey::of(&base, BucketGranularity::Hourly);
        let thresholds = a.get(&key).unwrap();
        assert!((thresholds.upper.anomaly - 95.0).abs() < 0.1);
        assert!((thresholds.upper.warning - 90.1).abs() < 1e-9);
        assert!(thresholds.lower.is_none());
        assert_eq!(thresholds.samples, 100);
    }

    #[test]
    fn test_buckets_split_by_weekday_and_hour() {
        let monday = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let samples = vec![
            Sample::new(monday, 1.0),
            Sample::new(monday + Duration::hours(1), 2.0),
            Sample::new(monday + Duration::days(1), 3.0),
            // a week later falls back into the first bucket
            Sample::new(monday + Duration::weeks(1), 5.0),
        ];

        let hourly = CyclicalThresholdTrainer::new(one_tailed())
            .unwrap()
            .train(&samples, &ctx())
            .unwrap();
        assert_eq!(hourly.len(), 3);
        let keys: Vec<String> = hourly.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, vec!["Mon 10h", "Mon 11h", "Tue 10h"]);
        assert_eq!(hourly.get(&BucketKey::of(&monday, BucketGranularity::Hourly)).unwrap().samples, 2);

        let daily = CyclicalThresholdTrainer::new(TrainingConfig {
            granularity: BucketGranularity::Daily,
            ..one_tailed()
        })
        .unwrap()
        .train(&samples, &ctx())
        .unwrap();
        assert_eq!(daily.len(), 2);
        assert_eq!(daily.granularity(), BucketGranularity::Daily);
    }

    #[test]
    fn test_two_tailed_cuts_are_symmetric() {
        let base = Utc.with_ymd_and_hms(2024, 1, 3, 8, 0, 0).unwrap();
        let samples: Vec<Sample> = (0..=100)
            .map(|v| Sample::new(base + Duration::seconds(v), v as f64))
            .collect();
        let buckets = CyclicalThresholdTrainer::new(TrainingConfig {
            warning_q: 0.90,
            anomaly_q: 0.98,
            tail_mode: TailMode::TwoTailed,
            granularity: BucketGranularity::Hourly,
        })
        .unwrap()
        .train(&samples, &ctx())
        .unwrap();

        let thresholds = buckets.iter().next().unwrap().1;
        let lower = thresholds.lower.unwrap();
        assert!((thresholds.upper.warning - 95.0).abs() < 1e-9);
        assert!((thresholds.upper.anomaly - 99.0).abs() < 1e-9);
        assert!((lower.warning - 5.0).abs() < 1e-9);
        assert!((lower.anomaly - 1.0).abs() < 1e-9);
        assert!(lower.anomaly <= lower.warning);
        assert!(thresholds.upper.warning <= thresholds.upper.anomaly);
    }

    #[test]
    fn test_empty_history_is_insufficient() {
        let trainer = CyclicalThresholdTrainer::new(TrainingConfig::default()).unwrap();
        let err = trainer.train(&[], &ctx()).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientData { .. }));
    }

    #[test]
    fn test_invalid_levels_rejected() {
        let inverted = TrainingConfig {
            warning_q: 0.95,
            anomaly_q: 0.90,
            ..TrainingConfig::default()
        };
        assert!(matches!(
            CyclicalThresholdTrainer::new(inverted),
            Err(EngineError::Configuration(_))
        ));

        let out_of_range = TrainingConfig {
            anomaly_q: 1.5,
            ..TrainingConfig::default()
        };
        assert!(out_of_range.validate().is_err());
    }
}
