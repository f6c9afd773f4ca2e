//! Point classification against trained bucket thresholds

use crate::error::{EngineError, EngineResult};
use crate::models::{BucketKey, Classification, Sample};

use super::trainer::ThresholdBucket;

/// Classifies live samples as normal, warning or anomaly
pub struct PointClassifier<'a> {
    buckets: &'a ThresholdBucket,
}

impl<'a> PointClassifier<'a> {
    pub fn new(buckets: &'a ThresholdBucket) -> Self {
        Self { buckets }
    }

    pub fn bucket_of(&self, point: &Sample) -> BucketKey {
        BucketKey::of(&point.timestamp, self.buckets.granularity())
    }

    /// Fails with `MissingBucket` when the point's bucket was never trained;
    /// skipping such points is the caller's decision.
    pub fn classify(&self, point: &Sample) -> EngineResult<Classification> {
        let key = self.bucket_of(point);
        let thresholds = self
            .buckets
            .get(&key)
            .ok_or(EngineError::MissingBucket(key))?;

        let value = point.value;
        let upper = thresholds.upper;
        let lower = thresholds.lower;

        let beyond_anomaly =
            value > upper.anomaly || lower.is_some_and(|cuts| value < cuts.anomaly);
        let beyond_warning =
            value > upper.warning || lower.is_some_and(|cuts| value < cuts.warning);

        let (is_warning, is_anomaly) = if beyond_anomaly {
            (false, true)
        } else if beyond_warning {
            (true, false)
        } else {
            (false, false)
        };

        Ok(Classification {
            timestamp: point.timestamp,
            value,
            warning_threshold: upper.warning,
            anomaly_threshold: upper.anomaly,
            lower_warning_threshold: lower.map(|cuts| cuts.warning),
            lower_anomaly_threshold: lower.map(|cuts| cuts.anomaly),
            is_warning,
            is_anomaly,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::{CyclicalThresholdTrainer, TailMode, TrainingConfig};
    use crate::models::BucketGranularity;
    use crate::observability::LogContext;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn monday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()
    }

    /// Trains a single Mon 09h bucket whose one-tailed cuts are exactly 10 and 20
    fn fixed_buckets(tail_mode: TailMode) -> ThresholdBucket {
        // values 0..=20 in steps of one; q=0.5 -> 10, q=1.0 -> 20
        let samples: Vec<Sample> = (0..=20)
            .map(|v| Sample::new(monday() + Duration::seconds(v), v as f64))
            .collect();
        let config = TrainingConfig {
            warning_q: 0.5,
            anomaly_q: 1.0,
            tail_mode,
            granularity: BucketGranularity::Hourly,
        };
        CyclicalThresholdTrainer::new(config)
            .unwrap()
            .train(&samples, &LogContext::detached("test"))
            .unwrap()
    }

    fn point(value: f64) -> Sample {
        Sample::new(monday() + Duration::minutes(30), value)
    }

    #[test]
    fn test_three_bands() {
        let buckets = fixed_buckets(TailMode::OneTailedHigh);
        let classifier = PointClassifier::new(&buckets);

        let anomaly = classifier.classify(&point(25.0)).unwrap();
        assert!(anomaly.is_anomaly && !anomaly.is_warning);
        assert_eq!(anomaly.warning_threshold, 10.0);
        assert_eq!(anomaly.anomaly_threshold, 20.0);

        let warning = classifier.classify(&point(15.0)).unwrap();
        assert!(warning.is_warning && !warning.is_anomaly);

        let normal = classifier.classify(&point(5.0)).unwrap();
        assert!(normal.is_normal());
    }

    #[test]
    fn test_one_tailed_ignores_low_values() {
        let buckets = fixed_buckets(TailMode::OneTailedHigh);
        let classifier = PointClassifier::new(&buckets);
        let very_low = classifier.classify(&point(-1_000_000.0)).unwrap();
        assert!(very_low.is_normal());
        assert!(very_low.lower_anomaly_threshold.is_none());
    }

    #[test]
    fn test_two_tailed_flags_low_values() {
        // lower cuts sit at the 0.25 and 0.0 quantiles: 5 and 0
        let buckets = fixed_buckets(TailMode::TwoTailed);
        assert_eq!(buckets.tail_mode(), TailMode::TwoTailed);
        let classifier = PointClassifier::new(&buckets);

        let very_low = classifier.classify(&point(-100.0)).unwrap();
        assert!(very_low.is_anomaly && !very_low.is_warning);
        assert_eq!(very_low.lower_anomaly_threshold, Some(0.0));

        let low = classifier.classify(&point(2.5)).unwrap();
        assert!(low.is_warning && !low.is_anomaly);
        assert_eq!(low.lower_warning_threshold, Some(5.0));

        let normal = classifier.classify(&point(10.0)).unwrap();
        assert!(normal.is_normal());
    }

    #[test]
    fn test_exactly_one_class_per_point() {
        let buckets = fixed_buckets(TailMode::OneTailedHigh);
        let classifier = PointClassifier::new(&buckets);

        let mut counts = [0usize; 3];
        for i in 0..1000 {
            let value = i as f64 * 0.03; // spans 0..30, crossing both cuts
            let c = classifier.classify(&point(value)).unwrap();
            let classes = [c.is_normal(), c.is_warning, c.is_anomaly];
            assert_eq!(classes.iter().filter(|b| **b).count(), 1, "value {}", value);
            for (slot, hit) in counts.iter_mut().zip(classes) {
                *slot += hit as usize;
            }
        }
        assert!(counts.iter().all(|c| *c > 0), "{:?}", counts);
    }

    #[test]
    fn test_untrained_bucket() {
        let buckets = fixed_buckets(TailMode::OneTailedHigh);
        let classifier = PointClassifier::new(&buckets);
        let tuesday = Sample::new(monday() + Duration::days(1), 5.0);
        let err = classifier.classify(&tuesday).unwrap_err();
        assert_eq!(err, EngineError::MissingBucket(classifier.bucket_of(&tuesday)));
    }
}
