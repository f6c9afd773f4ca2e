//! Anomaly detection on cyclical metrics
//!
//! Thresholds are learned per time-of-week bucket from a training window
//! and live samples are classified against the thresholds of their bucket.

mod classifier;
mod trainer;

pub use classifier::PointClassifier;
pub use trainer::{quantile, CyclicalThresholdTrainer, TailMode, ThresholdBucket, TrainingConfig};
