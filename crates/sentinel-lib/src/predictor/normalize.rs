//! Value normalization
//!
//! Converts raw samples into unit-less values in the configured frame, so
//! that saturation is always reached at 1.0, and timestamps into offsets
//! from the earliest sample.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::models::{NormalizedSeries, Sample, SeriesPoint};

/// How a raw value relates to saturation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// value / capacity
    #[default]
    Usage,
    /// value / 100
    UsagePercentile,
    /// value as-is
    UsageQuantile,
    /// 1 - value / capacity
    Free,
    /// 1 - value / 100
    FreePercentile,
    /// 1 - value
    FreeQuantile,
}

impl ValueType {
    pub const ALL: [ValueType; 6] = [
        ValueType::Usage,
        ValueType::UsagePercentile,
        ValueType::UsageQuantile,
        ValueType::Free,
        ValueType::FreePercentile,
        ValueType::FreeQuantile,
    ];

    /// Whether normalization needs a capacity per sample
    pub fn requires_capacity(self) -> bool {
        matches!(self, ValueType::Usage | ValueType::Free)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::Usage => "usage",
            ValueType::UsagePercentile => "usage_percentile",
            ValueType::UsageQuantile => "usage_quantile",
            ValueType::Free => "free",
            ValueType::FreePercentile => "free_percentile",
            ValueType::FreeQuantile => "free_quantile",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ValueType::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| {
                EngineError::config(format!(
                    "unknown value type '{}', expected one of usage, usage_percentile, \
                     usage_quantile, free, free_percentile, free_quantile",
                    s
                ))
            })
    }
}

/// Converts samples to unit values under one `ValueType`
#[derive(Debug, Clone)]
pub struct ValueNormalizer {
    value_type: ValueType,
    /// Used when a sample carries no capacity of its own
    fallback_capacity: Option<f64>,
}

impl ValueNormalizer {
    pub fn new(value_type: ValueType) -> Self {
        Self {
            value_type,
            fallback_capacity: None,
        }
    }

    pub fn with_fallback_capacity(mut self, capacity: f64) -> Self {
        self.fallback_capacity = Some(capacity);
        self
    }

    pub fn normalize(&self, sample: &Sample) -> EngineResult<f64> {
        let value = sample.value;
        let unit = match self.value_type {
            ValueType::Usage => value / self.capacity(sample)?,
            ValueType::UsagePercentile => value / 100.0,
            ValueType::UsageQuantile => value,
            ValueType::Free => 1.0 - value / self.capacity(sample)?,
            ValueType::FreePercentile => 1.0 - value / 100.0,
            ValueType::FreeQuantile => 1.0 - value,
        };
        Ok(unit)
    }

    /// Normalize a whole query result, offsets relative to its earliest sample
    pub fn normalize_series(&self, samples: &[Sample]) -> EngineResult<NormalizedSeries> {
        let Some(series_min) = samples.iter().map(|s| s.timestamp).min() else {
            return Ok(Vec::new());
        };

        samples
            .iter()
            .map(|sample| {
                Ok(SeriesPoint {
                    offset_seconds: to_offset(&sample.timestamp, &series_min),
                    unit_value: self.normalize(sample)?,
                })
            })
            .collect()
    }

    fn capacity(&self, sample: &Sample) -> EngineResult<f64> {
        let capacity = sample
            .capacity
            .or(self.fallback_capacity)
            .ok_or_else(|| {
                EngineError::config(format!(
                    "value type '{}' needs a capacity, but the sample has none and no constant \
                     capacity is configured",
                    self.value_type
                ))
            })?;

        if !(capacity.is_finite() && capacity > 0.0) {
            return Err(EngineError::config(format!(
                "capacity must be a positive number, got {}",
                capacity
            )));
        }
        Ok(capacity)
    }
}

/// Seconds between `timestamp` and `series_min`
pub fn to_offset(timestamp: &DateTime<Utc>, series_min: &DateTime<Utc>) -> f64 {
    let delta = *timestamp - *series_min;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1e6,
        None => delta.num_milliseconds() as f64 / 1e3,
    }
}
