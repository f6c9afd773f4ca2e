//! Core data models for the sentinel engine

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// A raw metric sample as returned by the query layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    /// Saturation level for this sample, when the measurement carries one
    pub capacity: Option<f64>,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self {
            timestamp,
            value,
            capacity: None,
        }
    }

    pub fn with_capacity(mut self, capacity: f64) -> Self {
        self.capacity = Some(capacity);
        self
    }
}

/// One normalized observation: seconds since the earliest sample, unit value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub offset_seconds: f64,
    pub unit_value: f64,
}

/// Points ready for regression. Order carries no meaning.
pub type NormalizedSeries = Vec<SeriesPoint>;

/// Tag values identifying one independent time series within a measurement.
///
/// Backed by a `BTreeMap` so display, hashing and ordering are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectorGroup(pub BTreeMap<String, String>);

impl SelectorGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(column.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// `host_a_service_b`, used to build dump file names
    pub fn slug(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{}_{}", k, v))
            .collect::<Vec<_>>()
            .join("_")
    }
}

impl fmt::Display for SelectorGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "<all>");
        }
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        write!(f, "{}", parts.join(","))
    }
}

impl FromIterator<(String, String)> for SelectorGroup {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// How finely the week is cut into buckets when training thresholds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketGranularity {
    /// One bucket per weekday and hour of day
    #[default]
    Hourly,
    /// One bucket per weekday
    Daily,
}

/// Cyclical grouping identity: weekday plus (for hourly buckets) hour of day
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BucketKey {
    /// Days since Monday, 0..=6
    day: u8,
    /// Hour of day, 0..=23; `None` for daily buckets
    hour: Option<u8>,
}

impl BucketKey {
    pub fn new(weekday: Weekday, hour: Option<u8>) -> Self {
        Self {
            day: weekday.num_days_from_monday() as u8,
            hour: hour.map(|h| h.min(23)),
        }
    }

    /// Bucket of an instant, evaluated in UTC
    pub fn of(timestamp: &DateTime<Utc>, granularity: BucketGranularity) -> Self {
        let hour = match granularity {
            BucketGranularity::Hourly => Some(timestamp.hour() as u8),
            BucketGranularity::Daily => None,
        };
        Self::new(timestamp.weekday(), hour)
    }

    pub fn weekday(&self) -> Weekday {
        match self.day {
            0 => Weekday::Mon,
            1 => Weekday::Tue,
            2 => Weekday::Wed,
            3 => Weekday::Thu,
            4 => Weekday::Fri,
            5 => Weekday::Sat,
            _ => Weekday::Sun,
        }
    }

    pub fn hour(&self) -> Option<u8> {
        self.hour
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.hour {
            Some(hour) => write!(f, "{} {:02}h", self.weekday(), hour),
            None => write!(f, "{}", self.weekday()),
        }
    }
}

/// A pair of cuts on one side of the distribution
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cuts {
    pub warning: f64,
    pub anomaly: f64,
}

/// Trained thresholds for one bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketThresholds {
    /// Values above these cuts are flagged
    pub upper: Cuts,
    /// Values below these cuts are flagged; only present for two-tailed training
    pub lower: Option<Cuts>,
    /// Number of training samples that fell into the bucket
    pub samples: usize,
}

/// Classification of one live sample against its bucket's thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub warning_threshold: f64,
    pub anomaly_threshold: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lower_warning_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lower_anomaly_threshold: Option<f64>,
    pub is_warning: bool,
    pub is_anomaly: bool,
}

impl Classification {
    pub fn is_normal(&self) -> bool {
        !self.is_warning && !self.is_anomaly
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_bucket_key_ordering() {
        let mon_23 = BucketKey::new(Weekday::Mon, Some(23));
        let tue_0 = BucketKey::new(Weekday::Tue, Some(0));
        let sun = BucketKey::new(Weekday::Sun, None);
        let mut keys = vec![sun, tue_0, mon_23];
        keys.sort();
        assert_eq!(keys, vec![mon_23, tue_0, sun]);
    }

    #[test]
    fn test_bucket_of_instant() {
        // 2024-01-01 was a Monday
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 12, 10, 0).unwrap();
        let hourly = BucketKey::of(&ts, BucketGranularity::Hourly);
        assert_eq!(hourly.weekday(), Weekday::Mon);
        assert_eq!(hourly.hour(), Some(12));
        assert_eq!(hourly.to_string(), "Mon 12h");

        let daily = BucketKey::of(&ts, BucketGranularity::Daily);
        assert_eq!(daily.hour(), None);
        assert_ne!(hourly, daily);
    }

    #[test]
    fn test_selector_group_rendering() {
        let group = SelectorGroup::new()
            .with("service", "disk")
            .with("host", "host01");
        assert_eq!(group.to_string(), "host=host01,service=disk");
        assert_eq!(group.slug(), "host_host01_service_disk");
        assert_eq!(SelectorGroup::new().to_string(), "<all>");
    }
}
