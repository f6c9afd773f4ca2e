//! Analysis engine for InfluxDB time series
//!
//! This crate provides:
//! - Saturation prediction: normalize a metric, fit a linear trend and
//!   extrapolate the time left before it reaches capacity
//! - Cyclical anomaly detection: learn per weekday/hour quantile thresholds
//!   and classify live points as normal, warning or anomaly
//! - The InfluxDB adapter and output sinks both pipelines run against

pub mod anomaly;
pub mod error;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod predictor;
pub mod source;
pub mod timeparse;

pub use error::{EngineError, EngineResult};
pub use models::*;
pub use observability::LogContext;
