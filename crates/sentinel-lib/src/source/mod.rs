//! Data access seams
//!
//! The engine reads samples through a `DataSource` and hands classified
//! points to a `Sink`. Both are async traits so the InfluxDB adapter and
//! the in-process fakes used by tests share one shape.

mod file;
mod influx;
mod settings;

pub use file::{ClassifiedRecord, DryRunSink, FileSink};
pub use influx::{InfluxConnection, InfluxDataSource, InfluxSink, QueryTarget, Schema};
pub use settings::DbSettings;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Classification, Sample, SelectorGroup};
use crate::observability::LogContext;

/// Read side: one measurement, optionally split into selector groups
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Distinct combinations of `selector_columns` seen within `window_secs`
    async fn fetch_selector_combinations(
        &self,
        selector_columns: &[String],
        window_secs: f64,
    ) -> Result<Vec<SelectorGroup>>;

    /// Samples of one group over the training timeframe
    async fn fetch_training_window(
        &self,
        selector: &SelectorGroup,
        training_timeframe_secs: f64,
    ) -> Result<Vec<Sample>>;

    /// Samples of one group over the live window
    async fn fetch_live_window(
        &self,
        selector: &SelectorGroup,
        window_secs: f64,
    ) -> Result<Vec<Sample>>;
}

/// Write side for classified points
#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn write(
        &self,
        group: &SelectorGroup,
        classifications: &[Classification],
        log: &LogContext,
    ) -> Result<()>;
}
