//! End-to-end runs over a `DataSource`
//!
//! `check_time` fits one live window and reports the time left before
//! saturation. `anomaly_detection` trains and classifies every selector
//! group and hands the results to a `Sink`.

mod detection;
mod saturation;
#[cfg(test)]
mod testing;

pub use detection::{anomaly_detection, AnomalySettings, GroupOutcome, GroupReport, RunSummary};
pub use saturation::{
    check_time, status_line, SaturationReport, SaturationSettings, SaturationStatus,
};
