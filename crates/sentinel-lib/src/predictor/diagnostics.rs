//! Debug dump of a saturation prediction
//!
//! Writes the data, the fitted line and the projection to saturation as
//! JSON so the fit can be inspected or plotted offline.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use super::extrapolator::Prediction;
use crate::models::SeriesPoint;

#[derive(Debug, Serialize)]
pub struct TrendDiagnostics {
    pub slope: f64,
    pub intercept: f64,
    pub score: f64,
    pub last_offset: f64,
    /// `None` when the trend never reaches saturation
    pub saturation_offset: Option<f64>,
    pub points: Vec<DiagnosticPoint>,
    /// Segment from the latest observation to the saturation point
    pub projection: Vec<[f64; 2]>,
}

#[derive(Debug, Serialize)]
pub struct DiagnosticPoint {
    pub offset_seconds: f64,
    pub unit_value: f64,
    pub fitted: f64,
}

impl TrendDiagnostics {
    pub fn build(series: &[SeriesPoint], prediction: &Prediction) -> Self {
        let model = prediction.model;
        let mut points: Vec<DiagnosticPoint> = series
            .iter()
            .map(|p| DiagnosticPoint {
                offset_seconds: p.offset_seconds,
                unit_value: p.unit_value,
                fitted: model.at(p.offset_seconds),
            })
            .collect();
        points.sort_by(|a, b| a.offset_seconds.total_cmp(&b.offset_seconds));

        let saturation_offset = model.saturation_offset();
        let projection = match saturation_offset {
            Some(end) => vec![
                [prediction.last_offset, model.at(prediction.last_offset)],
                [end, 1.0],
            ],
            None => Vec::new(),
        };

        Self {
            slope: model.slope,
            intercept: model.intercept,
            score: model.score,
            last_offset: prediction.last_offset,
            saturation_offset,
            points,
            projection,
        }
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).context("Failed to create diagnostics directory")?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize diagnostics")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write diagnostics to {}", path.display()))
    }
}
