//! Trend extrapolation
//!
//! Fits a straight line to a normalized series and projects when it will
//! cross 1.0 (saturation). The fit quality is reported as R² clamped to
//! `[0, 1]`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::models::SeriesPoint;
use crate::observability::LogContext;

/// Minimum points needed to fit a line
pub const MIN_POINTS: usize = 2;

/// Gamma prior shape/rate for both precisions of the Bayesian ridge
const BAYES_PRIOR: f64 = 1e-6;
const BAYES_MAX_ITER: usize = 300;
const BAYES_REL_TOL: f64 = 1e-12;

/// Regression used to fit the trend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regression {
    /// Closed-form least squares
    Ordinary,
    /// Ridge regression with evidence-maximised regularisation
    #[default]
    BayesianRidge,
}

impl fmt::Display for Regression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Regression::Ordinary => write!(f, "ordinary"),
            Regression::BayesianRidge => write!(f, "bayesian"),
        }
    }
}

impl FromStr for Regression {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ordinary" | "ols" => Ok(Regression::Ordinary),
            "bayesian" | "bayesian_ridge" => Ok(Regression::BayesianRidge),
            other => Err(EngineError::config(format!(
                "unknown regression '{}', expected ordinary or bayesian",
                other
            ))),
        }
    }
}

/// Fitted line `unit_value = slope * offset + intercept`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendModel {
    pub slope: f64,
    pub intercept: f64,
    /// R², clamped to `[0, 1]`
    pub score: f64,
}

impl TrendModel {
    pub fn at(&self, offset_seconds: f64) -> f64 {
        self.slope * offset_seconds + self.intercept
    }

    /// Offset at which the line reaches 1.0, if it is growing
    pub fn saturation_offset(&self) -> Option<f64> {
        if self.slope <= 0.0 || !self.slope.is_finite() {
            return None;
        }
        Some((1.0 - self.intercept) / self.slope)
    }
}

/// Outcome of a saturation prediction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Seconds from the most recent observation until saturation, `+inf` if never
    pub time_to_saturation: f64,
    pub score: f64,
    pub model: TrendModel,
    /// Offset of the most recent observation
    pub last_offset: f64,
}

impl Prediction {
    pub fn saturates(&self) -> bool {
        self.time_to_saturation.is_finite()
    }
}

/// Extrapolates a fitted trend to saturation
#[derive(Debug, Clone, Default)]
pub struct Extrapolator {
    regression: Regression,
}

impl Extrapolator {
    pub fn new(regression: Regression) -> Self {
        Self { regression }
    }

    pub fn regression(&self) -> Regression {
        self.regression
    }

    /// Fit the trend without projecting it
    pub fn fit(&self, series: &[SeriesPoint]) -> EngineResult<TrendModel> {
        let points: Vec<(f64, f64)> = series
            .iter()
            .filter(|p| p.offset_seconds.is_finite() && p.unit_value.is_finite())
            .map(|p| (p.offset_seconds, p.unit_value))
            .collect();

        if points.len() < MIN_POINTS {
            return Err(EngineError::InsufficientData {
                needed: MIN_POINTS,
                got: points.len(),
            });
        }

        let stats = CenteredStats::from_points(&points);
        let slope = match self.regression {
            Regression::Ordinary => stats.ordinary_slope(),
            Regression::BayesianRidge => stats.bayesian_slope(),
        };
        let intercept = stats.mean_y - slope * stats.mean_x;
        let score = r_squared(&points, slope, intercept, &stats).max(0.0).min(1.0);

        Ok(TrendModel {
            slope,
            intercept,
            score,
        })
    }

    /// Predict remaining time to saturation, measured from the latest point
    pub fn predict(&self, series: &[SeriesPoint], log: &LogContext) -> EngineResult<Prediction> {
        let model = self.fit(series)?;
        log.log_trend_fitted(model.slope, model.intercept, model.score);

        let last_offset = series
            .iter()
            .map(|p| p.offset_seconds)
            .filter(|o| o.is_finite())
            .fold(f64::NEG_INFINITY, f64::max);

        let time_to_saturation = match model.saturation_offset() {
            Some(saturation) => saturation - last_offset,
            None => f64::INFINITY,
        };
        log.log_saturation(time_to_saturation, model.score);

        Ok(Prediction {
            time_to_saturation,
            score: model.score,
            model,
            last_offset,
        })
    }
}

/// Sufficient statistics of a centered series
struct CenteredStats {
    /// Every point shares one offset or one value; no trend can be fitted
    degenerate: bool,
    n: f64,
    mean_x: f64,
    mean_y: f64,
    sxx: f64,
    sxy: f64,
    syy: f64,
}

impl CenteredStats {
    fn from_points(points: &[(f64, f64)]) -> Self {
        let (x0, y0) = points[0];
        let degenerate = points.iter().all(|(x, _)| *x == x0) || points.iter().all(|(_, y)| *y == y0);
        let n = points.len() as f64;
        let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
        let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;

        let mut sxx = 0.0;
        let mut sxy = 0.0;
        let mut syy = 0.0;
        for (x, y) in points {
            let dx = x - mean_x;
            let dy = y - mean_y;
            sxx += dx * dx;
            sxy += dx * dy;
            syy += dy * dy;
        }

        Self {
            degenerate,
            n,
            mean_x,
            mean_y,
            sxx,
            sxy,
            syy,
        }
    }

    fn ordinary_slope(&self) -> f64 {
        if self.degenerate || self.sxx.abs() < f64::EPSILON {
            return 0.0;
        }
        self.sxy / self.sxx
    }

    /// One-feature Bayesian ridge: alternate the posterior mean of the slope
    /// with the noise precision (alpha) and weight precision (lambda) updates
    fn bayesian_slope(&self) -> f64 {
        if self.degenerate || self.sxx.abs() < f64::EPSILON {
            return 0.0;
        }

        let variance = self.syy / self.n;
        let mut alpha = 1.0 / (variance + f64::EPSILON);
        let mut lambda = 1.0;
        let mut previous: Option<f64> = None;

        for _ in 0..BAYES_MAX_ITER {
            let coef = alpha * self.sxy / (lambda + alpha * self.sxx);

            // residual sum of squares of the centered fit
            let rss = (self.syy - 2.0 * coef * self.sxy + coef * coef * self.sxx).max(0.0);
            let gamma = alpha * self.sxx / (lambda + alpha * self.sxx);
            lambda = (gamma + 2.0 * BAYES_PRIOR) / (coef * coef + 2.0 * BAYES_PRIOR);
            alpha = (self.n - gamma + 2.0 * BAYES_PRIOR) / (rss + 2.0 * BAYES_PRIOR);

            if let Some(prev) = previous {
                if (coef - prev).abs() <= BAYES_REL_TOL * coef.abs().max(f64::MIN_POSITIVE) {
                    break;
                }
            }
            previous = Some(coef);
        }

        alpha * self.sxy / (lambda + alpha * self.sxx)
    }
}

/// Coefficient of determination; a flat series explains nothing and scores 0
fn r_squared(points: &[(f64, f64)], slope: f64, intercept: f64, stats: &CenteredStats) -> f64 {
    // slow drifts have a tiny but meaningful total variance
    if stats.degenerate || stats.syy == 0.0 {
        return 0.0;
    }

    let ss_res: f64 = points
        .iter()
        .map(|(x, y)| (y - (slope * x + intercept)).powi(2))
        .sum();
    1.0 - ss_res / stats.syy
}
