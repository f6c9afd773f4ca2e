//! Saturation prediction engine

mod diagnostics;
mod extrapolator;
mod normalize;

pub use diagnostics::{DiagnosticPoint, TrendDiagnostics};
pub use extrapolator::{Extrapolator, Prediction, Regression, TrendModel, MIN_POINTS};
pub use normalize::{to_offset, ValueNormalizer, ValueType};
