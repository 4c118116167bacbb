//! Regression metrics over (observed, predicted) pairs.
//!
//! A metric that is mathematically undefined for its input returns
//! [`MetricError::Undefined`] rather than a number. Callers turn that into
//! [`crate::types::Value::Undefined`]; nothing here ever yields NaN.

use std::fmt;
use thiserror::Error;

use crate::stats::{CorrelationError, pearson, spearman};
use crate::types::MetricKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndefinedReason {
    NoSamples,
    TooFewSamples(usize),
    ConstantObserved,
    ConstantPredicted,
}

impl fmt::Display for UndefinedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UndefinedReason::NoSamples => f.write_str("there are no samples"),
            UndefinedReason::TooFewSamples(n) => write!(f, "only {n} sample(s)"),
            UndefinedReason::ConstantObserved => f.write_str("the true values are constant"),
            UndefinedReason::ConstantPredicted => f.write_str("the predictions are constant"),
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricError {
    #[error("{metric} is undefined because {reason}")]
    Undefined {
        metric: MetricKind,
        reason: UndefinedReason,
    },
    #[error("observed and predicted values differ in length ({observed} vs {predicted})")]
    LengthMismatch { observed: usize, predicted: usize },
}

/// Computes `metric` for one prediction file.
pub fn compute(
    metric: MetricKind,
    observed: &[f64],
    predicted: &[f64],
) -> Result<f64, MetricError> {
    if observed.len() != predicted.len() {
        return Err(MetricError::LengthMismatch {
            observed: observed.len(),
            predicted: predicted.len(),
        });
    }
    let undefined = |reason| MetricError::Undefined { metric, reason };
    if observed.is_empty() {
        return Err(undefined(UndefinedReason::NoSamples));
    }

    match metric {
        MetricKind::R2 => {
            r_squared(observed, predicted).ok_or(undefined(UndefinedReason::ConstantObserved))
        }
        MetricKind::Mse => Ok(mean_squared_error(observed, predicted)),
        MetricKind::Rmse => Ok(mean_squared_error(observed, predicted).sqrt()),
        MetricKind::Mae => Ok(mean_absolute_error(observed, predicted)),
        MetricKind::Pcc => {
            pearson(observed, predicted).map_err(|e| undefined(correlation_reason(e)))
        }
        MetricKind::Scc => {
            spearman(observed, predicted).map_err(|e| undefined(correlation_reason(e)))
        }
    }
}

fn correlation_reason(err: CorrelationError) -> UndefinedReason {
    match err {
        CorrelationError::TooFewPoints(n) => UndefinedReason::TooFewSamples(n),
        CorrelationError::ConstantLeft => UndefinedReason::ConstantObserved,
        CorrelationError::ConstantRight => UndefinedReason::ConstantPredicted,
        // Lengths were checked above.
        CorrelationError::LengthMismatch { .. } => UndefinedReason::NoSamples,
    }
}

/// `1 - SS_res / SS_tot`; `None` when the observed values have zero variance.
fn r_squared(observed: &[f64], predicted: &[f64]) -> Option<f64> {
    // The mean of equal values is not always exact, so constancy is checked directly.
    if observed.iter().all(|&y| y == observed[0]) {
        return None;
    }
    let mean = observed.iter().sum::<f64>() / observed.len() as f64;
    let ss_tot: f64 = observed.iter().map(|y| (y - mean).powi(2)).sum();
    let ss_res: f64 = observed
        .iter()
        .zip(predicted)
        .map(|(y, p)| (y - p).powi(2))
        .sum();
    Some(1.0 - ss_res / ss_tot)
}

fn mean_squared_error(observed: &[f64], predicted: &[f64]) -> f64 {
    observed
        .iter()
        .zip(predicted)
        .map(|(y, p)| (y - p).powi(2))
        .sum::<f64>()
        / observed.len() as f64
}

fn mean_absolute_error(observed: &[f64], predicted: &[f64]) -> f64 {
    observed
        .iter()
        .zip(predicted)
        .map(|(y, p)| (y - p).abs())
        .sum::<f64>()
        / observed.len() as f64
}
