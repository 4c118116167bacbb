//! Normalized and aggregated views of a G matrix.
//!
//! - `Gn[s, t] = G[s, t] / G[s, s]`, with `Gn[s, s] = 1` exactly. A row whose
//!   diagonal is undefined, zero, or negative is undefined throughout.
//! - `Ga[s]` is the mean of the defined off-diagonal entries of row `s` of G.
//! - `Gna[s]` is the same mean over row `s` of Gn.
//!
//! The diagonal never enters `Ga` or `Gna`.

use log::{debug, info};
use ndarray::Array2;
use rayon::prelude::*;

use crate::types::{MetricKind, Value, mean_defined};

use super::{GMatrix, MatrixSet};

/// `Gn` for one (model, metric).
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedMatrix {
    pub model: String,
    pub metric: MetricKind,
    pub sources: Vec<String>,
    pub targets: Vec<String>,
    pub values: Array2<Value>,
}

impl NormalizedMatrix {
    pub fn value_at(&self, source: &str, target: &str) -> Value {
        let i = self.sources.iter().position(|s| s == source);
        let j = self.targets.iter().position(|t| t == target);
        match (i, j) {
            (Some(i), Some(j)) => self.values[[i, j]],
            _ => Value::Undefined,
        }
    }
}

/// `Ga` and `Gna` of one source.
#[derive(Debug, Clone, PartialEq)]
pub struct Generalization {
    pub source: String,
    pub ga: Value,
    pub gna: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Normalization {
    pub gn: NormalizedMatrix,
    /// One entry per source, in the matrix's source order.
    pub aggregates: Vec<Generalization>,
}

impl Normalization {
    pub fn aggregate(&self, source: &str) -> Option<&Generalization> {
        self.aggregates.iter().find(|g| g.source == source)
    }
}

/// Per (model, metric) overview across sources.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSummary {
    pub model: String,
    pub metric: MetricKind,
    pub mean_diagonal: Value,
    pub mean_ga: Value,
    pub mean_gna: Value,
    /// Sources with a defined `Ga`.
    pub n_sources: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedSet {
    pub normalizations: Vec<Normalization>,
    pub summaries: Vec<ModelSummary>,
}

impl NormalizedSet {
    pub fn from_matrices(set: &MatrixSet) -> Self {
        let normalizations: Vec<Normalization> = set.matrices.par_iter().map(normalize).collect();
        let summaries = set
            .matrices
            .iter()
            .zip(&normalizations)
            .map(|(g, n)| summarize(g, n))
            .collect();
        info!("Normalized {} matrices", normalizations.len());
        Self {
            normalizations,
            summaries,
        }
    }

    pub fn get(&self, model: &str, metric: MetricKind) -> Option<&Normalization> {
        self.normalizations
            .iter()
            .find(|n| n.gn.model == model && n.gn.metric == metric)
    }
}

/// The row scale used to normalize `source`, when it is usable.
fn row_scale(diagonal: Value) -> Option<f64> {
    diagonal.get().filter(|&d| d > 0.0)
}

pub fn normalize(g: &GMatrix) -> Normalization {
    let mut values = Array2::from_elem(g.mean.dim(), Value::Undefined);
    for (i, source) in g.sources.iter().enumerate() {
        let Some(scale) = row_scale(g.diagonal(source)) else {
            debug!(
                "{} {}: row '{source}' has no usable diagonal; its Gn row is undefined",
                g.model, g.metric
            );
            continue;
        };
        for (j, target) in g.targets.iter().enumerate() {
            values[[i, j]] = if target == source {
                Value::Defined(1.0)
            } else {
                g.mean[[i, j]].get().map_or(Value::Undefined, |x| Value::from_finite(x / scale))
            };
        }
    }

    let aggregates = g
        .sources
        .iter()
        .enumerate()
        .map(|(i, source)| {
            let off_diagonal = |layer: &Array2<Value>| {
                mean_defined(
                    g.targets
                        .iter()
                        .enumerate()
                        .filter(|(_, target)| *target != source)
                        .map(|(j, _)| layer[[i, j]]),
                )
            };
            Generalization {
                source: source.clone(),
                ga: off_diagonal(&g.mean),
                gna: off_diagonal(&values),
            }
        })
        .collect();

    Normalization {
        gn: NormalizedMatrix {
            model: g.model.clone(),
            metric: g.metric,
            sources: g.sources.clone(),
            targets: g.targets.clone(),
            values,
        },
        aggregates,
    }
}

fn summarize(g: &GMatrix, normalization: &Normalization) -> ModelSummary {
    let aggregates = &normalization.aggregates;
    ModelSummary {
        model: g.model.clone(),
        metric: g.metric,
        mean_diagonal: mean_defined(g.sources.iter().map(|s| g.diagonal(s))),
        mean_ga: mean_defined(aggregates.iter().map(|a| a.ga)),
        mean_gna: mean_defined(aggregates.iter().map(|a| a.gna)),
        n_sources: aggregates.iter().filter(|a| a.ga.is_defined()).count(),
    }
}
