//! # Generalization Matrices
//!
//! A [`GMatrix`] holds, for one (model, metric), the split mean and split
//! standard deviation of every (source, target) cell. Rows are sources and
//! columns are targets; both axes list every dataset seen anywhere in the
//! scores, so the diagonal is always present.

pub mod build;
pub mod io;
pub mod normalize;

use ndarray::Array2;

use crate::types::{MetricKind, Value};

pub use build::{MatrixSet, build_all, build_matrix};
pub use normalize::{
    Generalization, ModelSummary, NormalizedMatrix, NormalizedSet, Normalization, normalize,
};

#[derive(Debug, Clone, PartialEq)]
pub struct GMatrix {
    pub model: String,
    pub metric: MetricKind,
    pub sources: Vec<String>,
    pub targets: Vec<String>,
    /// `mean[[i, j]]` is the split mean for `sources[i] -> targets[j]`.
    pub mean: Array2<Value>,
    pub std: Array2<Value>,
}

impl GMatrix {
    pub fn source_index(&self, source: &str) -> Option<usize> {
        self.sources.iter().position(|s| s == source)
    }

    pub fn target_index(&self, target: &str) -> Option<usize> {
        self.targets.iter().position(|t| t == target)
    }

    pub fn mean_at(&self, source: &str, target: &str) -> Value {
        match (self.source_index(source), self.target_index(target)) {
            (Some(i), Some(j)) => self.mean[[i, j]],
            _ => Value::Undefined,
        }
    }

    pub fn std_at(&self, source: &str, target: &str) -> Value {
        match (self.source_index(source), self.target_index(target)) {
            (Some(i), Some(j)) => self.std[[i, j]],
            _ => Value::Undefined,
        }
    }

    /// Within-dataset performance of `source`.
    pub fn diagonal(&self, source: &str) -> Value {
        self.mean_at(source, source)
    }
}
