//! # Score Computation
//!
//! Turns validated prediction files into a [`ScoreTable`]: every configured
//! metric for every file, with undefined metrics recorded as such and absent
//! files kept as empty slots of the grid.

pub mod io;
pub mod metrics;
pub mod table;

use log::{info, warn};
use rayon::prelude::*;
use thiserror::Error;

use crate::store::{PredictionSet, Predictions};
use crate::types::{MetricKind, Value};

pub use metrics::{MetricError, UndefinedReason};
pub use table::{ScoreEntry, ScoreTable, ScoreTableError, SplitScore, SplitSeries};

#[derive(Error, Debug)]
pub enum ScoreError {
    #[error("Could not score '{}': {source}", path.display())]
    Metric {
        path: std::path::PathBuf,
        #[source]
        source: MetricError,
    },
    #[error(transparent)]
    Table(#[from] ScoreTableError),
}

#[derive(Debug, Clone)]
pub struct ScoreComputer {
    metrics: Vec<MetricKind>,
}

impl ScoreComputer {
    pub fn new(metrics: &[MetricKind]) -> Self {
        let mut metrics = metrics.to_vec();
        metrics.sort_unstable();
        metrics.dedup();
        Self { metrics }
    }

    pub fn metrics(&self) -> &[MetricKind] {
        &self.metrics
    }

    /// Scores one file with every configured metric.
    pub fn score_file(&self, predictions: &Predictions) -> Result<Vec<ScoreEntry>, ScoreError> {
        self.metrics
            .iter()
            .map(|&metric| {
                let outcome =
                    metrics::compute(metric, &predictions.observed, &predictions.predicted);
                let value = match outcome {
                    Ok(x) => Value::from_finite(x),
                    Err(err @ MetricError::Undefined { .. }) => {
                        warn!("{}: {err}", predictions.run);
                        Value::Undefined
                    }
                    Err(source) => {
                        return Err(ScoreError::Metric {
                            path: predictions.path.clone(),
                            source,
                        });
                    }
                };
                Ok(ScoreEntry {
                    run: predictions.run.clone(),
                    metric,
                    value,
                    n_samples: predictions.len(),
                })
            })
            .collect()
    }

    /// Scores every loaded file in parallel and arranges the results over the set's grid.
    pub fn score_set(&self, set: &PredictionSet) -> Result<ScoreTable, ScoreError> {
        let per_file: Vec<Vec<ScoreEntry>> = set
            .predictions
            .par_iter()
            .map(|predictions| self.score_file(predictions))
            .collect::<Result<_, _>>()?;

        let entries: Vec<ScoreEntry> = per_file.into_iter().flatten().collect();
        let computed = entries.len();
        let table = ScoreTable::from_entries(set.grid.clone(), &self.metrics, entries)?;
        info!(
            "Computed {} scores from {} files ({} defined, {} combinations without predictions)",
            computed,
            set.predictions.len(),
            table.defined_count(),
            set.missing.len()
        );
        Ok(table)
    }
}
