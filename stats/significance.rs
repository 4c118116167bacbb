//! Paired model comparisons on matched per-split scores.
//!
//! For every (source, target, metric) cell and every unordered pair of models,
//! the two split series are aligned on the splits where both are defined and
//! compared with the Wilcoxon signed-rank test. Too few matched splits make the
//! comparison inconclusive; it is still reported, with the count that was found.
//! Benjamini-Hochberg q-values are computed per metric over the conclusive
//! comparisons.

use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::config::SignificanceConfig;
use crate::score::{ScoreTable, SplitSeries};
use crate::types::{MetricKind, Value};

use super::correction::benjamini_hochberg;
use super::wilcoxon::{WilcoxonError, wilcoxon_signed_rank};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignificanceError {
    #[error("only {used} matched split(s) are available; at least {required} are required")]
    InsufficientSplits { used: usize, required: usize },
    #[error(transparent)]
    Test(#[from] WilcoxonError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PairwiseTestResult {
    pub source: String,
    pub target: String,
    pub metric: MetricKind,
    pub model_a: String,
    pub model_b: String,
    pub statistic: Value,
    pub p_value: Value,
    pub q_value: Value,
    pub significant: bool,
    /// Mean of `model_a - model_b` over the matched splits.
    pub mean_difference: Value,
    pub n_splits_used: usize,
    pub inconclusive: bool,
}

/// The outcome of comparing two aligned series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairedComparison {
    pub statistic: f64,
    pub p_value: f64,
    pub mean_difference: f64,
    pub n_splits_used: usize,
}

/// Values of `a` and `b` on the splits where both are defined, in split order.
pub fn align_splits(a: &SplitSeries, b: &SplitSeries) -> (Vec<u32>, Vec<f64>, Vec<f64>) {
    let right: BTreeMap<u32, f64> = b.defined().collect();
    let mut splits = Vec::new();
    let mut left_values = Vec::new();
    let mut right_values = Vec::new();
    for (split, value) in a.defined() {
        if let Some(&other) = right.get(&split) {
            splits.push(split);
            left_values.push(value);
            right_values.push(other);
        }
    }
    (splits, left_values, right_values)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignificanceReport {
    pub results: Vec<PairwiseTestResult>,
}

impl SignificanceReport {
    pub fn conclusive(&self) -> impl Iterator<Item = &PairwiseTestResult> + '_ {
        self.results.iter().filter(|r| !r.inconclusive)
    }

    pub fn find(
        &self,
        source: &str,
        target: &str,
        metric: MetricKind,
        model_a: &str,
        model_b: &str,
    ) -> Option<&PairwiseTestResult> {
        self.results.iter().find(|r| {
            r.source == source
                && r.target == target
                && r.metric == metric
                && r.model_a == model_a
                && r.model_b == model_b
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignificanceTester {
    min_splits: usize,
    fdr_alpha: f64,
}

impl SignificanceTester {
    pub fn new(config: &SignificanceConfig) -> Self {
        Self {
            min_splits: config.min_splits.max(1),
            fdr_alpha: config.fdr_alpha,
        }
    }

    /// Compares two series after aligning them by split index.
    pub fn compare(
        &self,
        a: &SplitSeries,
        b: &SplitSeries,
    ) -> Result<PairedComparison, SignificanceError> {
        let (_, left, right) = align_splits(a, b);
        self.compare_aligned(&left, &right)
    }

    fn compare_aligned(
        &self,
        left: &[f64],
        right: &[f64],
    ) -> Result<PairedComparison, SignificanceError> {
        if left.len() < self.min_splits {
            return Err(SignificanceError::InsufficientSplits {
                used: left.len(),
                required: self.min_splits,
            });
        }
        let outcome = wilcoxon_signed_rank(left, right)?;
        Ok(PairedComparison {
            statistic: outcome.statistic,
            p_value: outcome.p_value,
            mean_difference: mean_difference(left, right),
            n_splits_used: left.len(),
        })
    }

    /// Tests every model pair on every cell of `table`.
    pub fn run(&self, table: &ScoreTable) -> SignificanceReport {
        let grid = &table.grid;
        let mut jobs = Vec::new();
        for &metric in &table.metrics {
            for source in &grid.sources {
                for target in &grid.targets {
                    for (i, model_a) in grid.models.iter().enumerate() {
                        for model_b in &grid.models[i + 1..] {
                            jobs.push((metric, source, target, model_a, model_b));
                        }
                    }
                }
            }
        }
        info!("Running {} paired comparisons", jobs.len());

        let mut results: Vec<PairwiseTestResult> = jobs
            .into_par_iter()
            .map(|(metric, source, target, model_a, model_b)| {
                let a = table.get(model_a, metric, source, target);
                let b = table.get(model_b, metric, source, target);
                let mut result = PairwiseTestResult {
                    source: source.clone(),
                    target: target.clone(),
                    metric,
                    model_a: model_a.clone(),
                    model_b: model_b.clone(),
                    statistic: Value::Undefined,
                    p_value: Value::Undefined,
                    q_value: Value::Undefined,
                    significant: false,
                    mean_difference: Value::Undefined,
                    n_splits_used: 0,
                    inconclusive: true,
                };
                let (Some(a), Some(b)) = (a, b) else {
                    return result;
                };
                let (_, left, right) = align_splits(a, b);
                result.n_splits_used = left.len();
                if !left.is_empty() {
                    result.mean_difference = Value::from_finite(mean_difference(&left, &right));
                }
                record_outcome(&mut result, self.compare_aligned(&left, &right));
                result
            })
            .collect();

        self.apply_fdr(&mut results);

        let inconclusive = results.iter().filter(|r| r.inconclusive).count();
        if inconclusive > 0 {
            warn!(
                "{inconclusive} of {} comparisons are inconclusive (fewer than {} matched splits)",
                results.len(),
                self.min_splits
            );
        }
        SignificanceReport { results }
    }

    /// Fills q-values and significance flags, one correction family per metric.
    fn apply_fdr(&self, results: &mut [PairwiseTestResult]) {
        let mut families: BTreeMap<MetricKind, Vec<usize>> = BTreeMap::new();
        for (idx, result) in results.iter().enumerate() {
            if !result.inconclusive {
                families.entry(result.metric).or_default().push(idx);
            }
        }
        for members in families.values() {
            let p_values: Vec<f64> = members
                .iter()
                .filter_map(|&idx| results[idx].p_value.get())
                .collect();
            let q_values = benjamini_hochberg(&p_values);
            for (&idx, q) in members.iter().zip(q_values) {
                results[idx].q_value = Value::Defined(q);
                results[idx].significant = q <= self.fdr_alpha;
            }
        }
    }
}

/// Fills the test outcome into `result`, which already carries the matched
/// split count and mean difference.
fn record_outcome(
    result: &mut PairwiseTestResult,
    outcome: Result<PairedComparison, SignificanceError>,
) {
    let cell = format!(
        "{} -> {} {}: {} vs {}",
        result.source, result.target, result.metric, result.model_a, result.model_b
    );
    match outcome {
        Ok(comparison) => {
            result.statistic = Value::from_finite(comparison.statistic);
            result.p_value = Value::from_finite(comparison.p_value);
            result.inconclusive = !result.p_value.is_defined();
        }
        Err(SignificanceError::InsufficientSplits { used, required }) => {
            debug!("{cell} inconclusive ({used} of {required} splits)");
        }
        Err(err) => {
            warn!("{cell}: {err}");
        }
    }
}

fn mean_difference(left: &[f64], right: &[f64]) -> f64 {
    left.iter().zip(right).map(|(a, b)| a - b).sum::<f64>() / left.len() as f64
}
