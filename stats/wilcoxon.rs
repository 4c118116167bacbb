//! Wilcoxon signed-rank test for paired samples (two-sided).
//!
//! Zero differences are discarded before ranking. The statistic is
//! `min(W+, W-)`. With at most [`EXACT_LIMIT`] non-zero differences and no ties
//! among their magnitudes, the p-value comes from the enumerated null
//! distribution; otherwise from a normal approximation with tie and continuity
//! corrections.

use statrs::distribution::{ContinuousCDF, Normal};
use thiserror::Error;

use super::rank::{average_ranks, tie_group_sizes};

/// Largest number of non-zero differences whose null distribution is enumerated.
pub const EXACT_LIMIT: usize = 50;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WilcoxonError {
    #[error("paired samples have different lengths ({left} vs {right})")]
    LengthMismatch { left: usize, right: usize },
    #[error("paired samples are empty")]
    Empty,
    #[error("paired samples contain non-finite values")]
    NonFinite,
    #[error("normal approximation unavailable: {0}")]
    Distribution(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PValueMethod {
    Exact,
    NormalApproximation,
    /// Every difference was zero; there is no evidence of a difference.
    AllZero,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WilcoxonResult {
    pub statistic: f64,
    pub p_value: f64,
    pub n_pairs: usize,
    pub n_nonzero: usize,
    pub method: PValueMethod,
}

pub fn wilcoxon_signed_rank(x: &[f64], y: &[f64]) -> Result<WilcoxonResult, WilcoxonError> {
    if x.len() != y.len() {
        return Err(WilcoxonError::LengthMismatch {
            left: x.len(),
            right: y.len(),
        });
    }
    if x.is_empty() {
        return Err(WilcoxonError::Empty);
    }
    if x.iter().chain(y).any(|v| !v.is_finite()) {
        return Err(WilcoxonError::NonFinite);
    }

    let differences: Vec<f64> = x
        .iter()
        .zip(y)
        .map(|(a, b)| a - b)
        .filter(|&d| d != 0.0)
        .collect();
    let n = differences.len();
    if n == 0 {
        return Ok(WilcoxonResult {
            statistic: 0.0,
            p_value: 1.0,
            n_pairs: x.len(),
            n_nonzero: 0,
            method: PValueMethod::AllZero,
        });
    }

    let magnitudes: Vec<f64> = differences.iter().map(|d| d.abs()).collect();
    let ranks = average_ranks(&magnitudes);
    let (w_plus, w_minus) = differences
        .iter()
        .zip(&ranks)
        .fold((0.0, 0.0), |(plus, minus), (&d, &r)| {
            if d > 0.0 { (plus + r, minus) } else { (plus, minus + r) }
        });
    let statistic = w_plus.min(w_minus);

    let tie_sizes = tie_group_sizes(&magnitudes);
    let has_ties = tie_sizes.iter().any(|&t| t > 1);

    let (p_value, method) = if n <= EXACT_LIMIT && !has_ties {
        (exact_two_sided(n, statistic), PValueMethod::Exact)
    } else {
        (
            normal_two_sided(n, statistic, &tie_sizes)?,
            PValueMethod::NormalApproximation,
        )
    };

    Ok(WilcoxonResult {
        statistic,
        p_value,
        n_pairs: x.len(),
        n_nonzero: n,
        method,
    })
}

/// `2 * P(T <= statistic)` under the null, where `T` is the sum of a uniformly
/// random subset of the ranks `1..=n`.
fn exact_two_sided(n: usize, statistic: f64) -> f64 {
    let max_sum = n * (n + 1) / 2;
    // counts[s] = number of subsets of {1..=r} summing to s; fits in u64 for n <= 63.
    let mut counts = vec![0u64; max_sum + 1];
    counts[0] = 1;
    for rank in 1..=n {
        for sum in (rank..=max_sum).rev() {
            counts[sum] += counts[sum - rank];
        }
    }

    let bound = (statistic.round() as usize).min(max_sum);
    let lower_tail: u64 = counts[..=bound].iter().sum();
    let total = 2f64.powi(n as i32);
    (2.0 * lower_tail as f64 / total).min(1.0)
}

fn normal_two_sided(n: usize, statistic: f64, tie_sizes: &[usize]) -> Result<f64, WilcoxonError> {
    let nf = n as f64;
    let mean = nf * (nf + 1.0) / 4.0;
    let tie_term: f64 = tie_sizes
        .iter()
        .map(|&t| {
            let t = t as f64;
            t * t * t - t
        })
        .sum();
    let variance = nf * (nf + 1.0) * (2.0 * nf + 1.0) / 24.0 - tie_term / 48.0;
    if variance <= 0.0 {
        return Ok(1.0);
    }

    let deviation = statistic - mean;
    let corrected = if deviation > 0.0 {
        deviation - 0.5
    } else if deviation < 0.0 {
        deviation + 0.5
    } else {
        0.0
    };
    let z = corrected / variance.sqrt();

    let standard = Normal::new(0.0, 1.0).map_err(|e| WilcoxonError::Distribution(e.to_string()))?;
    Ok((2.0 * standard.sf(z.abs())).min(1.0))
}
