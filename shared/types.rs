// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// Only types used by more than one module belong here.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Field text used for an undefined value in every table this crate writes.
pub const UNDEFINED_FIELD: &str = "NA";

/// A numeric result that is either defined or explicitly undefined.
///
/// Undefined values are never coerced to zero or NaN: every aggregation in the
/// crate goes through [`mean_defined`] / [`std_defined`], which skip them.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Value {
    Defined(f64),
    #[default]
    Undefined,
}

impl Value {
    /// Wraps `x`, treating non-finite input as undefined.
    #[inline]
    pub fn from_finite(x: f64) -> Self {
        if x.is_finite() {
            Value::Defined(x)
        } else {
            Value::Undefined
        }
    }

    #[inline]
    pub fn get(self) -> Option<f64> {
        match self {
            Value::Defined(x) => Some(x),
            Value::Undefined => None,
        }
    }

    #[inline]
    pub fn is_defined(self) -> bool {
        matches!(self, Value::Defined(_))
    }

    pub fn to_field(self) -> String {
        match self {
            Value::Defined(x) => format!("{x}"),
            Value::Undefined => UNDEFINED_FIELD.to_string(),
        }
    }

    pub fn parse_field(text: &str) -> Result<Self, String> {
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed == UNDEFINED_FIELD {
            return Ok(Value::Undefined);
        }
        let parsed: f64 = trimmed
            .parse()
            .map_err(|_| format!("'{trimmed}' is neither a number nor '{UNDEFINED_FIELD}'"))?;
        if parsed.is_finite() {
            Ok(Value::Defined(parsed))
        } else {
            Err(format!("non-finite value '{trimmed}'"))
        }
    }
}

impl From<Option<f64>> for Value {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Value::Undefined, Value::from_finite)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_field())
    }
}

/// Arithmetic mean of the defined entries; undefined if none are defined.
pub fn mean_defined<I>(values: I) -> Value
where
    I: IntoIterator<Item = Value>,
{
    let (sum, count) = values
        .into_iter()
        .filter_map(Value::get)
        .fold((0.0_f64, 0usize), |(sum, count), x| (sum + x, count + 1));
    if count == 0 {
        Value::Undefined
    } else {
        Value::Defined(sum / count as f64)
    }
}

/// Population standard deviation (divisor `n`) of the defined entries.
pub fn std_defined<I>(values: I) -> Value
where
    I: IntoIterator<Item = Value>,
{
    let defined: Vec<f64> = values.into_iter().filter_map(Value::get).collect();
    if defined.is_empty() {
        return Value::Undefined;
    }
    let n = defined.len() as f64;
    let mean = defined.iter().sum::<f64>() / n;
    let variance = defined.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    Value::Defined(variance.sqrt())
}

/// Regression metrics computed from (true, predicted) pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    R2,
    Mse,
    Rmse,
    Mae,
    Pcc,
    Scc,
}

impl MetricKind {
    pub const ALL: [MetricKind; 6] = [
        MetricKind::R2,
        MetricKind::Mse,
        MetricKind::Rmse,
        MetricKind::Mae,
        MetricKind::Pcc,
        MetricKind::Scc,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MetricKind::R2 => "r2",
            MetricKind::Mse => "mse",
            MetricKind::Rmse => "rmse",
            MetricKind::Mae => "mae",
            MetricKind::Pcc => "pcc",
            MetricKind::Scc => "scc",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "unknown metric '{}'; expected one of r2, mse, rmse, mae, pcc, scc",
                    s.trim()
                )
            })
    }
}

/// One (source, target, split, model) combination: the unit a prediction file covers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunKey {
    pub source: String,
    pub target: String,
    pub split: u32,
    pub model: String,
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} split {} ({})",
            self.source, self.target, self.split, self.model
        )
    }
}

/// Identifies the per-split series of one metric for one model on one (source, target) cell.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeriesKey {
    pub model: String,
    pub metric: MetricKind,
    pub source: String,
    pub target: String,
}

/// The combination space a run is expected to cover.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Grid {
    pub sources: Vec<String>,
    pub targets: Vec<String>,
    pub splits: Vec<u32>,
    pub models: Vec<String>,
}

impl Grid {
    /// Builds a grid from observed combinations, every axis sorted and deduplicated.
    pub fn from_runs<'a, I>(runs: I) -> Self
    where
        I: IntoIterator<Item = &'a RunKey>,
    {
        let mut grid = Grid::default();
        for run in runs {
            grid.sources.push(run.source.clone());
            grid.targets.push(run.target.clone());
            grid.splits.push(run.split);
            grid.models.push(run.model.clone());
        }
        grid.normalize();
        grid
    }

    /// Sorts every axis (names in natural order) and removes duplicates.
    pub fn normalize(&mut self) {
        sort_natural(&mut self.sources);
        sort_natural(&mut self.targets);
        sort_natural(&mut self.models);
        self.splits.sort_unstable();
        self.splits.dedup();
    }

    /// Every dataset identifier that appears as a source or a target.
    pub fn datasets(&self) -> Vec<String> {
        let mut all: Vec<String> = self
            .sources
            .iter()
            .chain(self.targets.iter())
            .cloned()
            .collect();
        sort_natural(&mut all);
        all
    }

    pub fn expected_runs(&self) -> Vec<RunKey> {
        let mut runs = Vec::with_capacity(
            self.sources.len() * self.targets.len() * self.splits.len() * self.models.len(),
        );
        for source in &self.sources {
            for target in &self.targets {
                for &split in &self.splits {
                    for model in &self.models {
                        runs.push(RunKey {
                            source: source.clone(),
                            target: target.clone(),
                            split,
                            model: model.clone(),
                        });
                    }
                }
            }
        }
        runs
    }
}

/// Sorts names in natural order ("GDSCv2" after "GDSCv1", "split10" after "split9") and dedups.
pub fn sort_natural(names: &mut Vec<String>) {
    names.sort_by(|a, b| natord::compare(a, b));
    names.dedup();
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn mean_and_std_skip_undefined_entries() {
        let values = [
            Value::Defined(0.8),
            Value::Undefined,
            Value::Defined(0.82),
            Value::Defined(0.78),
        ];
        assert_abs_diff_eq!(mean_defined(values).get().unwrap(), 0.80, epsilon = 1e-12);
        assert_abs_diff_eq!(
            std_defined(values).get().unwrap(),
            0.016329931618554,
            epsilon = 1e-9
        );
    }

    #[test]
    fn aggregates_of_nothing_are_undefined() {
        assert_eq!(mean_defined([Value::Undefined, Value::Undefined]), Value::Undefined);
        assert_eq!(std_defined(Vec::new()), Value::Undefined);
        assert_eq!(std_defined([Value::Defined(3.0)]), Value::Defined(0.0));
    }

    #[test]
    fn value_fields_round_trip() {
        let x = Value::Defined(0.1 + 0.2);
        assert_eq!(Value::parse_field(&x.to_field()).unwrap(), x);
        assert_eq!(Value::parse_field("NA").unwrap(), Value::Undefined);
        assert!(Value::parse_field("inf").is_err());
        assert!(Value::parse_field("abc").is_err());
    }

    #[test]
    fn metric_names_parse_case_insensitively() {
        assert_eq!("R2".parse::<MetricKind>().unwrap(), MetricKind::R2);
        assert_eq!(" scc ".parse::<MetricKind>().unwrap(), MetricKind::Scc);
        assert!("auc".parse::<MetricKind>().is_err());
    }

    #[test]
    fn grid_axes_are_sorted_naturally() {
        let runs = vec![
            RunKey {
                source: "GDSCv2".into(),
                target: "CCLE".into(),
                split: 10,
                model: "lgbm".into(),
            },
            RunKey {
                source: "GDSCv1".into(),
                target: "GDSCv2".into(),
                split: 2,
                model: "graphdrp".into(),
            },
        ];
        let grid = Grid::from_runs(&runs);
        assert_eq!(grid.sources, vec!["GDSCv1", "GDSCv2"]);
        assert_eq!(grid.splits, vec![2, 10]);
        assert_eq!(grid.datasets(), vec!["CCLE", "GDSCv1", "GDSCv2"]);
        assert_eq!(grid.expected_runs().len(), 2 * 2 * 2 * 2);
    }
}
