//! # Coverage Correlation
//!
//! Relates cross-dataset performance to how much of a target dataset the
//! source dataset already covers. Overlap counts per (source, target) pair are
//! an external input; this module turns them into fractions of the target's
//! drugs and cell lines and correlates those with the off-diagonal cells of
//! every G and Gn matrix. The per-source Ga aggregate is correlated with the
//! source's mean off-diagonal fraction.

use ahash::AHashMap;
use log::{debug, info};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::artifact::{
    ArtifactError, ArtifactHandle, field, open_table, parse_field, read_records, record_error,
    write_table,
};
use crate::matrix::{MatrixSet, NormalizedSet};
use crate::stats::{pearson, spearman};
use crate::types::{MetricKind, Value, mean_defined};

const OVERLAP_HEADER: [&str; 6] = [
    "source",
    "target",
    "shared_drugs",
    "shared_cells",
    "target_drugs",
    "target_cells",
];
const CORRELATION_HEADER: [&str; 7] = [
    "model",
    "metric",
    "layer",
    "overlap",
    "pearson",
    "spearman",
    "n_pairs",
];

/// Drug and cell-line overlap between a source and a target dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlapRecord {
    pub source: String,
    pub target: String,
    pub shared_drugs: u64,
    pub shared_cells: u64,
    pub target_drugs: u64,
    pub target_cells: u64,
}

fn fraction(shared: u64, total: u64) -> Value {
    if total == 0 {
        Value::Undefined
    } else {
        Value::from_finite(shared as f64 / total as f64)
    }
}

impl OverlapRecord {
    /// Share of the target's drugs that also occur in the source.
    pub fn drug_fraction(&self) -> Value {
        fraction(self.shared_drugs, self.target_drugs)
    }

    /// Share of the target's cell lines that also occur in the source.
    pub fn cell_fraction(&self) -> Value {
        fraction(self.shared_cells, self.target_cells)
    }

    pub fn fraction(&self, kind: OverlapKind) -> Value {
        match kind {
            OverlapKind::Drugs => self.drug_fraction(),
            OverlapKind::Cells => self.cell_fraction(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OverlapKind {
    Drugs,
    Cells,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Layer {
    G,
    Gn,
    Ga,
}

impl fmt::Display for OverlapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OverlapKind::Drugs => "drugs",
            OverlapKind::Cells => "cells",
        })
    }
}

impl FromStr for OverlapKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drugs" => Ok(OverlapKind::Drugs),
            "cells" => Ok(OverlapKind::Cells),
            other => Err(format!("unknown overlap kind '{other}'")),
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Layer::G => "G",
            Layer::Gn => "Gn",
            Layer::Ga => "Ga",
        })
    }
}

impl FromStr for Layer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "G" => Ok(Layer::G),
            "Gn" => Ok(Layer::Gn),
            "Ga" => Ok(Layer::Ga),
            other => Err(format!("unknown layer '{other}'")),
        }
    }
}

/// Correlation of one overlap fraction with one matrix layer of one (model, metric).
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageCorrelation {
    pub model: String,
    pub metric: MetricKind,
    pub layer: Layer,
    pub overlap: OverlapKind,
    pub pearson: Value,
    pub spearman: Value,
    /// Points where both the layer value and the fraction are defined: off-diagonal
    /// cells for G and Gn, sources for Ga.
    pub n_pairs: usize,
}

fn correlate_pairs(pairs: &[(f64, f64)]) -> (Value, Value) {
    let (x, y): (Vec<f64>, Vec<f64>) = pairs.iter().copied().unzip();
    let pearson = pearson(&x, &y).map(Value::from_finite).unwrap_or_else(|err| {
        debug!("Pearson correlation undefined: {err}");
        Value::Undefined
    });
    let spearman = spearman(&x, &y).map(Value::from_finite).unwrap_or(Value::Undefined);
    (pearson, spearman)
}

type OverlapLookup<'a> = AHashMap<(&'a str, &'a str), &'a OverlapRecord>;

/// (fraction, cell) pairs over the off-diagonal cells of one layer.
fn cell_pairs(
    sources: &[String],
    targets: &[String],
    by_pair: &OverlapLookup<'_>,
    overlap: OverlapKind,
    cell: impl Fn(&str, &str) -> Value,
) -> Vec<(f64, f64)> {
    let mut pairs = Vec::new();
    for source in sources {
        for target in targets.iter().filter(|t| *t != source) {
            let (source, target) = (source.as_str(), target.as_str());
            let Some(record) = by_pair.get(&(source, target)) else {
                continue;
            };
            let fraction = record.fraction(overlap);
            if let (Some(x), Some(y)) = (fraction.get(), cell(source, target).get()) {
                pairs.push((x, y));
            }
        }
    }
    pairs
}

/// (mean off-diagonal fraction, Ga) pairs, one per source.
fn source_pairs(
    sources: &[String],
    targets: &[String],
    by_pair: &OverlapLookup<'_>,
    overlap: OverlapKind,
    ga: impl Fn(&str) -> Value,
) -> Vec<(f64, f64)> {
    sources
        .iter()
        .filter_map(|source| {
            let coverage = mean_defined(
                targets
                    .iter()
                    .filter(|t| *t != source)
                    .filter_map(|target| by_pair.get(&(source.as_str(), target.as_str())))
                    .map(|record| record.fraction(overlap)),
            );
            Some((coverage.get()?, ga(source.as_str()).get()?))
        })
        .collect()
}

/// Correlates overlap fractions with the off-diagonal G and Gn cells and the
/// Ga aggregates of every (model, metric).
pub fn correlate(
    matrices: &MatrixSet,
    normalized: &NormalizedSet,
    overlaps: &[OverlapRecord],
) -> Vec<CoverageCorrelation> {
    let by_pair: OverlapLookup<'_> = overlaps
        .iter()
        .map(|r| ((r.source.as_str(), r.target.as_str()), r))
        .collect();

    let mut results = Vec::new();
    for g in &matrices.matrices {
        let normalization = normalized.get(&g.model, g.metric);
        for layer in [Layer::G, Layer::Gn, Layer::Ga] {
            for overlap in [OverlapKind::Drugs, OverlapKind::Cells] {
                let pairs = match layer {
                    Layer::G => cell_pairs(&g.sources, &g.targets, &by_pair, overlap, |s, t| {
                        g.mean_at(s, t)
                    }),
                    Layer::Gn => cell_pairs(&g.sources, &g.targets, &by_pair, overlap, |s, t| {
                        normalization.map_or(Value::Undefined, |n| n.gn.value_at(s, t))
                    }),
                    Layer::Ga => source_pairs(&g.sources, &g.targets, &by_pair, overlap, |s| {
                        normalization
                            .and_then(|n| n.aggregate(s))
                            .map_or(Value::Undefined, |a| a.ga)
                    }),
                };
                let (pearson, spearman) = correlate_pairs(&pairs);
                results.push(CoverageCorrelation {
                    model: g.model.clone(),
                    metric: g.metric,
                    layer,
                    overlap,
                    pearson,
                    spearman,
                    n_pairs: pairs.len(),
                });
            }
        }
    }
    info!(
        "Correlated overlap with {} matrices ({} summaries)",
        matrices.matrices.len(),
        results.len()
    );
    results
}

/// The externally supplied overlap counts.
#[derive(Debug, Clone)]
pub struct OverlapFile {
    path: PathBuf,
}

impl OverlapFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ArtifactHandle<Vec<OverlapRecord>> for OverlapFile {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn store(&self, records: &Vec<OverlapRecord>) -> Result<(), ArtifactError> {
        write_table(&self.path, |writer| {
            writer.write_record(OVERLAP_HEADER)?;
            for r in records {
                writer.write_record([
                    r.source.clone(),
                    r.target.clone(),
                    r.shared_drugs.to_string(),
                    r.shared_cells.to_string(),
                    r.target_drugs.to_string(),
                    r.target_cells.to_string(),
                ])?;
            }
            Ok(())
        })
    }

    fn load(&self) -> Result<Vec<OverlapRecord>, ArtifactError> {
        let path = self.path.as_path();
        let (mut reader, _) = open_table(path, &OVERLAP_HEADER)?;
        read_records(path, &mut reader)?
            .iter()
            .map(|record| {
                let r = OverlapRecord {
                    source: field(path, record, 0, "source")?.to_string(),
                    target: field(path, record, 1, "target")?.to_string(),
                    shared_drugs: parse_field(path, record, 2, "shared_drugs")?,
                    shared_cells: parse_field(path, record, 3, "shared_cells")?,
                    target_drugs: parse_field(path, record, 4, "target_drugs")?,
                    target_cells: parse_field(path, record, 5, "target_cells")?,
                };
                if r.shared_drugs > r.target_drugs || r.shared_cells > r.target_cells {
                    return Err(record_error(
                        path,
                        record,
                        "shared count exceeds the target's total",
                    ));
                }
                Ok(r)
            })
            .collect()
    }
}

/// `coverage_correlation.csv`.
#[derive(Debug, Clone)]
pub struct CoverageFile {
    path: PathBuf,
}

impl CoverageFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ArtifactHandle<Vec<CoverageCorrelation>> for CoverageFile {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn store(&self, results: &Vec<CoverageCorrelation>) -> Result<(), ArtifactError> {
        write_table(&self.path, |writer| {
            writer.write_record(CORRELATION_HEADER)?;
            for r in results {
                writer.write_record([
                    r.model.clone(),
                    r.metric.to_string(),
                    r.layer.to_string(),
                    r.overlap.to_string(),
                    r.pearson.to_field(),
                    r.spearman.to_field(),
                    r.n_pairs.to_string(),
                ])?;
            }
            Ok(())
        })
    }

    fn load(&self) -> Result<Vec<CoverageCorrelation>, ArtifactError> {
        let path = self.path.as_path();
        let (mut reader, _) = open_table(path, &CORRELATION_HEADER)?;
        let value = |record: &csv::StringRecord, index: usize| -> Result<Value, ArtifactError> {
            Value::parse_field(field(path, record, index, "correlation")?)
                .map_err(|message| record_error(path, record, message))
        };
        read_records(path, &mut reader)?
            .iter()
            .map(|record| {
                Ok(CoverageCorrelation {
                    model: field(path, record, 0, "model")?.to_string(),
                    metric: parse_field(path, record, 1, "metric")?,
                    layer: parse_field(path, record, 2, "layer")?,
                    overlap: parse_field(path, record, 3, "overlap")?,
                    pearson: value(record, 4)?,
                    spearman: value(record, 5)?,
                    n_pairs: parse_field(path, record, 6, "n_pairs")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::GMatrix;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;
    use tempfile::tempdir;

    fn overlap(source: &str, target: &str, shared_drugs: u64, target_drugs: u64) -> OverlapRecord {
        OverlapRecord {
            source: source.into(),
            target: target.into(),
            shared_drugs,
            shared_cells: 0,
            target_drugs,
            target_cells: 0,
        }
    }

    fn matrices() -> MatrixSet {
        use crate::types::Value::Defined as D;
        let names: Vec<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
        let mean = Array2::from_shape_vec(
            (3, 3),
            vec![
                D(0.9),
                D(0.2),
                D(0.4),
                D(0.3),
                D(0.8),
                D(0.5),
                D(0.6),
                D(0.7),
                Value::Undefined,
            ],
        )
        .unwrap();
        MatrixSet {
            matrices: vec![GMatrix {
                model: "m".into(),
                metric: MetricKind::R2,
                sources: names.clone(),
                targets: names,
                std: Array2::from_elem((3, 3), Value::Undefined),
                mean,
            }],
        }
    }

    #[test]
    fn fractions_need_a_nonzero_total() {
        let r = overlap("A", "B", 3, 4);
        assert_eq!(r.drug_fraction(), Value::Defined(0.75));
        assert_eq!(r.cell_fraction(), Value::Undefined);
    }

    #[test]
    fn performance_tracking_overlap_correlates_perfectly() {
        // Off-diagonal G: A->B 0.2, A->C 0.4, B->A 0.3, B->C 0.5, C->A 0.6, C->B 0.7.
        let overlaps = vec![
            overlap("A", "B", 2, 10),
            overlap("A", "C", 4, 10),
            overlap("B", "A", 3, 10),
            overlap("B", "C", 5, 10),
            overlap("C", "A", 6, 10),
            overlap("C", "B", 7, 10),
            // Diagonal entries are never used.
            overlap("A", "A", 0, 10),
        ];
        let set = matrices();
        let normalized = NormalizedSet::from_matrices(&set);
        let results = correlate(&set, &normalized, &overlaps);
        assert_eq!(results.len(), 6);

        let g_drugs = &results[0];
        assert_eq!((g_drugs.layer, g_drugs.overlap), (Layer::G, OverlapKind::Drugs));
        assert_eq!(g_drugs.n_pairs, 6);
        assert_abs_diff_eq!(g_drugs.pearson.get().unwrap(), 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(g_drugs.spearman.get().unwrap(), 1.0, epsilon = 1e-9);

        // Cell totals are zero, so no pair has a defined fraction.
        let g_cells = &results[1];
        assert_eq!(g_cells.n_pairs, 0);
        assert_eq!(g_cells.pearson, Value::Undefined);

        // Row C has no diagonal, so its Gn cells drop out.
        let gn_drugs = &results[2];
        assert_eq!(gn_drugs.layer, Layer::Gn);
        assert_eq!(gn_drugs.n_pairs, 4);

        // Ga: A 0.3, B 0.4, C 0.65 against mean drug fractions 0.3, 0.4, 0.65.
        let ga_drugs = &results[4];
        assert_eq!((ga_drugs.layer, ga_drugs.overlap), (Layer::Ga, OverlapKind::Drugs));
        assert_eq!(ga_drugs.n_pairs, 3);
        assert_abs_diff_eq!(ga_drugs.pearson.get().unwrap(), 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(ga_drugs.spearman.get().unwrap(), 1.0, epsilon = 1e-9);
        assert_eq!(results[5].n_pairs, 0);
    }

    #[test]
    fn files_round_trip_and_reject_impossible_counts() {
        let dir = tempdir().unwrap();
        let overlaps = OverlapFile::new(dir.path().join("coverage.csv"));
        let records = vec![overlap("A", "B", 2, 10)];
        overlaps.store(&records).unwrap();
        assert_eq!(overlaps.load().unwrap(), records);

        std::fs::write(
            dir.path().join("bad.csv"),
            "source,target,shared_drugs,shared_cells,target_drugs,target_cells\nA,B,11,0,10,0\n",
        )
        .unwrap();
        assert!(OverlapFile::new(dir.path().join("bad.csv")).load().is_err());

        let set = matrices();
        let results = correlate(&set, &NormalizedSet::from_matrices(&set), &records);
        let output = CoverageFile::new(dir.path().join("coverage_correlation.csv"));
        output.store(&results).unwrap();
        assert_eq!(output.load().unwrap(), results);
    }
}
