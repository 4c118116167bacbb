use log::info;
use ndarray::Array2;
use rayon::prelude::*;

use crate::score::ScoreTable;
use crate::types::{MetricKind, Value};

use super::GMatrix;

/// Every G matrix of a run, ordered by (model, metric).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatrixSet {
    pub matrices: Vec<GMatrix>,
}

impl MatrixSet {
    pub fn get(&self, model: &str, metric: MetricKind) -> Option<&GMatrix> {
        self.matrices
            .iter()
            .find(|g| g.model == model && g.metric == metric)
    }
}

/// Builds the G matrix of one (model, metric) from the split series of `table`.
///
/// Cells without any defined split are undefined in both layers.
pub fn build_matrix(table: &ScoreTable, model: &str, metric: MetricKind) -> GMatrix {
    let datasets = table.grid.datasets();
    let n = datasets.len();
    let mut mean = Array2::from_elem((n, n), Value::Undefined);
    let mut std = Array2::from_elem((n, n), Value::Undefined);

    for (i, source) in datasets.iter().enumerate() {
        for (j, target) in datasets.iter().enumerate() {
            if let Some(series) = table.get(model, metric, source, target) {
                mean[[i, j]] = series.average();
                std[[i, j]] = series.std();
            }
        }
    }

    GMatrix {
        model: model.to_string(),
        metric,
        sources: datasets.clone(),
        targets: datasets,
        mean,
        std,
    }
}

/// Builds one matrix per (model, metric), in parallel.
pub fn build_all(table: &ScoreTable) -> MatrixSet {
    let jobs: Vec<(&str, MetricKind)> = table
        .grid
        .models
        .iter()
        .flat_map(|model| table.metrics.iter().map(move |&metric| (model.as_str(), metric)))
        .collect();

    let matrices: Vec<GMatrix> = jobs
        .into_par_iter()
        .map(|(model, metric)| build_matrix(table, model, metric))
        .collect();

    let defined: usize = matrices
        .iter()
        .map(|g| g.mean.iter().filter(|v| v.is_defined()).count())
        .sum();
    let cells: usize = matrices.iter().map(|g| g.mean.len()).sum();
    info!(
        "Built {} generalization matrices ({defined} of {cells} cells defined)",
        matrices.len()
    );
    MatrixSet { matrices }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::ScoreEntry;
    use crate::types::{Grid, RunKey};
    use approx::assert_abs_diff_eq;

    fn table(cells: &[(&str, &str, [Option<f64>; 3])]) -> ScoreTable {
        let grid = Grid {
            sources: vec!["A".into(), "B".into()],
            targets: vec!["A".into(), "B".into(), "C".into()],
            splits: vec![0, 1, 2],
            models: vec!["m".into()],
        };
        let entries = cells.iter().flat_map(|(source, target, values)| {
            values.iter().enumerate().map(move |(split, value)| ScoreEntry {
                run: RunKey {
                    source: source.to_string(),
                    target: target.to_string(),
                    split: split as u32,
                    model: "m".into(),
                },
                metric: MetricKind::R2,
                value: Value::from(*value),
                n_samples: 20,
            })
        });
        ScoreTable::from_entries(grid, &[MetricKind::R2], entries.collect::<Vec<_>>()).unwrap()
    }

    #[test]
    fn cells_hold_split_mean_and_std() {
        let scores = table(&[
            ("A", "A", [Some(0.8), Some(0.82), Some(0.78)]),
            ("A", "B", [Some(0.5), Some(0.4), Some(0.45)]),
        ]);
        let g = build_matrix(&scores, "m", MetricKind::R2);
        assert_abs_diff_eq!(g.mean_at("A", "A").get().unwrap(), 0.80, epsilon = 1e-12);
        assert_abs_diff_eq!(g.std_at("A", "A").get().unwrap(), 0.0163299, epsilon = 1e-6);
        assert_abs_diff_eq!(g.mean_at("A", "B").get().unwrap(), 0.45, epsilon = 1e-12);
    }

    #[test]
    fn axes_cover_every_dataset_and_absent_cells_stay_undefined() {
        let scores = table(&[("A", "B", [Some(0.5), None, None])]);
        let g = build_matrix(&scores, "m", MetricKind::R2);
        assert_eq!(g.sources, vec!["A", "B", "C"]);
        assert_eq!(g.targets, g.sources);
        assert_eq!(g.mean.dim(), (3, 3));
        assert_eq!(g.mean_at("A", "B"), Value::Defined(0.5));
        assert_eq!(g.std_at("A", "B"), Value::Defined(0.0));
        // "C" is never a source in the grid.
        assert_eq!(g.mean_at("C", "A"), Value::Undefined);
        assert_eq!(g.diagonal("B"), Value::Undefined);
    }

    #[test]
    fn building_twice_is_bit_identical() {
        let scores = table(&[
            ("A", "A", [Some(0.1), Some(0.7), Some(0.3)]),
            ("B", "C", [Some(0.2), None, Some(0.9)]),
        ]);
        let first = build_all(&scores);
        let second = build_all(&scores);
        assert_eq!(first, second);
        assert_eq!(first.matrices.len(), 1);
        assert!(first.get("m", MetricKind::R2).is_some());
        assert!(first.get("m", MetricKind::Mae).is_none());
    }
}
