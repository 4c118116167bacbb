//! # Prediction Store
//!
//! This module is the exclusive entry point for the per-split prediction files
//! written by the upstream models. It discovers files named
//! `{source}_{target}_split_{id}_{model}.csv`, validates each one against the
//! configured column schema, and produces one column-oriented [`Predictions`]
//! per file.
//!
//! - Strict schema: the sample id, true value, and predicted value columns must
//!   be present, numeric where required, complete, and finite.
//! - Complete shape: expected combinations with no file are reported as
//!   `missing` so that downstream matrices keep every cell, explicitly undefined.
//!   With `strict_missing` the absence is fatal instead.
//! - Dataset identifiers may not contain `_`; model names may.

use ahash::AHashSet;
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use log::{debug, info, warn};
use polars::prelude::*;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::{GridConfig, InputConfig};
use crate::files::list_files_with_extension;
use crate::types::{Grid, RunKey};

const PREDICTION_EXTENSION: &str = "csv";
const SPLIT_MARKER: &str = "_split_";
/// How many absent combinations an error message spells out before summarizing.
const MISSING_LISTING_LIMIT: usize = 10;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Could not read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Could not parse '{}' as a delimited table: {source}", path.display())]
    Polars {
        path: PathBuf,
        #[source]
        source: PolarsError,
    },
    #[error(
        "The required column '{column}' was not found in '{}'. Please check spelling and case.",
        path.display()
    )]
    ColumnNotFound { path: PathBuf, column: String },
    #[error(
        "The column '{column}' in '{}' could not be read as {expected}. (Found type: {found})",
        path.display()
    )]
    ColumnWrongType {
        path: PathBuf,
        column: String,
        expected: &'static str,
        found: String,
    },
    #[error("Missing or null values were found in column '{column}' of '{}'.", path.display())]
    MissingValues { path: PathBuf, column: String },
    #[error("Non-finite values (NaN or Infinity) were found in column '{column}' of '{}'.", path.display())]
    NonFinite { path: PathBuf, column: String },
    #[error("'{}' contains a header but no prediction rows.", path.display())]
    Empty { path: PathBuf },
    #[error("Two files hold predictions for {run}: '{}' and '{}'", first.display(), second.display())]
    Duplicate {
        run: RunKey,
        first: PathBuf,
        second: PathBuf,
    },
    #[error("{count} expected prediction file(s) are absent: {listing}")]
    MissingData {
        count: usize,
        listing: String,
        missing: Vec<RunKey>,
    },
    #[error("No prediction files matching '{{source}}_{{target}}_split_{{id}}_{{model}}.csv' were found in '{}'", dir.display())]
    NoPredictions { dir: PathBuf },
}

/// One row of a prediction file, borrowed from its [`Predictions`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionRecord<'a> {
    pub run: &'a RunKey,
    pub sample_id: &'a str,
    pub observed: f64,
    pub predicted: f64,
}

/// The validated content of one prediction file.
#[derive(Debug, Clone, PartialEq)]
pub struct Predictions {
    pub run: RunKey,
    pub path: PathBuf,
    pub sample_ids: Vec<String>,
    /// True response values, from the configured true-value column.
    pub observed: Vec<f64>,
    /// Model outputs, from the configured prediction column.
    pub predicted: Vec<f64>,
}

impl Predictions {
    pub fn len(&self) -> usize {
        self.observed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observed.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = PredictionRecord<'_>> + '_ {
        self.sample_ids
            .iter()
            .zip(self.observed.iter().zip(self.predicted.iter()))
            .map(move |(sample_id, (&observed, &predicted))| PredictionRecord {
                run: &self.run,
                sample_id,
                observed,
                predicted,
            })
    }
}

/// Everything the store produced for one run.
#[derive(Debug, Clone)]
pub struct PredictionSet {
    /// The combination space the run is measured against.
    pub grid: Grid,
    /// Loaded files, ordered by [`RunKey`].
    pub predictions: Vec<Predictions>,
    /// Expected combinations with no file, ordered by [`RunKey`].
    pub missing: Vec<RunKey>,
}

/// Splits a prediction file name into its (source, target, split, model) key.
///
/// Returns `None` for names that do not follow
/// `{source}_{target}_split_{id}_{model}.csv`.
pub fn parse_prediction_file_name(file_name: &str) -> Option<RunKey> {
    let stem = file_name
        .len()
        .checked_sub(PREDICTION_EXTENSION.len() + 1)
        .filter(|&cut| {
            file_name.is_char_boundary(cut)
                && file_name[cut..].eq_ignore_ascii_case(".csv")
        })
        .map(|cut| &file_name[..cut])?;

    let marker = stem.find(SPLIT_MARKER)?;
    let (pair, rest) = (&stem[..marker], &stem[marker + SPLIT_MARKER.len()..]);

    let (source, target) = pair.split_once('_')?;
    if source.is_empty() || target.is_empty() || target.contains('_') {
        return None;
    }

    let (split, model) = rest.split_once('_')?;
    if model.is_empty() || split.is_empty() || !split.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    Some(RunKey {
        source: source.to_string(),
        target: target.to_string(),
        split: split.parse().ok()?,
        model: model.to_string(),
    })
}

/// Reads and validates prediction files under one root directory.
#[derive(Debug, Clone)]
pub struct PredictionStore {
    input: InputConfig,
    show_progress: bool,
}

impl PredictionStore {
    pub fn new(input: &InputConfig) -> Self {
        Self {
            input: input.clone(),
            show_progress: false,
        }
    }

    /// Draws a progress bar on stderr while files load.
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn root(&self) -> &Path {
        &self.input.predictions_dir
    }

    /// Finds every file under the root that follows the naming convention.
    pub fn discover(&self) -> Result<BTreeMap<RunKey, PathBuf>, StoreError> {
        let dir = self.root();
        let paths =
            list_files_with_extension(dir, PREDICTION_EXTENSION).map_err(|source| {
                StoreError::Io {
                    path: dir.to_path_buf(),
                    source,
                }
            })?;

        let mut found: BTreeMap<RunKey, PathBuf> = BTreeMap::new();
        for path in paths {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let Some(run) = parse_prediction_file_name(&name) else {
                warn!(
                    "Skipping '{}': name does not follow the prediction file convention",
                    path.display()
                );
                continue;
            };
            if let Some(first) = found.get(&run) {
                return Err(StoreError::Duplicate {
                    run,
                    first: first.clone(),
                    second: path,
                });
            }
            found.insert(run, path);
        }

        if found.is_empty() {
            return Err(StoreError::NoPredictions {
                dir: dir.to_path_buf(),
            });
        }
        debug!("Discovered {} prediction files in '{}'", found.len(), dir.display());
        Ok(found)
    }

    /// Discovers, validates, and loads every prediction file, and reports the
    /// expected combinations that have no file.
    pub fn load(
        &self,
        grid: &GridConfig,
        strict_missing: bool,
    ) -> Result<PredictionSet, StoreError> {
        let discovered = self.discover()?;
        let observed = Grid::from_runs(discovered.keys());
        let grid = grid.resolve(&observed);

        let expected: AHashSet<RunKey> = grid.expected_runs().into_iter().collect();
        let (selected, outside): (Vec<_>, Vec<_>) = discovered
            .into_iter()
            .partition(|(run, _)| expected.contains(run));
        for (run, path) in &outside {
            warn!("Ignoring '{}': {run} is outside the declared grid", path.display());
        }

        let present: AHashSet<&RunKey> = selected.iter().map(|(run, _)| run).collect();
        let missing: Vec<RunKey> = grid
            .expected_runs()
            .into_iter()
            .filter(|run| !present.contains(run))
            .sorted()
            .collect();

        if !missing.is_empty() {
            if strict_missing {
                return Err(StoreError::MissingData {
                    count: missing.len(),
                    listing: describe_runs(&missing),
                    missing,
                });
            }
            warn!(
                "{} expected prediction file(s) are absent; their cells will be undefined: {}",
                missing.len(),
                describe_runs(&missing)
            );
        }

        info!(
            "Loading {} prediction files ({} sources x {} targets x {} splits x {} models)",
            selected.len(),
            grid.sources.len(),
            grid.targets.len(),
            grid.splits.len(),
            grid.models.len()
        );

        let progress = self.progress_bar(selected.len() as u64);
        let loaded: Result<Vec<Predictions>, StoreError> = selected
            .into_par_iter()
            .map(|(run, path)| {
                let result = self.load_file(run, path);
                progress.inc(1);
                result
            })
            .collect();
        progress.finish_and_clear();

        let mut predictions = loaded?;
        predictions.sort_by(|a, b| a.run.cmp(&b.run));

        Ok(PredictionSet {
            grid,
            predictions,
            missing,
        })
    }

    /// Reads one prediction file and validates it against the column schema.
    pub fn load_file(&self, run: RunKey, path: PathBuf) -> Result<Predictions, StoreError> {
        let polars_err = |source: PolarsError| StoreError::Polars {
            path: path.clone(),
            source,
        };

        let file = File::open(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        let df = CsvReader::new(file)
            .with_options(
                CsvReadOptions::default()
                    .with_has_header(true)
                    .with_parse_options(
                        CsvParseOptions::default().with_separator(self.input.separator as u8),
                    ),
            )
            .finish()
            .map_err(polars_err)?;

        let columns: AHashSet<String> = df
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect();
        for column in [
            &self.input.sample_id_column,
            &self.input.true_column,
            &self.input.pred_column,
        ] {
            if !columns.contains(column.as_str()) {
                return Err(StoreError::ColumnNotFound {
                    path: path.clone(),
                    column: column.clone(),
                });
            }
        }

        if df.height() == 0 {
            return Err(StoreError::Empty { path });
        }

        let sample_ids = extract_text_column(&df, &self.input.sample_id_column, &path)?;
        let observed = extract_numeric_column(&df, &self.input.true_column, &path)?;
        let predicted = extract_numeric_column(&df, &self.input.pred_column, &path)?;

        debug!("Loaded {} rows for {run} from '{}'", observed.len(), path.display());

        Ok(Predictions {
            run,
            path,
            sample_ids,
            observed,
            predicted,
        })
    }

    fn progress_bar(&self, total: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total);
        let style = ProgressStyle::with_template(
            ">  Loading predictions [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
        )
        .map(|style| style.progress_chars("█▉▊▋▌▍▎▏ "))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        pb
    }
}

fn describe_runs(runs: &[RunKey]) -> String {
    let mut listing = runs
        .iter()
        .take(MISSING_LISTING_LIMIT)
        .map(|run| run.to_string())
        .join("; ");
    if runs.len() > MISSING_LISTING_LIMIT {
        listing.push_str(&format!("; and {} more", runs.len() - MISSING_LISTING_LIMIT));
    }
    listing
}

fn extract_numeric_column(
    df: &DataFrame,
    column: &str,
    path: &Path,
) -> Result<Vec<f64>, StoreError> {
    let polars_err = |source: PolarsError| StoreError::Polars {
        path: path.to_path_buf(),
        source,
    };
    let series = df.column(column).map_err(polars_err)?;
    if series.null_count() > 0 {
        return Err(StoreError::MissingValues {
            path: path.to_path_buf(),
            column: column.to_string(),
        });
    }

    let wrong_type = || StoreError::ColumnWrongType {
        path: path.to_path_buf(),
        column: column.to_string(),
        expected: "f64 (numeric)",
        found: format!("{:?}", series.dtype()),
    };
    let casted = series.cast(&DataType::Float64).map_err(|_| wrong_type())?;
    if casted.null_count() > 0 {
        return Err(wrong_type());
    }

    let chunked = casted.f64().map_err(polars_err)?.rechunk();
    let values: Vec<f64> = chunked.into_no_null_iter().collect();
    if values.iter().any(|v| !v.is_finite()) {
        return Err(StoreError::NonFinite {
            path: path.to_path_buf(),
            column: column.to_string(),
        });
    }
    Ok(values)
}

fn extract_text_column(
    df: &DataFrame,
    column: &str,
    path: &Path,
) -> Result<Vec<String>, StoreError> {
    let polars_err = |source: PolarsError| StoreError::Polars {
        path: path.to_path_buf(),
        source,
    };
    let series = df
        .column(column)
        .map_err(polars_err)?
        .as_materialized_series()
        .cast(&DataType::String)
        .map_err(polars_err)?;
    if series.null_count() > 0 {
        return Err(StoreError::MissingValues {
            path: path.to_path_buf(),
            column: column.to_string(),
        });
    }
    let chunked = series.str().map_err(polars_err)?;
    Ok(chunked
        .into_iter()
        .map(|value| value.unwrap_or_default().to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::{TempDir, tempdir};

    const HEADER: &str = "improve_sample_id,improve_chem_id,auc_true,auc_pred";

    fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn rows(n: usize) -> String {
        let mut content = String::from(HEADER);
        for i in 0..n {
            content.push_str(&format!(
                "\nACH-{i:04},Drug_{i},{:.3},{:.3}",
                0.5 + i as f64 / 100.0,
                0.45 + i as f64 / 90.0
            ));
        }
        content
    }

    fn store_for(dir: &TempDir) -> PredictionStore {
        let input = InputConfig {
            predictions_dir: dir.path().to_path_buf(),
            ..InputConfig::default()
        };
        PredictionStore::new(&input)
    }

    #[test]
    fn file_names_follow_the_convention() {
        let run = parse_prediction_file_name("CCLE_gCSI_split_3_graphdrp.csv").unwrap();
        assert_eq!(run.source, "CCLE");
        assert_eq!(run.target, "gCSI");
        assert_eq!(run.split, 3);
        assert_eq!(run.model, "graphdrp");

        let run = parse_prediction_file_name("GDSCv1_GDSCv1_split_0_deep_ttc.CSV").unwrap();
        assert_eq!(run.model, "deep_ttc");

        for bad in [
            "CCLE_gCSI_split_x_graphdrp.csv",
            "CCLE_split_0_graphdrp.csv",
            "CCLE_gCSI_split_0_.csv",
            "CCLE_gCSI_split_0_graphdrp.tsv",
            "CCLE_gCSI_extra_split_0_m.csv",
            "_gCSI_split_0_m.csv",
        ] {
            assert!(parse_prediction_file_name(bad).is_none(), "{bad} should not parse");
        }
    }

    #[test]
    fn loads_columns_and_records() {
        let dir = tempdir().unwrap();
        let path = write_file(&dir, "CCLE_CCLE_split_0_lgbm.csv", &rows(4));
        let store = store_for(&dir);

        let run = parse_prediction_file_name("CCLE_CCLE_split_0_lgbm.csv").unwrap();
        let predictions = store.load_file(run.clone(), path).unwrap();
        assert_eq!(predictions.len(), 4);
        assert_eq!(predictions.sample_ids[2], "ACH-0002");
        assert!((predictions.observed[1] - 0.51).abs() < 1e-12);

        let first = predictions.records().next().unwrap();
        assert_eq!(first.run, &run);
        assert_eq!(first.sample_id, "ACH-0000");
        assert!((first.predicted - 0.45).abs() < 1e-12);
    }

    #[test]
    fn missing_prediction_column_is_a_schema_error() {
        let dir = tempdir().unwrap();
        let path = write_file(
            &dir,
            "CCLE_CCLE_split_0_lgbm.csv",
            "improve_sample_id,auc_true\nA,0.5\nB,0.6",
        );
        let run = parse_prediction_file_name("CCLE_CCLE_split_0_lgbm.csv").unwrap();
        match store_for(&dir).load_file(run, path) {
            Err(StoreError::ColumnNotFound { column, .. }) => assert_eq!(column, "auc_pred"),
            other => panic!("Expected ColumnNotFound, got {other:?}"),
        }
    }

    #[test]
    fn non_numeric_and_null_values_are_rejected() {
        let dir = tempdir().unwrap();
        let run = parse_prediction_file_name("CCLE_CCLE_split_0_lgbm.csv").unwrap();

        let path = write_file(
            &dir,
            "CCLE_CCLE_split_0_lgbm.csv",
            "improve_sample_id,auc_true,auc_pred\nA,0.5,high\nB,0.6,0.7",
        );
        match store_for(&dir).load_file(run.clone(), path) {
            Err(StoreError::ColumnWrongType { column, .. }) => assert_eq!(column, "auc_pred"),
            other => panic!("Expected ColumnWrongType, got {other:?}"),
        }

        let path = write_file(
            &dir,
            "CCLE_CCLE_split_0_lgbm.csv",
            "improve_sample_id,auc_true,auc_pred\nA,,0.4\nB,0.6,0.7",
        );
        match store_for(&dir).load_file(run, path) {
            Err(StoreError::MissingValues { column, .. }) => assert_eq!(column, "auc_true"),
            other => panic!("Expected MissingValues, got {other:?}"),
        }
    }

    #[test]
    fn header_only_file_is_rejected() {
        let dir = tempdir().unwrap();
        let path = write_file(&dir, "CCLE_CCLE_split_0_lgbm.csv", HEADER);
        let run = parse_prediction_file_name("CCLE_CCLE_split_0_lgbm.csv").unwrap();
        assert!(matches!(
            store_for(&dir).load_file(run, path),
            Err(StoreError::Empty { .. })
        ));
    }

    #[test]
    fn absent_combinations_are_recorded_not_dropped() {
        let dir = tempdir().unwrap();
        for split in 0..3 {
            write_file(&dir, &format!("A_B_split_{split}_modelx.csv"), &rows(5));
        }
        for split in 0..2 {
            write_file(&dir, &format!("A_B_split_{split}_modelz.csv"), &rows(5));
        }
        write_file(&dir, "README.csv", "not,a,prediction");

        let set = store_for(&dir).load(&GridConfig::default(), false).unwrap();
        assert_eq!(set.predictions.len(), 5);
        assert_eq!(set.grid.splits, vec![0, 1, 2]);
        assert_eq!(
            set.missing,
            vec![RunKey {
                source: "A".into(),
                target: "B".into(),
                split: 2,
                model: "modelz".into(),
            }]
        );

        match store_for(&dir).load(&GridConfig::default(), true) {
            Err(StoreError::MissingData { count, listing, .. }) => {
                assert_eq!(count, 1);
                assert!(listing.contains("split 2 (modelz)"), "{listing}");
            }
            other => panic!("Expected MissingData, got {other:?}"),
        }
    }

    #[test]
    fn declared_grid_extends_expectations_and_filters_extras() {
        let dir = tempdir().unwrap();
        write_file(&dir, "A_A_split_0_m.csv", &rows(3));
        write_file(&dir, "A_A_split_7_m.csv", &rows(3));
        let grid = GridConfig {
            splits: vec![0, 1],
            ..GridConfig::default()
        };

        let set = store_for(&dir).load(&grid, false).unwrap();
        assert_eq!(set.predictions.len(), 1);
        assert_eq!(set.predictions[0].run.split, 0);
        assert_eq!(set.missing.len(), 1);
        assert_eq!(set.missing[0].split, 1);
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            store_for(&dir).load(&GridConfig::default(), false),
            Err(StoreError::NoPredictions { .. })
        ));
    }
}
