// ========================================================================================
//
//                              Matrix Artifacts
//
// ========================================================================================
//
// ### Purpose ###
//
// Directory-backed handles for the matrix and normalization stages.
//
// - `matrices/G_{model}_{metric}.csv`: header `layer,source,{targets...}`, a
//   block of `mean` rows followed by a block of `std` rows.
// - `normalized/Gn_{model}_{metric}.csv`: header `source,{targets...}`.
// - `normalized/aggregates.csv`: `model,metric,source,ga,gna`.
// - `normalized/summary.csv`: `model,metric,mean_diagonal,mean_ga,mean_gna,n_sources`.
//
// Undefined cells are written as `NA`. Storing a set first removes the files a
// previous run left for (model, metric) pairs that no longer exist.

use csv::StringRecord;
use log::debug;
use ndarray::{Array2, ArrayView1};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::artifact::{
    ArtifactError, ArtifactHandle, field, open_table, parse_field, read_records, record_error,
    write_table,
};
use crate::files::list_files_with_extension;
use crate::types::{MetricKind, Value};

use super::{
    GMatrix, Generalization, MatrixSet, ModelSummary, NormalizedMatrix, NormalizedSet,
    Normalization,
};

const MATRIX_PREFIX: &str = "G_";
const NORMALIZED_PREFIX: &str = "Gn_";
const AGGREGATES_FILE: &str = "aggregates.csv";
const SUMMARY_FILE: &str = "summary.csv";
const AGGREGATES_HEADER: [&str; 5] = ["model", "metric", "source", "ga", "gna"];
const SUMMARY_HEADER: [&str; 6] = [
    "model",
    "metric",
    "mean_diagonal",
    "mean_ga",
    "mean_gna",
    "n_sources",
];

fn matrix_file_name(prefix: &str, model: &str, metric: MetricKind) -> String {
    format!("{prefix}{model}_{metric}.csv")
}

/// Splits `{prefix}{model}_{metric}.csv` into its model and metric.
fn parse_matrix_file_name(prefix: &str, file_name: &str) -> Option<(String, MetricKind)> {
    let stem = file_name.strip_prefix(prefix)?.strip_suffix(".csv")?;
    let (model, metric) = stem.rsplit_once('_')?;
    if model.is_empty() {
        return None;
    }
    Some((model.to_string(), metric.parse().ok()?))
}

/// The `{prefix}*.csv` files in `dir` with their parsed (model, metric).
fn matrix_files(
    dir: &Path,
    prefix: &str,
) -> Result<Vec<(PathBuf, String, MetricKind)>, ArtifactError> {
    let files =
        list_files_with_extension(dir, "csv").map_err(|e| ArtifactError::from(e).in_file(dir))?;
    Ok(files
        .into_iter()
        .filter_map(|path| {
            let name = path.file_name()?.to_string_lossy().into_owned();
            let (model, metric) = parse_matrix_file_name(prefix, &name)?;
            Some((path, model, metric))
        })
        .collect())
}

fn remove_stale(dir: &Path, prefix: &str) -> Result<(), ArtifactError> {
    if !dir.is_dir() {
        return Ok(());
    }
    for (path, _, _) in matrix_files(dir, prefix)? {
        debug!("Removing stale '{}'", path.display());
        fs::remove_file(&path).map_err(|e| ArtifactError::from(e).in_file(&path))?;
    }
    Ok(())
}

fn by_model_then_metric(a: (&str, MetricKind), b: (&str, MetricKind)) -> std::cmp::Ordering {
    natord::compare(a.0, b.0).then(a.1.cmp(&b.1))
}

fn parse_value(path: &Path, record: &StringRecord, index: usize) -> Result<Value, ArtifactError> {
    let text = field(path, record, index, "value")?;
    Value::parse_field(text).map_err(|message| record_error(path, record, message))
}

fn parse_row(
    path: &Path,
    record: &StringRecord,
    first_value: usize,
    width: usize,
) -> Result<Vec<Value>, ArtifactError> {
    if record.len() != first_value + width {
        return Err(record_error(
            path,
            record,
            format!("expected {} fields, found {}", first_value + width, record.len()),
        ));
    }
    (first_value..record.len())
        .map(|index| parse_value(path, record, index))
        .collect()
}

fn to_array(
    path: &Path,
    rows: usize,
    cols: usize,
    cells: Vec<Value>,
) -> Result<Array2<Value>, ArtifactError> {
    Array2::from_shape_vec((rows, cols), cells).map_err(|e| ArtifactError::Parse {
        path: path.to_path_buf(),
        line: 0,
        message: e.to_string(),
    })
}

fn value_row(label: &str, source: &str, row: ArrayView1<'_, Value>) -> Vec<String> {
    let mut fields = Vec::with_capacity(row.len() + 2);
    if !label.is_empty() {
        fields.push(label.to_string());
    }
    fields.push(source.to_string());
    fields.extend(row.iter().map(|v| v.to_field()));
    fields
}

pub fn write_matrix(path: &Path, g: &GMatrix) -> Result<(), ArtifactError> {
    write_table(path, |writer| {
        let mut header = vec!["layer".to_string(), "source".to_string()];
        header.extend(g.targets.iter().cloned());
        writer.write_record(&header)?;
        for (layer, values) in [("mean", &g.mean), ("std", &g.std)] {
            for (source, row) in g.sources.iter().zip(values.rows()) {
                writer.write_record(value_row(layer, source, row))?;
            }
        }
        Ok(())
    })
}

pub fn read_matrix(path: &Path, model: &str, metric: MetricKind) -> Result<GMatrix, ArtifactError> {
    let (mut reader, header) = open_table(path, &["layer", "source"])?;
    let targets: Vec<String> = header.iter().skip(2).map(str::to_string).collect();

    let mut layers: BTreeMap<&str, (Vec<String>, Vec<Value>)> = BTreeMap::new();
    let records = read_records(path, &mut reader)?;
    for record in &records {
        let layer = match field(path, record, 0, "layer")? {
            "mean" => "mean",
            "std" => "std",
            other => return Err(record_error(path, record, format!("unknown layer '{other}'"))),
        };
        let source = field(path, record, 1, "source")?.to_string();
        let row = parse_row(path, record, 2, targets.len())?;
        let (sources, cells) = layers.entry(layer).or_default();
        sources.push(source);
        cells.extend(row);
    }

    let (sources, mean_cells) = layers.remove("mean").unwrap_or_default();
    let (std_sources, std_cells) = layers.remove("std").unwrap_or_default();
    if std_sources != sources {
        return Err(ArtifactError::Parse {
            path: path.to_path_buf(),
            line: 0,
            message: "the std block does not list the same sources as the mean block".to_string(),
        });
    }

    Ok(GMatrix {
        model: model.to_string(),
        metric,
        mean: to_array(path, sources.len(), targets.len(), mean_cells)?,
        std: to_array(path, sources.len(), targets.len(), std_cells)?,
        sources,
        targets,
    })
}

/// The directory of G matrices.
#[derive(Debug, Clone)]
pub struct MatrixDir {
    dir: PathBuf,
}

impl MatrixDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, model: &str, metric: MetricKind) -> PathBuf {
        self.dir.join(matrix_file_name(MATRIX_PREFIX, model, metric))
    }
}

impl ArtifactHandle<MatrixSet> for MatrixDir {
    fn describe(&self) -> String {
        self.dir.display().to_string()
    }

    fn store(&self, set: &MatrixSet) -> Result<(), ArtifactError> {
        remove_stale(&self.dir, MATRIX_PREFIX)?;
        for g in &set.matrices {
            write_matrix(&self.path_for(&g.model, g.metric), g)?;
        }
        Ok(())
    }

    fn load(&self) -> Result<MatrixSet, ArtifactError> {
        let mut matrices = matrix_files(&self.dir, MATRIX_PREFIX)?
            .into_iter()
            .map(|(path, model, metric)| read_matrix(&path, &model, metric))
            .collect::<Result<Vec<_>, _>>()?;
        matrices.sort_by(|a, b| by_model_then_metric((&a.model, a.metric), (&b.model, b.metric)));
        Ok(MatrixSet { matrices })
    }
}

fn write_normalized(path: &Path, gn: &NormalizedMatrix) -> Result<(), ArtifactError> {
    write_table(path, |writer| {
        let mut header = vec!["source".to_string()];
        header.extend(gn.targets.iter().cloned());
        writer.write_record(&header)?;
        for (source, row) in gn.sources.iter().zip(gn.values.rows()) {
            writer.write_record(value_row("", source, row))?;
        }
        Ok(())
    })
}

fn read_normalized(
    path: &Path,
    model: &str,
    metric: MetricKind,
) -> Result<NormalizedMatrix, ArtifactError> {
    let (mut reader, header) = open_table(path, &["source"])?;
    let targets: Vec<String> = header.iter().skip(1).map(str::to_string).collect();
    let mut sources = Vec::new();
    let mut cells = Vec::new();
    for record in &read_records(path, &mut reader)? {
        sources.push(field(path, record, 0, "source")?.to_string());
        cells.extend(parse_row(path, record, 1, targets.len())?);
    }
    Ok(NormalizedMatrix {
        model: model.to_string(),
        metric,
        values: to_array(path, sources.len(), targets.len(), cells)?,
        sources,
        targets,
    })
}

/// The directory of normalized matrices, per-source aggregates, and model summaries.
#[derive(Debug, Clone)]
pub struct NormalizedDir {
    dir: PathBuf,
}

impl NormalizedDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn aggregates_path(&self) -> PathBuf {
        self.dir.join(AGGREGATES_FILE)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.dir.join(SUMMARY_FILE)
    }

    fn read_aggregates(
        &self,
    ) -> Result<BTreeMap<(String, MetricKind), Vec<Generalization>>, ArtifactError> {
        let path = self.aggregates_path();
        let (mut reader, _) = open_table(&path, &AGGREGATES_HEADER)?;
        let mut groups: BTreeMap<(String, MetricKind), Vec<Generalization>> = BTreeMap::new();
        for record in &read_records(&path, &mut reader)? {
            let model = field(&path, record, 0, "model")?.to_string();
            let metric: MetricKind = parse_field(&path, record, 1, "metric")?;
            groups.entry((model, metric)).or_default().push(Generalization {
                source: field(&path, record, 2, "source")?.to_string(),
                ga: parse_value(&path, record, 3)?,
                gna: parse_value(&path, record, 4)?,
            });
        }
        Ok(groups)
    }

    fn read_summaries(&self) -> Result<Vec<ModelSummary>, ArtifactError> {
        let path = self.summary_path();
        let (mut reader, _) = open_table(&path, &SUMMARY_HEADER)?;
        read_records(&path, &mut reader)?
            .iter()
            .map(|record| {
                Ok(ModelSummary {
                    model: field(&path, record, 0, "model")?.to_string(),
                    metric: parse_field(&path, record, 1, "metric")?,
                    mean_diagonal: parse_value(&path, record, 2)?,
                    mean_ga: parse_value(&path, record, 3)?,
                    mean_gna: parse_value(&path, record, 4)?,
                    n_sources: parse_field(&path, record, 5, "n_sources")?,
                })
            })
            .collect()
    }
}

impl ArtifactHandle<NormalizedSet> for NormalizedDir {
    fn describe(&self) -> String {
        self.dir.display().to_string()
    }

    fn store(&self, set: &NormalizedSet) -> Result<(), ArtifactError> {
        remove_stale(&self.dir, NORMALIZED_PREFIX)?;
        for normalization in &set.normalizations {
            let gn = &normalization.gn;
            let path = self.dir.join(matrix_file_name(NORMALIZED_PREFIX, &gn.model, gn.metric));
            write_normalized(&path, gn)?;
        }

        write_table(&self.aggregates_path(), |writer| {
            writer.write_record(AGGREGATES_HEADER)?;
            for normalization in &set.normalizations {
                for aggregate in &normalization.aggregates {
                    writer.write_record([
                        normalization.gn.model.as_str(),
                        normalization.gn.metric.name(),
                        aggregate.source.as_str(),
                        &aggregate.ga.to_field(),
                        &aggregate.gna.to_field(),
                    ])?;
                }
            }
            Ok(())
        })?;

        write_table(&self.summary_path(), |writer| {
            writer.write_record(SUMMARY_HEADER)?;
            for s in &set.summaries {
                writer.write_record([
                    s.model.as_str(),
                    s.metric.name(),
                    &s.mean_diagonal.to_field(),
                    &s.mean_ga.to_field(),
                    &s.mean_gna.to_field(),
                    &s.n_sources.to_string(),
                ])?;
            }
            Ok(())
        })
    }

    fn load(&self) -> Result<NormalizedSet, ArtifactError> {
        let mut aggregates = self.read_aggregates()?;
        let mut normalizations = Vec::new();
        for (path, model, metric) in matrix_files(&self.dir, NORMALIZED_PREFIX)? {
            let gn = read_normalized(&path, &model, metric)?;
            let rows = aggregates.remove(&(model, metric)).unwrap_or_default();
            normalizations.push(Normalization { gn, aggregates: rows });
        }
        if let Some(((model, metric), _)) = aggregates.into_iter().next() {
            return Err(ArtifactError::Parse {
                path: self.aggregates_path(),
                line: 0,
                message: format!("aggregates for {model} {metric} have no normalized matrix"),
            });
        }
        normalizations.sort_by(|a, b| {
            by_model_then_metric((&a.gn.model, a.gn.metric), (&b.gn.model, b.gn.metric))
        });

        let mut summaries = self.read_summaries()?;
        summaries.sort_by(|a, b| by_model_then_metric((&a.model, a.metric), (&b.model, b.metric)));
        Ok(NormalizedSet {
            normalizations,
            summaries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::build_all;
    use crate::score::{ScoreEntry, ScoreTable};
    use crate::types::{Grid, RunKey};
    use tempfile::tempdir;

    fn matrices() -> MatrixSet {
        let grid = Grid {
            sources: vec!["CCLE".into(), "GDSCv2".into()],
            targets: vec!["CCLE".into(), "GDSCv2".into()],
            splits: vec![0, 1, 2],
            models: vec!["deep_ttc".into(), "lgbm".into()],
        };
        let mut entries = Vec::new();
        for (m, model) in grid.models.iter().enumerate() {
            for source in &grid.sources {
                for target in &grid.targets {
                    for &split in &grid.splits {
                        if source == "GDSCv2" && target == "CCLE" {
                            continue;
                        }
                        entries.push(ScoreEntry {
                            run: RunKey {
                                source: source.clone(),
                                target: target.clone(),
                                split,
                                model: model.clone(),
                            },
                            metric: MetricKind::Scc,
                            value: Value::Defined(0.1 * (split + 1) as f64 / 3.0 + m as f64 * 0.01),
                            n_samples: 30,
                        });
                    }
                }
            }
        }
        let table = ScoreTable::from_entries(grid, &[MetricKind::Scc], entries).unwrap();
        build_all(&table)
    }

    #[test]
    fn file_names_carry_model_and_metric() {
        assert_eq!(matrix_file_name("G_", "deep_ttc", MetricKind::R2), "G_deep_ttc_r2.csv");
        assert_eq!(
            parse_matrix_file_name("G_", "G_deep_ttc_r2.csv"),
            Some(("deep_ttc".to_string(), MetricKind::R2))
        );
        assert_eq!(parse_matrix_file_name("G_", "Gn_deep_ttc_r2.csv"), None);
        assert_eq!(parse_matrix_file_name("G_", "G_lgbm_auc.csv"), None);
    }

    #[test]
    fn matrices_survive_a_write_and_read() {
        let dir = tempdir().unwrap();
        let handle = MatrixDir::new(dir.path().join("matrices"));
        let set = matrices();
        handle.store(&set).unwrap();

        let text = fs::read_to_string(handle.path_for("lgbm", MetricKind::Scc)).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("layer,source,CCLE,GDSCv2"));
        assert!(text.contains("mean,GDSCv2,NA,"));

        let loaded = handle.load().unwrap();
        assert_eq!(loaded.matrices.len(), 2);
        for (before, after) in set.matrices.iter().zip(&loaded.matrices) {
            assert_eq!(before.model, after.model);
            assert_eq!(before.sources, after.sources);
            let before_cells = before.mean.iter().chain(before.std.iter());
            let after_cells = after.mean.iter().chain(after.std.iter());
            for (x, y) in before_cells.zip(after_cells) {
                match (x.get(), y.get()) {
                    (Some(a), Some(b)) => assert!((a - b).abs() < 1e-9),
                    (None, None) => {}
                    other => panic!("definedness changed: {other:?}"),
                }
            }
        }
    }

    #[test]
    fn storing_a_smaller_set_removes_stale_matrices() {
        let dir = tempdir().unwrap();
        let handle = MatrixDir::new(dir.path());
        let mut set = matrices();
        handle.store(&set).unwrap();
        set.matrices.truncate(1);
        handle.store(&set).unwrap();
        assert_eq!(handle.load().unwrap(), set);
    }

    #[test]
    fn normalized_set_survives_a_write_and_read() {
        let dir = tempdir().unwrap();
        let handle = NormalizedDir::new(dir.path().join("normalized"));
        let set = NormalizedSet::from_matrices(&matrices());
        handle.store(&set).unwrap();
        assert!(handle.aggregates_path().exists());
        assert!(handle.summary_path().exists());
        assert_eq!(handle.load().unwrap(), set);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("G_m_r2.csv");
        fs::write(&path, "layer,source,A,B\nmean,A,0.5\n").unwrap();
        assert!(matches!(
            read_matrix(&path, "m", MetricKind::R2),
            Err(ArtifactError::Parse { line: 2, .. })
        ));
    }
}
