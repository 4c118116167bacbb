// ========================================================================================
//
//                              Score Table Artifacts
//
// ========================================================================================
//
// ### Purpose ###
//
// On-disk handles for the score stage: `scores.csv`, one row per
// (source, target, split, model, metric), and `missing.csv`, the combinations
// for which no prediction file existed. Absent combinations are written with
// `value=NA` and `n_samples=0` so that reading the table back reproduces the
// complete grid.

use itertools::Itertools;
use std::path::{Path, PathBuf};

use crate::artifact::{
    ArtifactError, ArtifactHandle, field, open_table, parse_field, read_records, record_error,
    write_table,
};
use crate::types::{Grid, MetricKind, RunKey, Value};

use super::table::{ScoreEntry, ScoreTable};

const SCORE_HEADER: [&str; 7] = [
    "source",
    "target",
    "split",
    "model",
    "metric",
    "value",
    "n_samples",
];
const MISSING_HEADER: [&str; 4] = ["source", "target", "split", "model"];

#[derive(Debug, Clone)]
pub struct ScoreTableFile {
    path: PathBuf,
}

impl ScoreTableFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ArtifactHandle<ScoreTable> for ScoreTableFile {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn store(&self, table: &ScoreTable) -> Result<(), ArtifactError> {
        let rows = table.entries().sorted_by(|a, b| {
            (&a.run.source, &a.run.target, a.run.split, &a.run.model, a.metric).cmp(&(
                &b.run.source,
                &b.run.target,
                b.run.split,
                &b.run.model,
                b.metric,
            ))
        });
        write_table(&self.path, |writer| {
            writer.write_record(SCORE_HEADER)?;
            for entry in rows {
                writer.write_record([
                    entry.run.source.as_str(),
                    entry.run.target.as_str(),
                    &entry.run.split.to_string(),
                    entry.run.model.as_str(),
                    entry.metric.name(),
                    &entry.value.to_field(),
                    &entry.n_samples.to_string(),
                ])?;
            }
            Ok(())
        })
    }

    fn load(&self) -> Result<ScoreTable, ArtifactError> {
        let path = self.path.as_path();
        let (mut reader, _) = open_table(path, &SCORE_HEADER)?;
        let records = read_records(path, &mut reader)?;

        let mut runs = Vec::with_capacity(records.len());
        let mut metrics = Vec::new();
        let mut entries = Vec::new();
        for record in &records {
            let run = parse_run(path, record)?;
            let metric: MetricKind = parse_field(path, record, 4, "metric")?;
            let value = Value::parse_field(field(path, record, 5, "value")?)
                .map_err(|message| record_error(path, record, message))?;
            let n_samples: usize = parse_field(path, record, 6, "n_samples")?;
            if n_samples == 0 && value.is_defined() {
                return Err(record_error(
                    path,
                    record,
                    "a value is given for a combination with no samples",
                ));
            }

            runs.push(run.clone());
            metrics.push(metric);
            if n_samples > 0 {
                entries.push(ScoreEntry {
                    run,
                    metric,
                    value,
                    n_samples,
                });
            }
        }

        let grid = Grid::from_runs(&runs);
        ScoreTable::from_entries(grid, &metrics, entries).map_err(|e| ArtifactError::Parse {
            path: path.to_path_buf(),
            line: 0,
            message: e.to_string(),
        })
    }
}

/// The list of expected combinations that had no prediction file.
#[derive(Debug, Clone)]
pub struct MissingRunsFile {
    path: PathBuf,
}

impl MissingRunsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ArtifactHandle<Vec<RunKey>> for MissingRunsFile {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn store(&self, runs: &Vec<RunKey>) -> Result<(), ArtifactError> {
        write_table(&self.path, |writer| {
            writer.write_record(MISSING_HEADER)?;
            for run in runs {
                writer.write_record([
                    run.source.as_str(),
                    run.target.as_str(),
                    &run.split.to_string(),
                    run.model.as_str(),
                ])?;
            }
            Ok(())
        })
    }

    fn load(&self) -> Result<Vec<RunKey>, ArtifactError> {
        let path = self.path.as_path();
        let (mut reader, _) = open_table(path, &MISSING_HEADER)?;
        read_records(path, &mut reader)?
            .iter()
            .map(|record| parse_run(path, record))
            .collect()
    }
}

fn parse_run(path: &Path, record: &csv::StringRecord) -> Result<RunKey, ArtifactError> {
    Ok(RunKey {
        source: field(path, record, 0, "source")?.to_string(),
        target: field(path, record, 1, "target")?.to_string(),
        split: parse_field(path, record, 2, "split")?,
        model: field(path, record, 3, "model")?.to_string(),
    })
}
