use std::path::PathBuf;

use crate::artifact::{
    ArtifactError, ArtifactHandle, field, open_table, parse_field, read_records, record_error,
    write_table,
};
use crate::types::Value;

use super::significance::{PairwiseTestResult, SignificanceReport};

const HEADER: [&str; 12] = [
    "source",
    "target",
    "metric",
    "model_a",
    "model_b",
    "statistic",
    "p_value",
    "q_value",
    "significant",
    "mean_difference",
    "n_splits_used",
    "inconclusive",
];

/// `significance.csv`: one row per (source, target, metric, model pair).
#[derive(Debug, Clone)]
pub struct SignificanceFile {
    path: PathBuf,
}

impl SignificanceFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ArtifactHandle<SignificanceReport> for SignificanceFile {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn store(&self, report: &SignificanceReport) -> Result<(), ArtifactError> {
        write_table(&self.path, |writer| {
            writer.write_record(HEADER)?;
            for r in &report.results {
                writer.write_record([
                    r.source.as_str(),
                    r.target.as_str(),
                    r.metric.name(),
                    r.model_a.as_str(),
                    r.model_b.as_str(),
                    &r.statistic.to_field(),
                    &r.p_value.to_field(),
                    &r.q_value.to_field(),
                    &r.significant.to_string(),
                    &r.mean_difference.to_field(),
                    &r.n_splits_used.to_string(),
                    &r.inconclusive.to_string(),
                ])?;
            }
            Ok(())
        })
    }

    fn load(&self) -> Result<SignificanceReport, ArtifactError> {
        let path = self.path.as_path();
        let (mut reader, _) = open_table(path, &HEADER)?;
        let value = |record: &csv::StringRecord,
                     index: usize,
                     column: &str|
         -> Result<Value, ArtifactError> {
            Value::parse_field(field(path, record, index, column)?).map_err(|message| {
                record_error(path, record, format!("column '{column}': {message}"))
            })
        };

        let results = read_records(path, &mut reader)?
            .iter()
            .map(|record| {
                Ok(PairwiseTestResult {
                    source: field(path, record, 0, "source")?.to_string(),
                    target: field(path, record, 1, "target")?.to_string(),
                    metric: parse_field(path, record, 2, "metric")?,
                    model_a: field(path, record, 3, "model_a")?.to_string(),
                    model_b: field(path, record, 4, "model_b")?.to_string(),
                    statistic: value(record, 5, "statistic")?,
                    p_value: value(record, 6, "p_value")?,
                    q_value: value(record, 7, "q_value")?,
                    significant: parse_field(path, record, 8, "significant")?,
                    mean_difference: value(record, 9, "mean_difference")?,
                    n_splits_used: parse_field(path, record, 10, "n_splits_used")?,
                    inconclusive: parse_field(path, record, 11, "inconclusive")?,
                })
            })
            .collect::<Result<Vec<_>, ArtifactError>>()?;
        Ok(SignificanceReport { results })
    }
}
