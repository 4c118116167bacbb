//! Typed handles through which pipeline stages hand artifacts to one another.
//!
//! Each stage reads its input through an [`ArtifactHandle`] and writes its output
//! through another one. On disk the handles are flat files; in tests the same
//! stages run against [`InMemoryArtifact`] without touching the filesystem.

use csv::StringRecord;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

use crate::files::write_atomically;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("{}: {source}", path.display())]
    InFile {
        path: PathBuf,
        #[source]
        source: Box<ArtifactError>,
    },
    #[error("{}, line {line}: {message}", path.display())]
    Parse {
        path: PathBuf,
        line: u64,
        message: String,
    },
    #[error("Artifact '{0}' was read before it was written")]
    Absent(String),
}

impl ArtifactError {
    /// Attaches the file an error happened in, unless it already names one.
    pub fn in_file(self, path: &Path) -> Self {
        match self {
            ArtifactError::InFile { .. } | ArtifactError::Parse { .. } => self,
            other => ArtifactError::InFile {
                path: path.to_path_buf(),
                source: Box::new(other),
            },
        }
    }
}

/// Opens a comma-separated artifact and checks that its header starts with `expected`.
///
/// Returns the reader positioned after the header, plus the full header. Rows
/// may differ in length; callers check the fields they need.
pub fn open_table(
    path: &Path,
    expected: &[&str],
) -> Result<(csv::Reader<File>, StringRecord), ArtifactError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| ArtifactError::from(e).in_file(path))?;
    let header = reader
        .headers()
        .map_err(|e| ArtifactError::from(e).in_file(path))?
        .clone();
    let matches = header.len() >= expected.len()
        && header.iter().zip(expected).all(|(found, want)| found == *want);
    if !matches {
        return Err(ArtifactError::Parse {
            path: path.to_path_buf(),
            line: 1,
            message: format!(
                "expected header starting with '{}', found '{}'",
                expected.join(","),
                header.iter().collect::<Vec<_>>().join(",")
            ),
        });
    }
    Ok((reader, header))
}

/// Reads every record after the header, attaching file context to failures.
pub fn read_records(
    path: &Path,
    reader: &mut csv::Reader<File>,
) -> Result<Vec<StringRecord>, ArtifactError> {
    reader
        .records()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ArtifactError::from(e).in_file(path))
}

/// A parse error located at `record`.
pub fn record_error(
    path: &Path,
    record: &StringRecord,
    message: impl Into<String>,
) -> ArtifactError {
    ArtifactError::Parse {
        path: path.to_path_buf(),
        line: record.position().map_or(0, |p| p.line()),
        message: message.into(),
    }
}

/// Field `index` of `record`, or a parse error naming the column.
pub fn field<'r>(
    path: &Path,
    record: &'r StringRecord,
    index: usize,
    column: &str,
) -> Result<&'r str, ArtifactError> {
    record
        .get(index)
        .ok_or_else(|| record_error(path, record, format!("missing column '{column}'")))
}

/// Parses field `index` of `record` as `T`.
pub fn parse_field<T>(
    path: &Path,
    record: &StringRecord,
    index: usize,
    column: &str,
) -> Result<T, ArtifactError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let text = field(path, record, index, column)?;
    text.trim()
        .parse()
        .map_err(|e| record_error(path, record, format!("column '{column}': {e}")))
}

/// Writes a comma-separated artifact atomically.
pub fn write_table<F>(path: &Path, write: F) -> Result<(), ArtifactError>
where
    F: FnOnce(&mut csv::Writer<&mut BufWriter<File>>) -> Result<(), ArtifactError>,
{
    write_atomically(path, |out: &mut BufWriter<File>| {
        let mut writer = csv::Writer::from_writer(out);
        write(&mut writer)?;
        writer.flush()?;
        Ok(())
    })
    .map_err(|e: ArtifactError| e.in_file(path))
}

/// Storage for one artifact produced by one stage and consumed by later ones.
pub trait ArtifactHandle<T> {
    /// Human-readable location used in log lines.
    fn describe(&self) -> String;

    fn store(&self, value: &T) -> Result<(), ArtifactError>;

    fn load(&self) -> Result<T, ArtifactError>;
}

/// An artifact kept in memory, for tests and for single-process runs.
#[derive(Debug)]
pub struct InMemoryArtifact<T> {
    label: String,
    slot: Mutex<Option<T>>,
}

impl<T> InMemoryArtifact<T> {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            slot: Mutex::new(None),
        }
    }

    pub fn holding(label: impl Into<String>, value: T) -> Self {
        Self {
            label: label.into(),
            slot: Mutex::new(Some(value)),
        }
    }

    pub fn is_written(&self) -> bool {
        self.slot.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }
}

impl<T: Clone> ArtifactHandle<T> for InMemoryArtifact<T> {
    fn describe(&self) -> String {
        format!("memory:{}", self.label)
    }

    fn store(&self, value: &T) -> Result<(), ArtifactError> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| io::Error::other(format!("artifact '{}' lock poisoned", self.label)))?;
        *slot = Some(value.clone());
        Ok(())
    }

    fn load(&self) -> Result<T, ArtifactError> {
        let slot = self
            .slot
            .lock()
            .map_err(|_| io::Error::other(format!("artifact '{}' lock poisoned", self.label)))?;
        slot.clone()
            .ok_or_else(|| ArtifactError::Absent(self.label.clone()))
    }
}
