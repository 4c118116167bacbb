//! # Pipeline
//!
//! Each stage reads the complete artifact of the stage before it through an
//! [`ArtifactHandle`], computes, and stores one new artifact. Stages never share
//! mutable state and never read paths on their own: every location comes from
//! the handles they are given.
//!
//! ```text
//! predictions -> scores -> matrices -> normalized -> coverage
//!                   \-> significance
//! ```

use log::info;
use std::time::Instant;
use thiserror::Error;

use crate::artifact::{ArtifactError, ArtifactHandle};
use crate::config::{ConfigError, EvalConfig, OutputLayout, SignificanceConfig};
use crate::coverage::{CoverageCorrelation, CoverageFile, OverlapRecord, correlate};
use crate::matrix::io::{MatrixDir, NormalizedDir};
use crate::matrix::{MatrixSet, NormalizedSet, build_all};
use crate::score::io::{MissingRunsFile, ScoreTableFile};
use crate::score::{ScoreComputer, ScoreError, ScoreTable};
use crate::stats::io::SignificanceFile;
use crate::stats::{SignificanceReport, SignificanceTester};
use crate::store::{PredictionStore, StoreError};
use crate::types::RunKey;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Score(#[from] ScoreError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// The handles one run reads and writes.
#[derive(Clone, Copy)]
pub struct Artifacts<'a> {
    pub scores: &'a dyn ArtifactHandle<ScoreTable>,
    pub missing: &'a dyn ArtifactHandle<Vec<RunKey>>,
    pub matrices: &'a dyn ArtifactHandle<MatrixSet>,
    pub normalized: &'a dyn ArtifactHandle<NormalizedSet>,
    pub significance: &'a dyn ArtifactHandle<SignificanceReport>,
    pub coverage: &'a dyn ArtifactHandle<Vec<CoverageCorrelation>>,
}

/// File-backed handles laid out under one output root.
#[derive(Debug, Clone)]
pub struct FileArtifacts {
    scores: ScoreTableFile,
    missing: MissingRunsFile,
    matrices: MatrixDir,
    normalized: NormalizedDir,
    significance: SignificanceFile,
    coverage: CoverageFile,
}

impl FileArtifacts {
    pub fn new(layout: &OutputLayout) -> Self {
        Self {
            scores: ScoreTableFile::new(&layout.scores_file),
            missing: MissingRunsFile::new(&layout.missing_file),
            matrices: MatrixDir::new(&layout.matrices_dir),
            normalized: NormalizedDir::new(&layout.normalized_dir),
            significance: SignificanceFile::new(&layout.significance_file),
            coverage: CoverageFile::new(&layout.coverage_file),
        }
    }

    pub fn handles(&self) -> Artifacts<'_> {
        Artifacts {
            scores: &self.scores,
            missing: &self.missing,
            matrices: &self.matrices,
            normalized: &self.normalized,
            significance: &self.significance,
            coverage: &self.coverage,
        }
    }
}

/// Loads and scores every prediction file; stores the score table and the
/// list of combinations that had no file.
pub fn score_stage(
    config: &EvalConfig,
    store: &PredictionStore,
    scores: &dyn ArtifactHandle<ScoreTable>,
    missing: &dyn ArtifactHandle<Vec<RunKey>>,
) -> Result<ScoreTable, PipelineError> {
    let started = Instant::now();
    let set = store.load(&config.grid, config.strict_missing)?;
    let table = ScoreComputer::new(&config.scoring.metrics).score_set(&set)?;
    scores.store(&table)?;
    missing.store(&set.missing)?;
    info!(
        "Scores written to {} in {:.2?} ({} missing combinations listed in {})",
        scores.describe(),
        started.elapsed(),
        set.missing.len(),
        missing.describe()
    );
    Ok(table)
}

pub fn matrix_stage(
    scores: &dyn ArtifactHandle<ScoreTable>,
    matrices: &dyn ArtifactHandle<MatrixSet>,
) -> Result<MatrixSet, PipelineError> {
    let table = scores.load()?;
    let set = build_all(&table);
    matrices.store(&set)?;
    info!("Matrices written to {}", matrices.describe());
    Ok(set)
}

pub fn normalize_stage(
    matrices: &dyn ArtifactHandle<MatrixSet>,
    normalized: &dyn ArtifactHandle<NormalizedSet>,
) -> Result<NormalizedSet, PipelineError> {
    let set = NormalizedSet::from_matrices(&matrices.load()?);
    normalized.store(&set)?;
    info!("Normalized matrices and aggregates written to {}", normalized.describe());
    Ok(set)
}

pub fn significance_stage(
    config: &SignificanceConfig,
    scores: &dyn ArtifactHandle<ScoreTable>,
    output: &dyn ArtifactHandle<SignificanceReport>,
) -> Result<SignificanceReport, PipelineError> {
    let table = scores.load()?;
    let report = SignificanceTester::new(config).run(&table);
    output.store(&report)?;
    info!(
        "{} comparisons ({} significant at q <= {}) written to {}",
        report.results.len(),
        report.results.iter().filter(|r| r.significant).count(),
        config.fdr_alpha,
        output.describe()
    );
    Ok(report)
}

pub fn coverage_stage(
    matrices: &dyn ArtifactHandle<MatrixSet>,
    normalized: &dyn ArtifactHandle<NormalizedSet>,
    overlaps: &dyn ArtifactHandle<Vec<OverlapRecord>>,
    output: &dyn ArtifactHandle<Vec<CoverageCorrelation>>,
) -> Result<Vec<CoverageCorrelation>, PipelineError> {
    let records = overlaps.load()?;
    info!("Read {} overlap records from {}", records.len(), overlaps.describe());
    let results = correlate(&matrices.load()?, &normalized.load()?, &records);
    output.store(&results)?;
    info!("Coverage correlations written to {}", output.describe());
    Ok(results)
}

/// Runs every stage in order. Coverage runs only when overlap counts are given.
pub fn run_all(
    config: &EvalConfig,
    store: &PredictionStore,
    artifacts: Artifacts<'_>,
    overlaps: Option<&dyn ArtifactHandle<Vec<OverlapRecord>>>,
) -> Result<(), PipelineError> {
    config.validate()?;
    let started = Instant::now();
    score_stage(config, store, artifacts.scores, artifacts.missing)?;
    matrix_stage(artifacts.scores, artifacts.matrices)?;
    normalize_stage(artifacts.matrices, artifacts.normalized)?;
    significance_stage(&config.significance, artifacts.scores, artifacts.significance)?;
    match overlaps {
        Some(overlaps) => {
            coverage_stage(artifacts.matrices, artifacts.normalized, overlaps, artifacts.coverage)?;
        }
        None => info!("No overlap counts given; skipping coverage correlation"),
    }
    info!("Pipeline finished in {:.2?}", started.elapsed());
    Ok(())
}
