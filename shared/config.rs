//! # Run Configuration
//!
//! A single `EvalConfig` is resolved once at pipeline start and passed by
//! reference to every stage. Nothing downstream reads paths from ambient state:
//! every stage receives the `OutputLayout` computed here.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::types::{Grid, MetricKind};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read configuration file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Configuration file '{path}' is not valid TOML: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Directory holding `{source}_{target}_split_{id}_{model}.csv` files.
    pub predictions_dir: PathBuf,
    pub sample_id_column: String,
    pub true_column: String,
    pub pred_column: String,
    /// Field separator of the prediction files.
    pub separator: char,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            predictions_dir: PathBuf::from("predictions"),
            sample_id_column: "improve_sample_id".to_string(),
            true_column: "auc_true".to_string(),
            pred_column: "auc_pred".to_string(),
            separator: ',',
        }
    }
}

/// Optional declaration of the combination space. Any empty axis is inferred
/// from the files that were actually observed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub sources: Vec<String>,
    pub targets: Vec<String>,
    pub splits: Vec<u32>,
    pub models: Vec<String>,
}

impl GridConfig {
    /// Fills every undeclared axis from `observed`.
    pub fn resolve(&self, observed: &Grid) -> Grid {
        let pick = |declared: &Vec<String>, seen: &Vec<String>| {
            if declared.is_empty() {
                seen.clone()
            } else {
                declared.clone()
            }
        };
        let mut grid = Grid {
            sources: pick(&self.sources, &observed.sources),
            targets: pick(&self.targets, &observed.targets),
            splits: if self.splits.is_empty() {
                observed.splits.clone()
            } else {
                self.splits.clone()
            },
            models: pick(&self.models, &observed.models),
        };
        grid.normalize();
        grid
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub metrics: Vec<MetricKind>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            metrics: MetricKind::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignificanceConfig {
    /// Fewest matched, defined splits a paired comparison needs to be conclusive.
    pub min_splits: usize,
    /// False discovery rate used for the `significant` flag.
    pub fdr_alpha: f64,
}

impl Default for SignificanceConfig {
    fn default() -> Self {
        Self {
            min_splits: 3,
            fdr_alpha: 0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub root: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("results"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    pub input: InputConfig,
    pub grid: GridConfig,
    pub scoring: ScoringConfig,
    pub significance: SignificanceConfig,
    pub output: OutputConfig,
    /// Turn absent prediction files into a fatal error instead of undefined cells.
    pub strict_missing: bool,
}

impl EvalConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: EvalConfig = toml::from_str(&text).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scoring.metrics.is_empty() {
            return Err(ConfigError::Invalid(
                "scoring.metrics must name at least one metric".to_string(),
            ));
        }
        if self.significance.min_splits == 0 {
            return Err(ConfigError::Invalid(
                "significance.min_splits must be at least 1".to_string(),
            ));
        }
        if !(self.significance.fdr_alpha > 0.0 && self.significance.fdr_alpha < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "significance.fdr_alpha must lie in (0, 1), got {}",
                self.significance.fdr_alpha
            )));
        }
        if !self.input.separator.is_ascii() {
            return Err(ConfigError::Invalid(format!(
                "input.separator must be a single ASCII character, got '{}'",
                self.input.separator
            )));
        }
        Ok(())
    }

    pub fn layout(&self) -> OutputLayout {
        OutputLayout::under(&self.output.root)
    }
}

/// Where each stage reads and writes its artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    pub root: PathBuf,
    pub scores_file: PathBuf,
    pub missing_file: PathBuf,
    pub matrices_dir: PathBuf,
    pub normalized_dir: PathBuf,
    pub significance_file: PathBuf,
    pub coverage_file: PathBuf,
}

impl OutputLayout {
    pub fn under(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            scores_file: root.join("scores.csv"),
            missing_file: root.join("missing.csv"),
            matrices_dir: root.join("matrices"),
            normalized_dir: root.join("normalized"),
            significance_file: root.join("significance.csv"),
            coverage_file: root.join("coverage_correlation.csv"),
        }
    }
}
