//! The score table: every metric for every (source, target, split, model) of a
//! grid, with absent combinations kept as explicit undefined entries.
//!
//! Both the matrix builder and the significance tester read per-split values
//! from the same [`ScoreTable`], so split alignment is identical for the two.

use ahash::AHashSet;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::types::{Grid, MetricKind, RunKey, SeriesKey, Value, mean_defined, std_defined};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScoreTableError {
    #[error("{metric} was scored twice for {run}")]
    Duplicate { run: RunKey, metric: MetricKind },
    #[error("A score for {run} ({metric}) lies outside the table's grid")]
    OutsideGrid { run: RunKey, metric: MetricKind },
}

/// One metric value for one prediction file.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreEntry {
    pub run: RunKey,
    pub metric: MetricKind,
    pub value: Value,
    /// Rows the value was computed from; zero marks a combination with no file.
    pub n_samples: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitScore {
    pub split: u32,
    pub value: Value,
    pub n_samples: usize,
}

impl SplitScore {
    pub fn is_missing(&self) -> bool {
        self.n_samples == 0
    }
}

/// Per-split scores of one (model, metric, source, target), ordered by split.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitSeries {
    scores: Vec<SplitScore>,
}

impl SplitSeries {
    pub fn new(mut scores: Vec<SplitScore>) -> Self {
        scores.sort_by_key(|s| s.split);
        Self { scores }
    }

    pub fn scores(&self) -> &[SplitScore] {
        &self.scores
    }

    /// Mean of the defined per-split values.
    pub fn average(&self) -> Value {
        mean_defined(self.scores.iter().map(|s| s.value))
    }

    /// Population standard deviation of the defined per-split values.
    pub fn std(&self) -> Value {
        std_defined(self.scores.iter().map(|s| s.value))
    }

    pub fn value_at(&self, split: u32) -> Value {
        self.scores
            .binary_search_by_key(&split, |s| s.split)
            .map(|idx| self.scores[idx].value)
            .unwrap_or(Value::Undefined)
    }

    /// `(split, value)` for every split with a defined value.
    pub fn defined(&self) -> impl Iterator<Item = (u32, f64)> + '_ {
        self.scores
            .iter()
            .filter_map(|s| s.value.get().map(|v| (s.split, v)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreTable {
    pub grid: Grid,
    /// Scored metrics, sorted and without duplicates.
    pub metrics: Vec<MetricKind>,
    series: BTreeMap<SeriesKey, SplitSeries>,
}

impl ScoreTable {
    /// Arranges `entries` into series covering the full grid. Any grid
    /// combination without an entry becomes an undefined score with zero samples.
    pub fn from_entries(
        mut grid: Grid,
        metrics: &[MetricKind],
        entries: impl IntoIterator<Item = ScoreEntry>,
    ) -> Result<Self, ScoreTableError> {
        grid.normalize();
        let mut metrics = metrics.to_vec();
        metrics.sort_unstable();
        metrics.dedup();

        let mut slots: BTreeMap<SeriesKey, BTreeMap<u32, SplitScore>> = BTreeMap::new();
        for model in &grid.models {
            for &metric in &metrics {
                for source in &grid.sources {
                    for target in &grid.targets {
                        let key = SeriesKey {
                            model: model.clone(),
                            metric,
                            source: source.clone(),
                            target: target.clone(),
                        };
                        let splits = grid
                            .splits
                            .iter()
                            .map(|&split| {
                                (
                                    split,
                                    SplitScore {
                                        split,
                                        value: Value::Undefined,
                                        n_samples: 0,
                                    },
                                )
                            })
                            .collect();
                        slots.insert(key, splits);
                    }
                }
            }
        }

        for entry in entries {
            let key = SeriesKey {
                model: entry.run.model.clone(),
                metric: entry.metric,
                source: entry.run.source.clone(),
                target: entry.run.target.clone(),
            };
            let slot = slots
                .get_mut(&key)
                .and_then(|splits| splits.get_mut(&entry.run.split));
            let Some(slot) = slot else {
                return Err(ScoreTableError::OutsideGrid {
                    run: entry.run,
                    metric: entry.metric,
                });
            };
            if !slot.is_missing() {
                return Err(ScoreTableError::Duplicate {
                    run: entry.run,
                    metric: entry.metric,
                });
            }
            slot.value = entry.value;
            slot.n_samples = entry.n_samples;
        }

        let series = slots
            .into_iter()
            .map(|(key, splits)| (key, SplitSeries::new(splits.into_values().collect())))
            .collect();
        Ok(Self {
            grid,
            metrics,
            series,
        })
    }

    pub fn get(
        &self,
        model: &str,
        metric: MetricKind,
        source: &str,
        target: &str,
    ) -> Option<&SplitSeries> {
        self.series.get(&SeriesKey {
            model: model.to_string(),
            metric,
            source: source.to_string(),
            target: target.to_string(),
        })
    }

    pub fn series(&self) -> impl Iterator<Item = (&SeriesKey, &SplitSeries)> + '_ {
        self.series.iter()
    }

    /// Every per-split score as an entry, missing combinations included.
    pub fn entries(&self) -> impl Iterator<Item = ScoreEntry> + '_ {
        self.series.iter().flat_map(|(key, series)| {
            series.scores().iter().map(move |score| ScoreEntry {
                run: RunKey {
                    source: key.source.clone(),
                    target: key.target.clone(),
                    split: score.split,
                    model: key.model.clone(),
                },
                metric: key.metric,
                value: score.value,
                n_samples: score.n_samples,
            })
        })
    }

    /// Grid combinations for which no metric was scored.
    pub fn missing_runs(&self) -> Vec<RunKey> {
        let scored: AHashSet<RunKey> = self
            .entries()
            .filter(|entry| entry.n_samples > 0)
            .map(|entry| entry.run)
            .collect();
        let mut runs: Vec<RunKey> = self
            .grid
            .expected_runs()
            .into_iter()
            .filter(|run| !scored.contains(run))
            .collect();
        runs.sort();
        runs
    }

    /// Number of defined per-split values in the table.
    pub fn defined_count(&self) -> usize {
        self.series
            .values()
            .map(|series| series.defined().count())
            .sum()
    }
}
