//! Threshold-sweep evaluation.
//!
//! Every (non-unknown) record pair is scored by each metric and counted into a
//! confusion matrix at every threshold of a uniform grid over `[0, 1]`. Counts
//! are kept separately for `runs` round-robin partitions of the pair stream so
//! that run-to-run variation estimates sampling error.
//!
//! - [`ThresholdGrid`]: index/threshold conversions.
//! - [`Sample`]: one confusion matrix.
//! - [`MetricState`]: all counters owned by one metric's worker.
//! - [`engine::SweepEngine`]: the block driver and state machine.

pub mod barrier;
pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod output;
pub mod worker;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SweepError;

pub use barrier::BlockBarrier;
pub use checkpoint::{Checkpoint, RunFingerprint};
pub use config::{LinkMultiplicity, SweepConfig};
pub use engine::{ResumeSource, RunPhase, SweepEngine, SweepSummary};
pub use output::{OutputPaths, RunDescription};

/// Tolerance added before truncating a scaled distance to a grid index.
pub const EPSILON: f64 = 0.00001;

/// Default number of grid points: 0.00, 0.01, ..., 1.00.
pub const DEFAULT_GRANULARITY: usize = 101;

/// A uniform grid of `size` thresholds spanning `[0, 1]` inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdGrid {
    size: usize,
}

impl ThresholdGrid {
    pub fn new(size: usize) -> Result<Self, SweepError> {
        if size < 2 {
            return Err(SweepError::InvalidConfig {
                message: format!("granularity must be at least 2, got {size}"),
            });
        }
        Ok(Self { size })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn index_to_threshold(&self, index: usize) -> f64 {
        index as f64 / (self.size - 1) as f64
    }

    /// Bucket for a distance in `[0, 1]`; values outside are clamped.
    pub fn threshold_to_index(&self, distance: f64) -> usize {
        let scaled = distance.max(0.0) * (self.size - 1) as f64 + EPSILON;
        (scaled as usize).min(self.size - 1)
    }

    pub fn thresholds(&self) -> impl Iterator<Item = f64> + '_ {
        (0..self.size).map(|i| self.index_to_threshold(i))
    }
}

impl Default for ThresholdGrid {
    fn default() -> Self {
        Self {
            size: DEFAULT_GRANULARITY,
        }
    }
}

/// Confusion-matrix counts for one (run, metric, threshold).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub tp: u64,
    pub fp: u64,
    pub fn_: u64,
    pub tn: u64,
}

impl Sample {
    pub fn total(&self) -> u64 {
        self.tp + self.fp + self.fn_ + self.tn
    }

    fn record(&mut self, predicted_positive: bool, is_true_link: bool) {
        match (predicted_positive, is_true_link) {
            (true, true) => self.tp += 1,
            (true, false) => self.fp += 1,
            (false, true) => self.fn_ += 1,
            (false, false) => self.tn += 1,
        }
    }

    /// Turn a positive decision back into a negative one.
    fn retract(&mut self, is_true_link: bool) {
        if is_true_link {
            self.tp -= 1;
            self.fn_ += 1;
        } else {
            self.fp -= 1;
            self.tn += 1;
        }
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tp={} fp={} fn={} tn={}", self.tp, self.fp, self.fn_, self.tn)
    }
}

/// Every counter belonging to one metric.
///
/// Owned by exactly one worker while a block is evaluated; the driver reads it
/// only between blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricState {
    pub name: String,
    /// `samples[run][threshold_index]`
    pub samples: Vec<Vec<Sample>>,
    /// Distance histogram of true links, `[run][bucket]`.
    pub link_distances: Vec<Vec<u64>>,
    /// Distance histogram of non-links, `[run][bucket]`.
    pub non_link_distances: Vec<Vec<u64>>,
    pub pairs_evaluated: Vec<u64>,
    pub pairs_ignored: Vec<u64>,
    /// Run that receives the next pair.
    pub next_run: usize,
}

impl MetricState {
    pub fn new(name: impl Into<String>, runs: usize, grid: &ThresholdGrid) -> Self {
        Self {
            name: name.into(),
            samples: vec![vec![Sample::default(); grid.size()]; runs],
            link_distances: vec![vec![0; grid.size()]; runs],
            non_link_distances: vec![vec![0; grid.size()]; runs],
            pairs_evaluated: vec![0; runs],
            pairs_ignored: vec![0; runs],
            next_run: 0,
        }
    }

    pub fn runs(&self) -> usize {
        self.samples.len()
    }

    /// Claim the run for the next pair and advance the rotation.
    pub(crate) fn take_run(&mut self) -> usize {
        let run = self.next_run;
        self.next_run = (self.next_run + 1) % self.runs();
        run
    }

    /// Count one pair at every threshold: positive iff `distance <= threshold && viable`.
    pub(crate) fn record_decisions(
        &mut self,
        run: usize,
        grid: &ThresholdGrid,
        distance: f64,
        viable: bool,
        is_true_link: bool,
    ) {
        for (i, sample) in self.samples[run].iter_mut().enumerate() {
            let positive = viable && distance <= grid.index_to_threshold(i);
            sample.record(positive, is_true_link);
        }
    }

    /// Count one pair as negative at every threshold.
    pub(crate) fn record_negatives(&mut self, run: usize, is_true_link: bool) {
        for sample in &mut self.samples[run] {
            sample.record(false, is_true_link);
        }
    }

    /// Undo the positive decisions an earlier `record_decisions` made.
    pub(crate) fn retract_decisions(
        &mut self,
        run: usize,
        grid: &ThresholdGrid,
        distance: f64,
        is_true_link: bool,
    ) {
        for (i, sample) in self.samples[run].iter_mut().enumerate() {
            if distance <= grid.index_to_threshold(i) {
                sample.retract(is_true_link);
            }
        }
    }

    pub(crate) fn record_distance(
        &mut self,
        run: usize,
        grid: &ThresholdGrid,
        distance: f64,
        is_true_link: bool,
    ) {
        let bucket = grid.threshold_to_index(distance);
        if is_true_link {
            self.link_distances[run][bucket] += 1;
        } else {
            self.non_link_distances[run][bucket] += 1;
        }
    }

    /// Pairs classified (excluding unknown) across all runs.
    pub fn total_evaluated(&self) -> u64 {
        self.pairs_evaluated.iter().sum()
    }

    pub fn total_ignored(&self) -> u64 {
        self.pairs_ignored.iter().sum()
    }
}
