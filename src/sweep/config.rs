//! Sweep settings.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::DEFAULT_GRANULARITY;
use crate::error::SweepError;
use crate::truth::AbsentFieldPolicy;

/// Whether an outer record may be linked to more than one inner record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkMultiplicity {
    /// Every pair is decided independently.
    #[default]
    Many,
    /// Only the closest viable candidate per outer record can be positive.
    Single,
}

/// Immutable configuration of one sweep run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Outer records per block.
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    /// Round-robin run partitions.
    #[serde(default = "default_runs")]
    pub runs: usize,
    /// Cap on outer records; `None` checks them all.
    #[serde(default)]
    pub records_to_check: Option<usize>,
    /// Permutation seed.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Number of thresholds in the grid.
    #[serde(default = "default_granularity")]
    pub granularity: usize,
    #[serde(default)]
    pub multiplicity: LinkMultiplicity,
    #[serde(default)]
    pub absent_field_policy: AbsentFieldPolicy,
    /// Dump distance histograms once the blocks since the last dump cover this
    /// many record pairs (unknown pairs included).
    #[serde(default)]
    pub dump_every_pairs: Option<u64>,
    /// Dump distance histograms once this many seconds have passed since the last dump.
    #[serde(default)]
    pub dump_interval_secs: Option<u64>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_file_stem")]
    pub file_stem: String,
}

fn default_block_size() -> usize {
    100
}
fn default_runs() -> usize {
    1
}
fn default_seed() -> u64 {
    87626
}
fn default_granularity() -> usize {
    DEFAULT_GRANULARITY
}
fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_file_stem() -> String {
    "sweep".into()
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            runs: default_runs(),
            records_to_check: None,
            seed: default_seed(),
            granularity: default_granularity(),
            multiplicity: LinkMultiplicity::default(),
            absent_field_policy: AbsentFieldPolicy::default(),
            dump_every_pairs: None,
            dump_interval_secs: None,
            output_dir: default_output_dir(),
            file_stem: default_file_stem(),
        }
    }
}

impl SweepConfig {
    pub fn validate(&self) -> Result<(), SweepError> {
        let invalid = |message: &str| {
            Err(SweepError::InvalidConfig {
                message: message.to_string(),
            })
        };
        if self.block_size == 0 {
            return invalid("block_size must be positive");
        }
        if self.runs == 0 {
            return invalid("runs must be positive");
        }
        if self.granularity < 2 {
            return invalid("granularity must be at least 2");
        }
        if self.dump_every_pairs == Some(0) {
            return invalid("dump_every_pairs must be positive when set");
        }
        if self.file_stem.trim().is_empty() {
            return invalid("file_stem must not be empty");
        }
        Ok(())
    }

    /// Whether histograms are dumped after every block.
    pub fn dumps_every_block(&self) -> bool {
        self.dump_every_pairs.is_none() && self.dump_interval_secs.is_none()
    }
}
