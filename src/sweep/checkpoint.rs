//! Compact, versioned sweep checkpoints.
//!
//! Written after every completed block with bincode, via a temporary file that
//! is renamed over the previous checkpoint, so a crash leaves either the old or
//! the new checkpoint on disk and never a torn one.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{LinkMultiplicity, MetricState};
use crate::error::SweepError;

/// Bumped whenever the encoded layout changes.
pub const CHECKPOINT_VERSION: u32 = 2;

/// Everything that must match for saved counters to be meaningful in a new run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFingerprint {
    pub metrics: Vec<String>,
    pub granularity: usize,
    pub runs: usize,
    pub seed: u64,
    pub block_size: usize,
    pub records1: usize,
    pub records2: usize,
    pub records_to_check: usize,
    pub multiplicity: LinkMultiplicity,
    pub policy: String,
}

impl RunFingerprint {
    /// Human-readable list of the fields that differ.
    pub fn differences(&self, other: &Self) -> Vec<String> {
        let mut diffs = Vec::new();
        macro_rules! cmp {
            ($($field:ident),*) => {
                $(
                    if self.$field != other.$field {
                        diffs.push(format!(
                            "{}: {:?} vs {:?}",
                            stringify!($field),
                            self.$field,
                            other.$field
                        ));
                    }
                )*
            };
        }
        cmp!(
            metrics,
            granularity,
            runs,
            seed,
            block_size,
            records1,
            records2,
            records_to_check,
            multiplicity,
            policy
        );
        diffs
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub fingerprint: RunFingerprint,
    pub records_processed: usize,
    /// Offset of the latest distance dump; the dump cadence continues from it.
    pub last_dump: Option<usize>,
    pub states: Vec<MetricState>,
}

impl Checkpoint {
    pub fn new(
        fingerprint: RunFingerprint,
        records_processed: usize,
        states: Vec<MetricState>,
    ) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            fingerprint,
            records_processed,
            last_dump: None,
            states,
        }
    }

    pub fn with_last_dump(mut self, offset: Option<usize>) -> Self {
        self.last_dump = offset;
        self
    }

    /// Write atomically: encode to `<path>.tmp`, then rename over `path`.
    pub fn write_atomic(&self, path: &Path) -> Result<(), SweepError> {
        let bytes = bincode::serialize(self).map_err(|e| SweepError::Checkpoint {
            message: format!("encode failed: {e}"),
        })?;
        let tmp = path.with_extension("checkpoint.tmp");
        let io = |p: &Path| {
            let path = p.display().to_string();
            move |source: std::io::Error| SweepError::Io { path, source }
        };
        std::fs::write(&tmp, &bytes).map_err(io(&tmp))?;
        std::fs::rename(&tmp, path).map_err(io(path))?;
        tracing::debug!(
            path = %path.display(),
            records_processed = self.records_processed,
            bytes = bytes.len(),
            "checkpoint written"
        );
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self, SweepError> {
        let bytes = std::fs::read(path).map_err(|source| SweepError::Io {
            path: path.display().to_string(),
            source,
        })?;
        // The version leads the encoding, so it can be checked before the rest.
        let version: u32 = bincode::deserialize(&bytes).map_err(|e| SweepError::Checkpoint {
            message: format!("unreadable header: {e}"),
        })?;
        if version != CHECKPOINT_VERSION {
            return Err(SweepError::Checkpoint {
                message: format!(
                    "format version {version}, this build reads version {CHECKPOINT_VERSION}"
                ),
            });
        }
        bincode::deserialize(&bytes).map_err(|e| SweepError::Checkpoint {
            message: format!("decode failed: {e}"),
        })
    }

    pub fn read_if_exists(path: &Path) -> Result<Option<Self>, SweepError> {
        if path.exists() {
            Self::read(path).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Fail unless this checkpoint was written by a run with `expected`'s shape.
    pub fn verify(&self, expected: &RunFingerprint) -> Result<(), SweepError> {
        let diffs = self.fingerprint.differences(expected);
        if diffs.is_empty() {
            Ok(())
        } else {
            Err(SweepError::FingerprintMismatch {
                message: diffs.join("; "),
            })
        }
    }
}
