//! Distance metrics over strings and whole records.
//!
//! [`BaseMetric`] names a string distance backed by `strsim`. Record-level
//! metrics implement [`Metric`]; the usual implementation is
//! [`composite::CompositeMetric`], which applies a base metric to a list of
//! field pairs and aggregates the per-field distances.

pub mod composite;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MetricError;
use crate::record::Record;

pub use composite::{Aggregation, CompositeMetric};

/// Map a distance in `[0, ∞)` to `[0, 1)`.
///
/// Monotonically increasing, `normalize(0) == 0`, asymptotic to 1.
pub fn normalize(distance: f64) -> f64 {
    distance / (distance + 1.0)
}

/// A named, deterministic distance between two records.
///
/// Implementations must be free of interior mutation: one instance is shared
/// by reference across all worker threads of a sweep.
pub trait Metric: Send + Sync {
    /// Unique name, used as the counter key in sweep output.
    fn name(&self) -> &str;

    /// Distance between two records, or `None` when a compared field could not
    /// be read (the pair is then classified as unknown).
    fn distance(&self, a: &Record, b: &Record) -> Option<f64>;

    /// Whether distances are already bounded by 1.0.
    fn max_distance_is_one(&self) -> bool;

    /// Distance mapped into `[0, 1]`, normalizing only unbounded metrics.
    fn normalized_distance(&self, a: &Record, b: &Record) -> Option<f64> {
        let d = self.distance(a, b)?;
        Some(if self.max_distance_is_one() {
            d
        } else {
            normalize(d)
        })
    }
}

/// String distance functions.
///
/// Similarity-based metrics report `1 - similarity` and are bounded by 1.0.
/// Edit-distance metrics report raw edit counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BaseMetric {
    Levenshtein,
    DamerauLevenshtein,
    Osa,
    NormalizedLevenshtein,
    Jaro,
    JaroWinkler,
    SorensenDice,
    Exact,
}

impl BaseMetric {
    pub const ALL: [BaseMetric; 8] = [
        BaseMetric::Levenshtein,
        BaseMetric::DamerauLevenshtein,
        BaseMetric::Osa,
        BaseMetric::NormalizedLevenshtein,
        BaseMetric::Jaro,
        BaseMetric::JaroWinkler,
        BaseMetric::SorensenDice,
        BaseMetric::Exact,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Levenshtein => "levenshtein",
            Self::DamerauLevenshtein => "damerau-levenshtein",
            Self::Osa => "osa",
            Self::NormalizedLevenshtein => "normalized-levenshtein",
            Self::Jaro => "jaro",
            Self::JaroWinkler => "jaro-winkler",
            Self::SorensenDice => "sorensen-dice",
            Self::Exact => "exact",
        }
    }

    /// Whether every distance this metric produces lies in `[0, 1]`.
    pub fn max_distance_is_one(&self) -> bool {
        !matches!(
            self,
            Self::Levenshtein | Self::DamerauLevenshtein | Self::Osa
        )
    }

    pub fn distance(&self, a: &str, b: &str) -> f64 {
        match self {
            Self::Levenshtein => strsim::levenshtein(a, b) as f64,
            Self::DamerauLevenshtein => strsim::damerau_levenshtein(a, b) as f64,
            Self::Osa => strsim::osa_distance(a, b) as f64,
            Self::NormalizedLevenshtein => 1.0 - strsim::normalized_levenshtein(a, b),
            Self::Jaro => 1.0 - strsim::jaro(a, b),
            Self::JaroWinkler => 1.0 - strsim::jaro_winkler(a, b),
            Self::SorensenDice => 1.0 - strsim::sorensen_dice(a, b),
            Self::Exact => {
                if a == b {
                    0.0
                } else {
                    1.0
                }
            }
        }
    }
}

impl fmt::Display for BaseMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BaseMetric {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|m| m.name() == wanted)
            .ok_or_else(|| MetricError::UnknownMetric {
                name: s.to_string(),
            })
    }
}
