//! Counting and enumerating ground-truth links.
//!
//! Recall needs the number of true links in the data, not just among the pairs
//! a sweep happened to look at. [`GroupingMode`] computes that number (and the
//! links themselves) for the three shapes of linkage task.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{GroundTruth, LinkStatus};
use crate::record::Record;

/// Derives a family key by concatenating two parent-identifier fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyKey {
    pub field1: usize,
    pub field2: usize,
}

impl FamilyKey {
    pub fn new(field1: usize, field2: usize) -> Self {
        Self { field1, field2 }
    }

    /// Key for a record; `None` when both parts are empty or unreadable.
    pub fn key(&self, record: &Record) -> Option<String> {
        let a = record.get(self.field1).unwrap_or("").trim();
        let b = record.get(self.field2).unwrap_or("").trim();
        if a.is_empty() && b.is_empty() {
            None
        } else {
            Some(format!("{a}-{b}"))
        }
    }
}

/// Shape of a linkage task for ground-truth counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum GroupingMode {
    /// One source; each unordered pair of distinct records at most once.
    Symmetric,
    /// Two sources; full cross product.
    Asymmetric,
    /// One source grouped by family key; every pair inside a family is a link.
    SiblingSymmetric { key: FamilyKey },
    /// Two sources, each grouped by its own key formula.
    SiblingNonSymmetric { key1: FamilyKey, key2: FamilyKey },
}

impl GroupingMode {
    /// Whether the task links a source with itself.
    pub fn is_single_source(&self) -> bool {
        matches!(self, Self::Symmetric | Self::SiblingSymmetric { .. })
    }

    /// Number of true links between the two sets (`records2` is ignored by
    /// single-source modes).
    pub fn count_true_links(
        &self,
        truth: &GroundTruth,
        records1: &[Arc<Record>],
        records2: &[Arc<Record>],
    ) -> u64 {
        match self {
            Self::Symmetric => records1
                .par_iter()
                .enumerate()
                .map(|(i, a)| {
                    records1[i + 1..]
                        .iter()
                        .filter(|b| truth.classify(a, b) == LinkStatus::TrueMatch)
                        .count() as u64
                })
                .sum(),
            Self::Asymmetric => records1
                .par_iter()
                .map(|a| {
                    records2
                        .iter()
                        .filter(|b| truth.classify(a, b) == LinkStatus::TrueMatch)
                        .count() as u64
                })
                .sum(),
            Self::SiblingSymmetric { key } => group_by(records1, key)
                .values()
                .map(|g| {
                    let n = g.len() as u64;
                    n * n.saturating_sub(1) / 2
                })
                .sum(),
            Self::SiblingNonSymmetric { key1, key2 } => {
                let groups2 = group_by(records2, key2);
                group_by(records1, key1)
                    .iter()
                    .filter_map(|(k, g1)| groups2.get(k).map(|g2| (g1, g2)))
                    .map(|(g1, g2)| {
                        g1.iter()
                            .flat_map(|a| g2.iter().map(move |b| (a, b)))
                            .filter(|(a, b)| a.id() != b.id())
                            .count() as u64
                    })
                    .sum()
            }
        }
    }

    /// The true links themselves, as id pairs. Single-source modes order each
    /// pair lexicographically; the result is sorted.
    pub fn ground_truth_links(
        &self,
        truth: &GroundTruth,
        records1: &[Arc<Record>],
        records2: &[Arc<Record>],
    ) -> Vec<(String, String)> {
        let mut links = BTreeSet::new();
        match self {
            Self::Symmetric => {
                for (i, a) in records1.iter().enumerate() {
                    for b in &records1[i + 1..] {
                        if truth.classify(a, b) == LinkStatus::TrueMatch {
                            links.insert(ordered(a.id(), b.id()));
                        }
                    }
                }
            }
            Self::Asymmetric => {
                for a in records1 {
                    for b in records2 {
                        if truth.classify(a, b) == LinkStatus::TrueMatch {
                            links.insert((a.id().to_string(), b.id().to_string()));
                        }
                    }
                }
            }
            Self::SiblingSymmetric { key } => {
                for group in group_by(records1, key).values() {
                    for (i, a) in group.iter().enumerate() {
                        for b in &group[i + 1..] {
                            links.insert(ordered(a.id(), b.id()));
                        }
                    }
                }
            }
            Self::SiblingNonSymmetric { key1, key2 } => {
                let groups2 = group_by(records2, key2);
                for (k, g1) in group_by(records1, key1) {
                    let Some(g2) = groups2.get(&k) else { continue };
                    for a in &g1 {
                        for b in g2.iter().filter(|b| b.id() != a.id()) {
                            links.insert((a.id().to_string(), b.id().to_string()));
                        }
                    }
                }
            }
        }
        links.into_iter().collect()
    }
}

fn group_by<'r>(records: &'r [Arc<Record>], key: &FamilyKey) -> BTreeMap<String, Vec<&'r Record>> {
    let mut groups: BTreeMap<String, Vec<&Record>> = BTreeMap::new();
    for record in records {
        if let Some(k) = key.key(record) {
            groups.entry(k).or_default().push(record);
        }
    }
    groups
}

fn ordered(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}
