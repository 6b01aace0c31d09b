//! Indirect (two-hop) link resolution.
//!
//! Two direct linkages that share a pivot record are joined into
//! [`DoubleLink`]s. For every source entity the best synthesized link is
//! selected and assessed against a [`GroundTruthOracle`].

pub mod links_csv;

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::quality::LinkageQuality;
use crate::record::Record;
use crate::truth::LinkStatus;

pub use links_csv::{RecordIndex, load_links};

/// Ground truth for the relationship an indirect linkage is meant to find.
pub trait GroundTruthOracle {
    fn is_true_match(&self, a: &Record, b: &Record) -> LinkStatus;

    fn number_of_ground_truth_true_links(&self) -> u64;
}

/// Oracle adapter that asks the wrapped oracle with the records swapped.
pub struct Reversed<'a>(pub &'a dyn GroundTruthOracle);

impl GroundTruthOracle for Reversed<'_> {
    fn is_true_match(&self, a: &Record, b: &Record) -> LinkStatus {
        self.0.is_true_match(b, a)
    }

    fn number_of_ground_truth_true_links(&self) -> u64 {
        self.0.number_of_ground_truth_true_links()
    }
}

/// A realized link between two records.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub record1: Arc<Record>,
    pub role1: String,
    pub record2: Arc<Record>,
    pub role2: String,
    pub confidence: f64,
    pub distance: f64,
    /// How the link was derived, oldest step first.
    pub provenance: Vec<String>,
    pub link_type: Option<String>,
}

impl Link {
    pub fn new(record1: Arc<Record>, record2: Arc<Record>, confidence: f64, distance: f64) -> Self {
        Self {
            role1: record1.role().to_string(),
            role2: record2.role().to_string(),
            record1,
            record2,
            confidence,
            distance,
            provenance: Vec::new(),
            link_type: None,
        }
    }

    pub fn with_provenance(mut self, provenance: Vec<String>) -> Self {
        self.provenance = provenance;
        self
    }
}

/// Two links meeting at a pivot: `first.record2` is the pivot, and `second`
/// starts from it.
#[derive(Debug, Clone, PartialEq)]
pub struct DoubleLink {
    pub first: Link,
    pub second: Link,
    pub link_type: String,
}

impl DoubleLink {
    pub fn new(first: Link, second: Link, link_type: impl Into<String>) -> Self {
        Self {
            first,
            second,
            link_type: link_type.into(),
        }
    }

    pub fn pivot(&self) -> &Record {
        &self.first.record2
    }

    /// The synthesized one-hop link from `first.record1` to `second.record2`.
    pub fn direct_link(&self) -> Link {
        let mut provenance = self.first.provenance.clone();
        provenance.extend(self.second.provenance.iter().cloned());
        Link {
            record1: Arc::clone(&self.first.record1),
            role1: self.first.role1.clone(),
            record2: Arc::clone(&self.second.record2),
            role2: self.second.role2.clone(),
            confidence: self.first.confidence * self.second.confidence,
            distance: self.first.distance * self.second.distance,
            provenance,
            link_type: Some(self.link_type.clone()),
        }
    }
}

/// Direct links grouped by source-entity key.
pub type LinkMap = BTreeMap<String, Vec<Link>>;

/// Join every link in `first` whose target id is a key of `second` with each
/// link found under that key. Keys of `first` with no join are dropped.
pub fn combine_links(
    first: &LinkMap,
    second: &LinkMap,
    link_type: &str,
) -> BTreeMap<String, Vec<DoubleLink>> {
    let mut combined: BTreeMap<String, Vec<DoubleLink>> = BTreeMap::new();
    for (key, links) in first {
        for link1 in links {
            let Some(onward) = second.get(link1.record2.id()) else {
                continue;
            };
            for link2 in onward {
                combined
                    .entry(key.clone())
                    .or_default()
                    .push(DoubleLink::new(link1.clone(), link2.clone(), link_type));
            }
        }
    }
    combined
}

/// Candidate order: lower distance first, then higher confidence, then
/// provenance, then record ids.
fn compare_candidates(a: &Link, b: &Link) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| b.confidence.total_cmp(&a.confidence))
        .then_with(|| a.provenance.cmp(&b.provenance))
        .then_with(|| a.record1.id().cmp(b.record1.id()))
        .then_with(|| a.record2.id().cmp(b.record2.id()))
}

/// The synthesized link with minimum distance; ties resolved by
/// [`compare_candidates`] so the choice never depends on input order.
pub fn choose_indirect_link(candidates: &[DoubleLink]) -> Option<Link> {
    candidates
        .iter()
        .map(DoubleLink::direct_link)
        .min_by(compare_candidates)
}

/// One pivot path: two direct linkages and how to join them.
#[derive(Debug, Clone)]
pub struct IndirectPath {
    first: LinkMap,
    second: LinkMap,
    link_type: String,
    reversed: bool,
}

impl IndirectPath {
    pub fn new(first: LinkMap, second: LinkMap, link_type: impl Into<String>) -> Self {
        Self {
            first,
            second,
            link_type: link_type.into(),
            reversed: false,
        }
    }

    /// Assess selected links with their records swapped.
    pub fn reversed(mut self) -> Self {
        self.reversed = true;
        self
    }

    pub fn link_type(&self) -> &str {
        &self.link_type
    }

    pub fn is_reversed(&self) -> bool {
        self.reversed
    }

    pub fn potential_links(&self) -> BTreeMap<String, Vec<DoubleLink>> {
        combine_links(&self.first, &self.second, &self.link_type)
    }
}

/// A best link chosen for one source entity.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedLink {
    pub key: String,
    pub link: Link,
    pub reversed: bool,
}

/// Counts from assessing selected links.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assessment {
    pub quality: LinkageQuality,
    /// Selected links the oracle could not classify; excluded from the counts.
    pub unknown: u64,
}

/// Resolves one or more [`IndirectPath`]s over a shared key space.
#[derive(Debug, Clone, Default)]
pub struct IndirectResolver {
    paths: Vec<IndirectPath>,
}

impl IndirectResolver {
    pub fn new(paths: Vec<IndirectPath>) -> Self {
        Self { paths }
    }

    pub fn single(path: IndirectPath) -> Self {
        Self::new(vec![path])
    }

    pub fn paths(&self) -> &[IndirectPath] {
        &self.paths
    }

    /// Candidates of every path, unioned per key.
    pub fn potential_links(&self) -> BTreeMap<String, Vec<(DoubleLink, bool)>> {
        let mut merged: BTreeMap<String, Vec<(DoubleLink, bool)>> = BTreeMap::new();
        for path in &self.paths {
            for (key, links) in path.potential_links() {
                merged
                    .entry(key)
                    .or_default()
                    .extend(links.into_iter().map(|l| (l, path.reversed)));
            }
        }
        merged
    }

    /// The best link per key, in key order.
    pub fn select(&self) -> Vec<SelectedLink> {
        self.potential_links()
            .into_iter()
            .filter_map(|(key, candidates)| {
                candidates
                    .iter()
                    .map(|(d, reversed)| (d.direct_link(), *reversed))
                    .min_by(|a, b| compare_candidates(&a.0, &b.0))
                    .map(|(link, reversed)| SelectedLink {
                        key,
                        link,
                        reversed,
                    })
            })
            .collect()
    }

    /// Select and assess. False negatives are the oracle's true-link total
    /// minus the true positives found.
    pub fn assess(&self, oracle: &dyn GroundTruthOracle) -> Assessment {
        let selected = self.select();
        let (mut tp, mut fp, mut unknown) = (0u64, 0u64, 0u64);
        for s in &selected {
            let status = if s.reversed {
                Reversed(oracle).is_true_match(&s.link.record1, &s.link.record2)
            } else {
                oracle.is_true_match(&s.link.record1, &s.link.record2)
            };
            match status {
                LinkStatus::TrueMatch => tp += 1,
                LinkStatus::NotTrueMatch => fp += 1,
                LinkStatus::Unknown => unknown += 1,
            }
        }
        let quality = LinkageQuality::from_ground_truth_total(
            tp,
            fp,
            oracle.number_of_ground_truth_true_links(),
        );
        tracing::info!(
            paths = self.paths.len(),
            selected = selected.len(),
            tp = quality.tp,
            fp = quality.fp,
            fn_ = quality.fn_,
            unknown,
            precision = format!("{:.2}", quality.precision()),
            recall = format!("{:.2}", quality.recall()),
            "indirect linkage assessed"
        );
        Assessment { quality, unknown }
    }
}
