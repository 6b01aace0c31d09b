//! Ground-truth classification of record pairs.
//!
//! Ground truth is a set of alternative rule-sets. Each rule-set lists identifier
//! field pairs that must all be non-empty and equal for the pair to be a true
//! match. When no rule-set matches, the [`AbsentFieldPolicy`] decides whether the
//! identifier fields were too sparse to say anything ([`LinkStatus::Unknown`]).

pub mod grouping;
pub mod viability;

use serde::{Deserialize, Serialize};

use crate::record::Record;

pub use grouping::{FamilyKey, GroupingMode};
pub use viability::{ViabilityConfig, ViabilityRule};

/// Tri-state ground-truth verdict for a record pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkStatus {
    TrueMatch,
    NotTrueMatch,
    /// Ground truth is insufficient; the pair is excluded from every count.
    Unknown,
}

/// When a non-matching pair should be treated as unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AbsentFieldPolicy {
    /// Unknown only when every identifier field is empty.
    #[default]
    ClosedWorld,
    /// Unknown as soon as any identifier field is empty.
    OpenWorld,
}

impl AbsentFieldPolicy {
    pub fn label(&self) -> &'static str {
        match self {
            Self::ClosedWorld => "closed-world",
            Self::OpenWorld => "open-world",
        }
    }
}

/// One identifier comparison: `field1` of the first record against `field2` of the second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldPair {
    pub field1: usize,
    pub field2: usize,
}

impl FieldPair {
    pub fn new(field1: usize, field2: usize) -> Self {
        Self { field1, field2 }
    }
}

/// Field pairs that must all match for a rule-set to hold.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuleSet {
    pub pairs: Vec<FieldPair>,
}

impl RuleSet {
    pub fn new(pairs: Vec<FieldPair>) -> Self {
        Self { pairs }
    }
}

impl From<Vec<(usize, usize)>> for RuleSet {
    fn from(pairs: Vec<(usize, usize)>) -> Self {
        Self::new(pairs.into_iter().map(|(a, b)| FieldPair::new(a, b)).collect())
    }
}

/// Ground-truth classifier over alternative rule-sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroundTruth {
    alternatives: Vec<RuleSet>,
    policy: AbsentFieldPolicy,
}

impl GroundTruth {
    pub fn new(alternatives: Vec<RuleSet>, policy: AbsentFieldPolicy) -> Self {
        Self {
            alternatives,
            policy,
        }
    }

    /// Ground truth with a single rule-set.
    pub fn single(rule: impl Into<RuleSet>, policy: AbsentFieldPolicy) -> Self {
        Self::new(vec![rule.into()], policy)
    }

    pub fn policy(&self) -> AbsentFieldPolicy {
        self.policy
    }

    /// Same rules under a different absent-field policy.
    pub fn with_policy(mut self, policy: AbsentFieldPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn alternatives(&self) -> &[RuleSet] {
        &self.alternatives
    }

    /// Classify a pair. A rule that names a field outside either record's
    /// schema makes the pair unknown.
    pub fn classify(&self, a: &Record, b: &Record) -> LinkStatus {
        let mut considered = Vec::new();
        let mut any_match = false;

        for rule in &self.alternatives {
            let mut rule_matches = !rule.pairs.is_empty();
            for pair in &rule.pairs {
                let (Some(v1), Some(v2)) = (a.get(pair.field1), b.get(pair.field2)) else {
                    return LinkStatus::Unknown;
                };
                rule_matches &= equals_non_empty(v1, v2);

                // A record's own id is always present, so it says nothing about sparsity.
                if pair.field1 != a.schema().id_field() {
                    considered.push(v1);
                }
                if pair.field2 != b.schema().id_field() {
                    considered.push(v2);
                }
            }
            any_match |= rule_matches;
        }

        if any_match {
            return LinkStatus::TrueMatch;
        }

        let empty = |v: &&str| v.trim().is_empty();
        // With no considered fields nothing is absent: closed world needs a
        // non-empty set of fields that are all empty.
        let unknown = match self.policy {
            AbsentFieldPolicy::ClosedWorld => {
                !considered.is_empty() && considered.iter().all(empty)
            }
            AbsentFieldPolicy::OpenWorld => considered.iter().any(empty),
        };
        if unknown {
            LinkStatus::Unknown
        } else {
            LinkStatus::NotTrueMatch
        }
    }
}

fn equals_non_empty(a: &str, b: &str) -> bool {
    let a = a.trim();
    !a.is_empty() && a == b.trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Schema;
    use std::sync::Arc;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::new(
                "birth",
                vec!["id".into(), "mother_id".into(), "father_id".into()],
                "id",
            )
            .unwrap(),
        )
    }

    fn birth(id: &str, mother: &str, father: &str) -> Record {
        Record::from_pairs(
            schema(),
            &[("id", id), ("mother_id", mother), ("father_id", father)],
        )
        .unwrap()
    }

    fn both_parents(policy: AbsentFieldPolicy) -> GroundTruth {
        GroundTruth::single(vec![(1, 1), (2, 2)], policy)
    }

    #[test]
    fn all_pairs_equal_is_true_match() {
        let gt = both_parents(AbsentFieldPolicy::ClosedWorld);
        assert_eq!(
            gt.classify(&birth("a", "m1", "f1"), &birth("b", "m1", "f1")),
            LinkStatus::TrueMatch
        );
        assert_eq!(
            gt.classify(&birth("a", "m1", "f1"), &birth("b", "m1", "f2")),
            LinkStatus::NotTrueMatch
        );
    }

    #[test]
    fn empty_values_never_match() {
        let gt = GroundTruth::single(vec![(1, 1)], AbsentFieldPolicy::ClosedWorld);
        assert_ne!(
            gt.classify(&birth("a", "", ""), &birth("b", "", "")),
            LinkStatus::TrueMatch
        );
    }

    #[test]
    fn any_alternative_suffices() {
        let gt = GroundTruth::new(
            vec![RuleSet::from(vec![(1, 1)]), RuleSet::from(vec![(2, 2)])],
            AbsentFieldPolicy::ClosedWorld,
        );
        assert_eq!(
            gt.classify(&birth("a", "m1", "f1"), &birth("b", "m2", "f1")),
            LinkStatus::TrueMatch
        );
    }

    #[test]
    fn closed_world_unknown_only_when_all_empty() {
        let gt = both_parents(AbsentFieldPolicy::ClosedWorld);
        assert_eq!(
            gt.classify(&birth("a", "", ""), &birth("b", "", "")),
            LinkStatus::Unknown
        );
        assert_eq!(
            gt.classify(&birth("a", "m1", ""), &birth("b", "m2", "")),
            LinkStatus::NotTrueMatch
        );
    }

    #[test]
    fn rules_over_ids_alone_are_never_unknown() {
        // With only id fields considered there is nothing that can be absent,
        // so a mismatch is a definite non-match under either policy.
        for policy in [AbsentFieldPolicy::ClosedWorld, AbsentFieldPolicy::OpenWorld] {
            let by_id = GroundTruth::single(vec![(0, 0)], policy);
            assert_eq!(
                by_id.classify(&birth("a", "", ""), &birth("b", "", "")),
                LinkStatus::NotTrueMatch
            );
            assert_eq!(
                by_id.classify(&birth("a", "", ""), &birth("a", "", "")),
                LinkStatus::TrueMatch
            );
            let no_rules = GroundTruth::new(Vec::new(), policy);
            assert_eq!(
                no_rules.classify(&birth("a", "m1", ""), &birth("b", "m1", "")),
                LinkStatus::NotTrueMatch
            );
        }
    }

    #[test]
    fn open_world_unknown_when_any_empty() {
        let gt = both_parents(AbsentFieldPolicy::OpenWorld);
        assert_eq!(
            gt.classify(&birth("a", "m1", ""), &birth("b", "m2", "f2")),
            LinkStatus::Unknown
        );
        assert_eq!(
            gt.classify(&birth("a", "m1", "f1"), &birth("b", "m2", "f2")),
            LinkStatus::NotTrueMatch
        );
    }

    #[test]
    fn own_id_field_is_ignored_for_sparsity() {
        // record1.id == record2.mother_id
        let gt = GroundTruth::single(vec![(0, 1)], AbsentFieldPolicy::OpenWorld);
        assert_eq!(
            gt.classify(&birth("m1", "", ""), &birth("c", "m2", "")),
            LinkStatus::NotTrueMatch
        );
        assert_eq!(
            gt.classify(&birth("m1", "", ""), &birth("c", "", "")),
            LinkStatus::Unknown
        );
        assert_eq!(
            gt.classify(&birth("m1", "", ""), &birth("c", "m1", "")),
            LinkStatus::TrueMatch
        );
    }

    #[test]
    fn unreadable_field_is_unknown() {
        let gt = GroundTruth::single(vec![(9, 1)], AbsentFieldPolicy::ClosedWorld);
        assert_eq!(
            gt.classify(&birth("a", "m", "f"), &birth("b", "m", "f")),
            LinkStatus::Unknown
        );
    }
}
