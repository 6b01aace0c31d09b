//! Linkage specifications: one parameterised value per relationship type.
//!
//! A [`LinkageSpec`] bundles everything that distinguishes, say, birth-death
//! identity linkage from birth-birth sibling linkage: role labels, comparison
//! fields, ground-truth rules, grouping mode, and a viability predicate.
//! [`DirectLinkage`] binds a spec to concrete record sets and acts as the
//! ground-truth oracle for indirect resolution.

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::error::MetricError;
use crate::indirect::GroundTruthOracle;
use crate::metric::{Aggregation, BaseMetric, CompositeMetric};
use crate::record::{Record, RecordPair};
use crate::truth::{GroundTruth, GroupingMode, LinkStatus, ViabilityConfig, ViabilityRule};

/// Viability predicate over a proposed link.
pub type Viability = Arc<dyn Fn(&RecordPair<'_>) -> bool + Send + Sync>;

/// Field lists, roles, ground truth and viability for one kind of linkage.
#[derive(Clone)]
pub struct LinkageSpec {
    /// Linkage type label, e.g. `birth-death-identity`.
    pub name: String,
    pub role1: String,
    pub role2: String,
    pub fields1: Vec<usize>,
    pub fields2: Vec<usize>,
    pub ground_truth: GroundTruth,
    pub grouping: GroupingMode,
    viability: Viability,
}

impl LinkageSpec {
    pub fn new(
        name: impl Into<String>,
        role1: impl Into<String>,
        role2: impl Into<String>,
        fields1: Vec<usize>,
        fields2: Vec<usize>,
        ground_truth: GroundTruth,
        grouping: GroupingMode,
    ) -> Result<Self, MetricError> {
        if fields1.len() != fields2.len() {
            return Err(MetricError::FieldListMismatch {
                left: fields1.len(),
                right: fields2.len(),
            });
        }
        Ok(Self {
            name: name.into(),
            role1: role1.into(),
            role2: role2.into(),
            fields1,
            fields2,
            ground_truth,
            grouping,
            viability: Arc::new(|_: &RecordPair<'_>| true),
        })
    }

    /// A single-source spec comparing the same fields on both sides.
    pub fn symmetric(
        name: impl Into<String>,
        role: impl Into<String>,
        fields: Vec<usize>,
        ground_truth: GroundTruth,
        grouping: GroupingMode,
    ) -> Result<Self, MetricError> {
        let role = role.into();
        Self::new(name, role.clone(), role, fields.clone(), fields, ground_truth, grouping)
    }

    /// Replace the viability predicate with an arbitrary closure.
    pub fn with_viability<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&RecordPair<'_>) -> bool + Send + Sync + 'static,
    {
        self.viability = Arc::new(predicate);
        self
    }

    /// Use one of the built-in viability rules.
    pub fn with_viability_rule(self, rule: ViabilityRule, config: ViabilityConfig) -> Self {
        self.with_viability(move |pair| rule.is_viable(pair, &config))
    }

    pub fn is_viable(&self, pair: &RecordPair<'_>) -> bool {
        (self.viability)(pair)
    }

    pub fn classify(&self, a: &Record, b: &Record) -> LinkStatus {
        self.ground_truth.classify(a, b)
    }

    pub fn is_single_source(&self) -> bool {
        self.grouping.is_single_source()
    }

    /// Build a composite metric over this spec's comparison fields.
    pub fn composite_metric(
        &self,
        base: BaseMetric,
        aggregation: Aggregation,
    ) -> Result<CompositeMetric, MetricError> {
        CompositeMetric::two_source(base, self.fields1.clone(), self.fields2.clone(), aggregation)
    }
}

impl fmt::Debug for LinkageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkageSpec")
            .field("name", &self.name)
            .field("role1", &self.role1)
            .field("role2", &self.role2)
            .field("fields1", &self.fields1)
            .field("fields2", &self.fields2)
            .field("ground_truth", &self.ground_truth)
            .field("grouping", &self.grouping)
            .finish_non_exhaustive()
    }
}

/// A linkage spec bound to its record sets.
///
/// The ground-truth link count is computed on first use and cached.
pub struct DirectLinkage {
    spec: LinkageSpec,
    records1: Vec<Arc<Record>>,
    records2: Vec<Arc<Record>>,
    true_links: OnceLock<u64>,
}

impl DirectLinkage {
    pub fn new(spec: LinkageSpec, records1: Vec<Arc<Record>>, records2: Vec<Arc<Record>>) -> Self {
        Self {
            spec,
            records1,
            records2,
            true_links: OnceLock::new(),
        }
    }

    pub fn spec(&self) -> &LinkageSpec {
        &self.spec
    }

    /// Ground-truth links as id pairs.
    pub fn ground_truth_links(&self) -> Vec<(String, String)> {
        self.spec
            .grouping
            .ground_truth_links(&self.spec.ground_truth, &self.records1, &self.records2)
    }
}

impl GroundTruthOracle for DirectLinkage {
    fn is_true_match(&self, a: &Record, b: &Record) -> LinkStatus {
        self.spec.classify(a, b)
    }

    fn number_of_ground_truth_true_links(&self) -> u64 {
        *self.true_links.get_or_init(|| {
            let count = self.spec.grouping.count_true_links(
                &self.spec.ground_truth,
                &self.records1,
                &self.records2,
            );
            tracing::debug!(linkage = %self.spec.name, count, "counted ground-truth links");
            count
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::Metric;
    use crate::record::Schema;
    use crate::truth::AbsentFieldPolicy;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::new(
                "birth",
                vec!["id".into(), "name".into(), "year".into(), "mother_id".into()],
                "id",
            )
            .unwrap(),
        )
    }

    fn birth(id: &str, name: &str, year: &str, mother: &str) -> Arc<Record> {
        Arc::new(
            Record::from_pairs(
                schema(),
                &[("id", id), ("name", name), ("year", year), ("mother_id", mother)],
            )
            .unwrap(),
        )
    }

    fn sibling_spec() -> LinkageSpec {
        LinkageSpec::symmetric(
            "birth-birth-sibling",
            "birth",
            vec![1],
            GroundTruth::single(vec![(3, 3)], AbsentFieldPolicy::ClosedWorld),
            GroupingMode::Symmetric,
        )
        .unwrap()
    }

    #[test]
    fn mismatched_fields_rejected() {
        let err = LinkageSpec::new(
            "x",
            "a",
            "b",
            vec![1, 2],
            vec![1],
            GroundTruth::single(vec![(0, 0)], AbsentFieldPolicy::ClosedWorld),
            GroupingMode::Asymmetric,
        );
        assert!(err.is_err());
    }

    #[test]
    fn default_viability_accepts_everything() {
        let spec = sibling_spec();
        let (a, b) = (birth("1", "a", "1800", "m"), birth("2", "b", "1990", "m"));
        assert!(spec.is_viable(&RecordPair::new(&a, &b)));
    }

    #[test]
    fn viability_rule_is_applied() {
        let spec = sibling_spec().with_viability_rule(
            ViabilityRule::SiblingBirthYears { year1: 2, year2: 2 },
            ViabilityConfig::default(),
        );
        let (a, b, c) = (
            birth("1", "a", "1800", "m"),
            birth("2", "b", "1990", "m"),
            birth("3", "c", "1810", "m"),
        );
        assert!(!spec.is_viable(&RecordPair::new(&a, &b)));
        assert!(spec.is_viable(&RecordPair::new(&a, &c)));
    }

    #[test]
    fn composite_metric_uses_spec_fields() {
        let spec = sibling_spec();
        let m = spec
            .composite_metric(BaseMetric::Exact, Aggregation::Sum)
            .unwrap();
        let (a, b) = (birth("1", "ann", "", ""), birth("2", "ann", "", ""));
        assert_eq!(m.distance(&a, &b), Some(0.0));
    }

    #[test]
    fn direct_linkage_counts_true_links() {
        let records = vec![
            birth("1", "a", "", "m1"),
            birth("2", "b", "", "m1"),
            birth("3", "c", "", "m2"),
        ];
        let linkage = DirectLinkage::new(sibling_spec(), records.clone(), vec![]);
        assert_eq!(linkage.number_of_ground_truth_true_links(), 1);
        assert_eq!(
            linkage.is_true_match(&records[0], &records[1]),
            LinkStatus::TrueMatch
        );
        assert_eq!(
            linkage.ground_truth_links(),
            vec![("1".to_string(), "2".to_string())]
        );
    }
}
