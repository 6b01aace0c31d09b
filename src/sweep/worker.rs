//! Per-metric evaluation of one block of outer records.

use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{LinkMultiplicity, MetricState, ThresholdGrid};
use crate::linkage::LinkageSpec;
use crate::metric::Metric;
use crate::record::{Record, RecordPair};
use crate::truth::LinkStatus;

/// Read-only inputs shared by every worker.
pub struct BlockContext<'a> {
    pub spec: &'a LinkageSpec,
    pub outer: &'a [Arc<Record>],
    pub inner: &'a [Arc<Record>],
    /// Outer and inner are the same sequence; skip `i == j`.
    pub single_source: bool,
    pub grid: ThresholdGrid,
    pub multiplicity: LinkMultiplicity,
    pub interrupt: &'a AtomicBool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    Completed,
    /// Stopped at a record boundary because the interrupt flag was raised.
    Interrupted,
}

/// Tentative positive decision in single-link mode.
struct Tentative {
    run: usize,
    distance: f64,
    is_true_link: bool,
}

impl BlockContext<'_> {
    /// Pairs each outer record forms with the inner sequence.
    pub fn pairs_per_record(&self) -> usize {
        if self.single_source {
            self.inner.len().saturating_sub(1)
        } else {
            self.inner.len()
        }
    }

    /// Evaluate outer records `range` with `metric`, accumulating into `state`.
    pub fn evaluate_block(
        &self,
        metric: &dyn Metric,
        state: &mut MetricState,
        range: Range<usize>,
    ) -> BlockOutcome {
        for i in range {
            if self.interrupt.load(Ordering::Relaxed) {
                return BlockOutcome::Interrupted;
            }
            self.evaluate_record(i, metric, state);
        }
        BlockOutcome::Completed
    }

    fn evaluate_record(&self, i: usize, metric: &dyn Metric, state: &mut MetricState) {
        let a = &self.outer[i];
        let mut tentative: Option<Tentative> = None;

        for (j, b) in self.inner.iter().enumerate() {
            if self.single_source && i == j {
                continue;
            }
            let run = state.take_run();

            let classified = metric
                .normalized_distance(a, b)
                .map(|d| (d, self.spec.classify(a, b)))
                .filter(|(_, status)| *status != LinkStatus::Unknown);
            let Some((distance, status)) = classified else {
                state.pairs_ignored[run] += 1;
                continue;
            };
            let is_true_link = status == LinkStatus::TrueMatch;
            let viable = self
                .spec
                .is_viable(&RecordPair::with_distance(a, b, distance));

            match self.multiplicity {
                LinkMultiplicity::Many => {
                    state.record_decisions(run, &self.grid, distance, viable, is_true_link);
                }
                LinkMultiplicity::Single => {
                    let closer = tentative.as_ref().is_none_or(|t| distance < t.distance);
                    if viable && closer {
                        if let Some(t) = tentative.take() {
                            state.retract_decisions(t.run, &self.grid, t.distance, t.is_true_link);
                        }
                        state.record_decisions(run, &self.grid, distance, true, is_true_link);
                        tentative = Some(Tentative {
                            run,
                            distance,
                            is_true_link,
                        });
                    } else {
                        state.record_negatives(run, is_true_link);
                    }
                }
            }

            state.record_distance(run, &self.grid, distance, is_true_link);
            state.pairs_evaluated[run] += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{Aggregation, BaseMetric, CompositeMetric};
    use crate::record::Schema;
    use crate::truth::{AbsentFieldPolicy, GroundTruth, GroupingMode};

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::new(
                "person",
                vec!["id".into(), "name".into(), "family".into()],
                "id",
            )
            .unwrap(),
        )
    }

    fn people(rows: &[(&str, &str, &str)]) -> Vec<Arc<Record>> {
        let schema = schema();
        rows.iter()
            .map(|(id, name, family)| {
                Arc::new(
                    Record::from_pairs(
                        Arc::clone(&schema),
                        &[("id", id), ("name", name), ("family", family)],
                    )
                    .unwrap(),
                )
            })
            .collect()
    }

    fn spec() -> LinkageSpec {
        LinkageSpec::symmetric(
            "person-person",
            "person",
            vec![1],
            GroundTruth::single(vec![(2, 2)], AbsentFieldPolicy::ClosedWorld),
            GroupingMode::Symmetric,
        )
        .unwrap()
    }

    fn metric() -> CompositeMetric {
        CompositeMetric::symmetric(BaseMetric::NormalizedLevenshtein, vec![1], Aggregation::Mean)
            .unwrap()
    }

    fn context<'a>(
        spec: &'a LinkageSpec,
        records: &'a [Arc<Record>],
        multiplicity: LinkMultiplicity,
        interrupt: &'a AtomicBool,
    ) -> BlockContext<'a> {
        BlockContext {
            spec,
            outer: records,
            inner: records,
            single_source: true,
            grid: ThresholdGrid::default(),
            multiplicity,
            interrupt,
        }
    }

    #[test]
    fn single_source_skips_self_pairs_and_partitions() {
        let records = people(&[
            ("1", "anna", "f1"),
            ("2", "anne", "f1"),
            ("3", "bob", "f2"),
            ("4", "", ""),
        ]);
        let spec = spec();
        let flag = AtomicBool::new(false);
        let ctx = context(&spec, &records, LinkMultiplicity::Many, &flag);
        let metric = metric();
        let mut state = MetricState::new(metric.name(), 2, &ctx.grid);

        let outcome = ctx.evaluate_block(&metric, &mut state, 0..records.len());
        assert_eq!(outcome, BlockOutcome::Completed);

        // Record 4 has no family id but its partner always does, so under the
        // closed-world policy no pair is unknown.
        let seen = state.total_evaluated() + state.total_ignored();
        assert_eq!(seen, 12);
        assert_eq!(state.next_run, 0);
        for run in 0..2 {
            for s in &state.samples[run] {
                assert_eq!(s.total(), state.pairs_evaluated[run]);
            }
        }
    }

    #[test]
    fn single_link_keeps_only_closest_candidate() {
        let records = people(&[
            ("1", "anna", "f1"),
            ("2", "anna", "f2"),
            ("3", "anne", "f1"),
        ]);
        let spec = spec();
        let flag = AtomicBool::new(false);
        let ctx = context(&spec, &records, LinkMultiplicity::Single, &flag);
        let metric = metric();
        let mut state = MetricState::new(metric.name(), 1, &ctx.grid);

        ctx.evaluate_block(&metric, &mut state, 0..1);

        // Record 1's closest candidate is record 2 (distance 0, not a true link);
        // record 3 (a true link) is therefore a false negative at every threshold.
        let top = state.samples[0][100];
        assert_eq!(top, crate::sweep::Sample { tp: 0, fp: 1, fn_: 1, tn: 0 });
        assert!(state.samples[0].iter().all(|s| s.total() == 2));
    }

    #[test]
    fn single_link_retracts_superseded_candidate() {
        let records = people(&[
            ("1", "anna", "f1"),
            ("2", "anne", "f2"),
            ("3", "anna", "f1"),
        ]);
        let spec = spec();
        let flag = AtomicBool::new(false);
        let ctx = context(&spec, &records, LinkMultiplicity::Single, &flag);
        let metric = metric();
        let mut state = MetricState::new(metric.name(), 1, &ctx.grid);

        ctx.evaluate_block(&metric, &mut state, 0..1);

        // Record 2 was tentatively linked, then superseded by the exact match 3.
        let top = state.samples[0][100];
        assert_eq!(top, crate::sweep::Sample { tp: 1, fp: 0, fn_: 0, tn: 1 });
    }

    #[test]
    fn interrupt_stops_before_next_record() {
        let records = people(&[("1", "a", "f"), ("2", "b", "f")]);
        let spec = spec();
        let flag = AtomicBool::new(true);
        let ctx = context(&spec, &records, LinkMultiplicity::Many, &flag);
        let metric = metric();
        let mut state = MetricState::new(metric.name(), 1, &ctx.grid);
        assert_eq!(
            ctx.evaluate_block(&metric, &mut state, 0..2),
            BlockOutcome::Interrupted
        );
        assert_eq!(state.total_evaluated(), 0);
    }

    #[test]
    fn unreadable_comparison_field_is_ignored() {
        let records = people(&[("1", "a", "f"), ("2", "b", "f")]);
        let spec = spec();
        let flag = AtomicBool::new(false);
        let ctx = context(&spec, &records, LinkMultiplicity::Many, &flag);
        let broken =
            CompositeMetric::symmetric(BaseMetric::Exact, vec![9], Aggregation::Sum).unwrap();
        let mut state = MetricState::new(broken.name(), 1, &ctx.grid);
        ctx.evaluate_block(&broken, &mut state, 0..2);
        assert_eq!(state.total_ignored(), 2);
        assert_eq!(state.total_evaluated(), 0);
    }
}
