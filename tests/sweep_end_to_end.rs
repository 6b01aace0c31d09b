//! End-to-end threshold sweeps over small record sets.

use std::path::Path;
use std::sync::Arc;

use linkage_calibrate::config::RunConfig;
use linkage_calibrate::indirect::GroundTruthOracle;
use linkage_calibrate::linkage::{DirectLinkage, LinkageSpec};
use linkage_calibrate::metric::{Aggregation, BaseMetric, Metric};
use linkage_calibrate::quality::LinkageQuality;
use linkage_calibrate::record::{Record, Schema};
use linkage_calibrate::sweep::{RunPhase, SweepConfig, SweepEngine};
use linkage_calibrate::truth::{AbsentFieldPolicy, GroundTruth, GroupingMode};

fn records(schema: &Arc<Schema>, rows: &[&[(&str, &str)]]) -> Vec<Arc<Record>> {
    rows.iter()
        .map(|pairs| Arc::new(Record::from_pairs(Arc::clone(schema), pairs).unwrap()))
        .collect()
}

/// Result rows without the leading timestamp.
fn result_rows(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .skip(1)
        .map(|l| l.split_once(',').unwrap().1.to_string())
        .collect()
}

#[test]
fn parent_child_scenario_is_perfect_at_zero_threshold() {
    let dir = tempfile::TempDir::new().unwrap();
    let a = Arc::new(
        Schema::new(
            "a",
            vec!["id".into(), "age".into(), "name".into(), "parent_id".into()],
            "id",
        )
        .unwrap(),
    );
    let b = Arc::new(
        Schema::new(
            "b",
            vec!["id".into(), "name".into(), "child_id".into()],
            "id",
        )
        .unwrap(),
    );
    let source_a = records(
        &a,
        &[
            &[("id", "A1"), ("age", "20"), ("name", "John Smith"), ("parent_id", "P1")],
            &[("id", "A2"), ("age", "45"), ("name", "John Smith"), ("parent_id", "P2")],
        ],
    );
    let source_b = records(&b, &[&[("id", "B1"), ("name", "John Smith"), ("child_id", "P1")]]);

    // A2 is too old to be the child, so its pair with B1 is never predicted positive.
    let spec = LinkageSpec::new(
        "a-b-parent",
        "a",
        "b",
        vec![2],
        vec![1],
        GroundTruth::single(vec![(3, 2)], AbsentFieldPolicy::ClosedWorld),
        GroupingMode::Asymmetric,
    )
    .unwrap()
    .with_viability(|pair| {
        pair.record1
            .get(1)
            .and_then(|age| age.parse::<u32>().ok())
            .is_none_or(|age| age < 40)
    });
    let metric = spec
        .composite_metric(BaseMetric::Exact, Aggregation::Mean)
        .unwrap();
    assert_eq!(metric.name(), "mean-exact");

    let oracle = DirectLinkage::new(spec.clone(), source_a.clone(), source_b.clone());
    assert_eq!(oracle.number_of_ground_truth_true_links(), 1);

    let config = SweepConfig {
        output_dir: dir.path().to_path_buf(),
        file_stem: "scenario".into(),
        ..Default::default()
    };
    let mut engine = SweepEngine::new(spec, vec![Box::new(metric)], config).unwrap();
    engine.load_record_sets(source_a, Some(source_b)).unwrap();
    let summary = engine.run().unwrap();
    assert_eq!(summary.phase, RunPhase::Completed);
    assert_eq!(summary.records_processed, 2);

    let at_zero = engine.states()[0].samples[0][0];
    assert_eq!((at_zero.tp, at_zero.fp, at_zero.fn_, at_zero.tn), (1, 0, 0, 1));

    let quality = LinkageQuality::from_ground_truth_total(
        at_zero.tp,
        at_zero.fp,
        oracle.number_of_ground_truth_true_links(),
    );
    assert_eq!(quality.precision(), 1.0);
    assert_eq!(quality.recall(), 1.0);
    assert_eq!(quality.f_measure(), 1.0);

    let rows = result_rows(&engine.output_paths().results);
    assert!(rows.contains(&"1,2,2,0,mean-exact,0.00,1,0,0,1,1.00,1.00,1.00".to_string()));
}

#[test]
fn configured_run_writes_complete_tables() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut births = String::from("id,forename,surname,year,mother_id,father_id\n");
    let names = ["anna", "anne", "johan", "johannes", "maria", "marie"];
    for i in 0..12 {
        births.push_str(&format!(
            "b{i},{},berg,{},m{},f{}\n",
            names[i % names.len()],
            1850 + i,
            i % 3,
            i % 3
        ));
    }
    std::fs::write(dir.path().join("births.csv"), births).unwrap();
    let config_path = dir.path().join("run.toml");
    std::fs::write(
        &config_path,
        r#"
        dataset = "synthetic"
        linkage_type = "birth-birth-sibling"
        comparison_fields = ["forename", "surname"]
        ground_truth = [[["mother_id", "mother_id"], ["father_id", "father_id"]]]
        metrics = ["levenshtein", "jaro-winkler"]
        viability = { kind = "sibling-birth-years", year1 = "year", year2 = "year" }

        [source1]
        path = "births.csv"
        role = "birth"

        [sweep]
        block_size = 5
        runs = 2
        granularity = 11
        output_dir = "out"
        file_stem = "siblings"
        "#,
    )
    .unwrap();

    let run = RunConfig::load(&config_path).unwrap();
    let prepared = run.prepare().unwrap();
    let mut engine = SweepEngine::new(prepared.spec, prepared.metrics, run.sweep.clone())
        .unwrap()
        .with_dataset(&run.dataset);
    engine.load_records(&prepared.source1, None).unwrap();
    let summary = engine.run().unwrap();
    assert_eq!(summary.blocks_run, 3);

    for state in engine.states() {
        assert_eq!(state.total_evaluated(), 12 * 11);
        for run in 0..2 {
            for sample in &state.samples[run] {
                assert_eq!(sample.total(), state.pairs_evaluated[run]);
            }
        }
    }

    let paths = engine.output_paths();
    assert!(paths.results.starts_with(dir.path().join("out")));

    // blocks x metrics x runs x thresholds
    let results = std::fs::read_to_string(&paths.results).unwrap();
    assert_eq!(results.lines().count(), 1 + 3 * 2 * 2 * 11);
    assert!(results.lines().all(|l| l.split(',').count() == 14));

    // Histograms are dumped every block: two rows per metric and run.
    let distances = std::fs::read_to_string(&paths.distances).unwrap();
    assert_eq!(distances.lines().count(), 1 + 3 * 2 * 2 * 2);
    assert!(distances.lines().all(|l| l.split(',').count() == 7 + 11));

    let meta = std::fs::read_to_string(&paths.results_meta).unwrap();
    assert!(meta.contains("Dataset: synthetic"));
    assert!(meta.contains("Linkage type: birth-birth-sibling"));
}

#[test]
fn absent_field_policy_comes_from_the_run() {
    let schema = Arc::new(
        Schema::new(
            "birth",
            vec!["id".into(), "name".into(), "mother_id".into(), "father_id".into()],
            "id",
        )
        .unwrap(),
    );
    let rows: Vec<Arc<Record>> = records(
        &schema,
        &[
            &[("id", "1"), ("name", "anna"), ("mother_id", "m1"), ("father_id", "f1")],
            &[("id", "2"), ("name", "anne"), ("mother_id", "m1"), ("father_id", "")],
            &[("id", "3"), ("name", "bo"), ("mother_id", ""), ("father_id", "f2")],
            &[("id", "4"), ("name", "bob"), ("mother_id", "m2"), ("father_id", "f2")],
        ],
    );
    let spec = LinkageSpec::symmetric(
        "birth-birth-sibling",
        "birth",
        vec![1],
        GroundTruth::single(vec![(2, 2), (3, 3)], AbsentFieldPolicy::ClosedWorld),
        GroupingMode::Symmetric,
    )
    .unwrap();

    let ignored = |policy: AbsentFieldPolicy| {
        let dir = tempfile::TempDir::new().unwrap();
        let metric: Box<dyn Metric> = Box::new(
            spec.composite_metric(BaseMetric::Levenshtein, Aggregation::Sigma)
                .unwrap(),
        );
        let config = SweepConfig {
            absent_field_policy: policy,
            output_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let mut engine = SweepEngine::new(spec.clone(), vec![metric], config).unwrap();
        engine.load_record_sets(rows.clone(), None).unwrap();
        engine.run().unwrap();
        let state = &engine.states()[0];
        assert_eq!(state.total_evaluated() + state.total_ignored(), 12);
        state.total_ignored()
    };

    // Some identifier is present in every pair, so the closed world ignores nothing.
    assert_eq!(ignored(AbsentFieldPolicy::ClosedWorld), 0);
    // Every pair involving record 2 or 3 has an empty identifier.
    assert_eq!(ignored(AbsentFieldPolicy::OpenWorld), 10);
}
