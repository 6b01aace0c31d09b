//! Benchmarks for per-block sweep evaluation.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::{Rng, SeedableRng};

use linkage_calibrate::linkage::LinkageSpec;
use linkage_calibrate::metric::{Aggregation, BaseMetric, CompositeMetric};
use linkage_calibrate::record::{Record, Schema};
use linkage_calibrate::sweep::worker::BlockContext;
use linkage_calibrate::sweep::{LinkMultiplicity, MetricState, ThresholdGrid};
use linkage_calibrate::truth::{AbsentFieldPolicy, GroundTruth, GroupingMode};

const SYLLABLES: [&str; 8] = ["an", "na", "jo", "han", "ma", "ri", "ber", "lund"];

fn births(n: usize) -> Vec<Arc<Record>> {
    let schema = Arc::new(
        Schema::new(
            "birth",
            vec![
                "id".into(),
                "forename".into(),
                "surname".into(),
                "mother_id".into(),
            ],
            "id",
        )
        .unwrap(),
    );
    let mut rng = rand::rngs::StdRng::seed_from_u64(0);
    let word = |rng: &mut rand::rngs::StdRng| -> String {
        (0..rng.gen_range(2..4))
            .map(|_| SYLLABLES[rng.gen_range(0..SYLLABLES.len())])
            .collect()
    };
    (0..n)
        .map(|i| {
            let values = vec![
                format!("b{i}"),
                word(&mut rng),
                word(&mut rng),
                format!("m{}", rng.gen_range(0..n / 4)),
            ];
            Arc::new(Record::new(Arc::clone(&schema), values).unwrap())
        })
        .collect()
}

fn bench_block(c: &mut Criterion, name: &str, base: BaseMetric, multiplicity: LinkMultiplicity) {
    let records = births(1000);
    let spec = LinkageSpec::symmetric(
        "birth-birth-sibling",
        "birth",
        vec![1, 2],
        GroundTruth::single(vec![(3, 3)], AbsentFieldPolicy::ClosedWorld),
        GroupingMode::Symmetric,
    )
    .unwrap();
    let metric = CompositeMetric::symmetric(base, vec![1, 2], Aggregation::Sigma).unwrap();
    let interrupt = AtomicBool::new(false);
    let ctx = BlockContext {
        spec: &spec,
        outer: &records,
        inner: &records,
        single_source: true,
        grid: ThresholdGrid::default(),
        multiplicity,
        interrupt: &interrupt,
    };

    c.bench_function(name, |bench| {
        bench.iter(|| {
            let mut state = MetricState::new("bench", 1, &ctx.grid);
            black_box(ctx.evaluate_block(&metric, &mut state, 0..10));
            black_box(state)
        })
    });
}

fn bench_levenshtein(c: &mut Criterion) {
    bench_block(c, "block_10x1000_levenshtein", BaseMetric::Levenshtein, LinkMultiplicity::Many);
}

fn bench_jaro_winkler(c: &mut Criterion) {
    bench_block(c, "block_10x1000_jaro_winkler", BaseMetric::JaroWinkler, LinkMultiplicity::Many);
}

fn bench_single_link(c: &mut Criterion) {
    bench_block(c, "block_10x1000_single_link", BaseMetric::Levenshtein, LinkMultiplicity::Single);
}

criterion_group!(benches, bench_levenshtein, bench_jaro_winkler, bench_single_link);
criterion_main!(benches);
