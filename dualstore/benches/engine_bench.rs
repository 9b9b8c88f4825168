//! Benchmarks for statement rendering, checks, and document merging.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dualstore::collaborators::DocumentMerger;
use dualstore::entities::Datafile;
use dualstore::entity::{Direction, Probe};
use dualstore::pipeline::Check;
use serde_json::json;

fn probe_benchmark(c: &mut Criterion) {
    c.bench_function("probe_select_statement", |b| {
        b.iter(|| {
            let probe = Probe::<Datafile>::new()
                .eq("datasetID", black_box(7_i64))
                .eq("labelID", black_box(2_i64))
                .order_by("datafileID", Direction::Desc)
                .offset(20)
                .limit(20);
            black_box(probe.select_statement())
        });
    });
}

fn check_benchmark(c: &mut Criterion) {
    let check = Check::all(vec![Check::int(), Check::range(1.0, 100.0)]);
    c.bench_function("check_int_range", |b| {
        b.iter(|| black_box(check.test(&json!(black_box(42)))));
    });
}

fn merge_benchmark(c: &mut Criterion) {
    let layers: Vec<_> = (0..16)
        .map(|i| {
            json!({
                format!("layer{i}"): { "units": i, "activation": "relu" },
                "epochs": i,
                "annotations": { format!("layer{i}"): { "use": ["base"] } }
            })
        })
        .collect();
    let templates = json!({
        "base": { "dropout": 0.1 },
        "annotations": { "base": { "template": true } }
    });

    c.bench_function("merge_sixteen_layers", |b| {
        b.iter(|| {
            let mut merger = DocumentMerger::new();
            merger.merge(&templates);
            for layer in &layers {
                merger.merge(black_box(layer));
            }
            black_box(merger.into_document())
        });
    });
}

criterion_group!(benches, probe_benchmark, check_benchmark, merge_benchmark);
criterion_main!(benches);
