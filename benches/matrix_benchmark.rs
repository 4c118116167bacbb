use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use crossgen::config::SignificanceConfig;
use crossgen::matrix::{NormalizedSet, build_all};
use crossgen::score::{ScoreEntry, ScoreTable};
use crossgen::stats::SignificanceTester;
use crossgen::types::{Grid, MetricKind, Value};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SPLITS: u32 = 10;
const MODELS: usize = 6;

fn random_table(datasets: usize) -> ScoreTable {
    let mut rng = StdRng::seed_from_u64(0x5EED + datasets as u64);
    let names: Vec<String> = (0..datasets).map(|d| format!("D{d}")).collect();
    let models: Vec<String> = (0..MODELS).map(|m| format!("model{m}")).collect();
    let grid = Grid {
        sources: names.clone(),
        targets: names.clone(),
        splits: (0..SPLITS).collect(),
        models: models.clone(),
    };
    let mut entries = Vec::new();
    for run in grid.expected_runs() {
        for metric in [MetricKind::R2, MetricKind::Scc] {
            let value = if rng.gen_bool(0.02) {
                Value::Undefined
            } else {
                Value::Defined(rng.gen_range(-0.2..0.9))
            };
            entries.push(ScoreEntry {
                run: run.clone(),
                metric,
                value,
                n_samples: 200,
            });
        }
    }
    match ScoreTable::from_entries(grid, &[MetricKind::R2, MetricKind::Scc], entries) {
        Ok(table) => table,
        Err(e) => panic!("benchmark table is inconsistent: {e}"),
    }
}

fn benchmark_stages(c: &mut Criterion) {
    let sizes = [3_usize, 6, 12];
    let tables: Vec<_> = sizes.iter().map(|&size| (size, random_table(size))).collect();

    let mut group = c.benchmark_group("generalization");
    for (size, table) in tables.iter() {
        let cells = (*size * *size * MODELS) as u64;
        group.throughput(Throughput::Elements(cells));

        group.bench_with_input(BenchmarkId::new("build_and_normalize", size), table, |b, input| {
            b.iter(|| {
                let matrices = build_all(black_box(input));
                black_box(NormalizedSet::from_matrices(&matrices));
            });
        });

        let tester = SignificanceTester::new(&SignificanceConfig::default());
        group.bench_with_input(BenchmarkId::new("significance", size), table, |b, input| {
            b.iter(|| {
                black_box(tester.run(black_box(input)));
            });
        });
    }
    group.finish();
}

criterion_group!(generalization, benchmark_stages);
criterion_main!(generalization);
