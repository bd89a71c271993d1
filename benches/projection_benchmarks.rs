//! Contingency table projection benchmarks: sort, merge and marginalize.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ra_engine::{ContingencyTable, Key, VariableList, VariableSpec};
use std::time::Duration;

fn make_variables(n: usize) -> VariableList {
    let specs = (0..n)
        .map(|i| {
            let abbrev = char::from_u32('A' as u32 + i as u32).unwrap();
            VariableSpec::new(format!("V{i}"), abbrev, 4)
        })
        .collect();
    VariableList::new(specs).expect("variables")
}

fn make_table(vl: &VariableList) -> ContingencyTable {
    let total = vl.state_space();
    let mut table = ContingencyTable::new(vl.key_size());
    for idx in 0..total {
        let mut rem = idx;
        let mut pairs = Vec::with_capacity(vl.len());
        for (i, v) in vl.variables().iter().enumerate() {
            let card = u64::from(v.cardinality());
            let val = (rem % card) as u32;
            rem /= card;
            pairs.push((i, val));
        }
        let key = vl.build_key(&pairs).expect("key");
        table.add(key, 1.0).expect("add");
    }
    table.sort();
    table.merge().expect("merge");
    table
}

fn bench_project(c: &mut Criterion) {
    let mut group = c.benchmark_group("project");
    for n in [4usize, 6, 8] {
        let vl = make_variables(n);
        let table = make_table(&vl);
        let subset: Vec<usize> = (0..n / 2).collect();

        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| table.project(&vl, &subset).expect("project"));
        });
    }
    group.finish();
}

fn bench_sort_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("sort_merge");
    for n in [4usize, 6, 8] {
        let vl = make_variables(n);

        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter_batched(
                || {
                    let mut t = make_table(&vl);
                    t.sort();
                    t.merge().expect("merge");
                    let unsorted: Vec<_> = t.entries().iter().rev().cloned().collect();
                    ContingencyTable::from_entries(vl.key_size(), unsorted)
                },
                |mut t| {
                    t.sort();
                    t.merge().expect("merge");
                    t
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_or_mask(c: &mut Criterion) {
    let vl = make_variables(8);
    let mask = vl.build_mask(&[0, 1, 2]).expect("mask");
    let key = vl.build_key(&[(0, 1), (1, 2), (2, 3), (3, 0)]).expect("key");

    c.bench_function("key_or_mask", |b| {
        b.iter(|| key.or(&mask).expect("or"));
    });
    let _ = Key::wildcard(key.key_size());
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(10))
        .warm_up_time(Duration::from_secs(3));
    targets = bench_project, bench_sort_merge, bench_or_mask
}
criterion_main!(benches);
