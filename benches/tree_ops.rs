//! Benchmarks for tree walks and mutations.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ssrle_tree::{IndexedTree, StreamKind, TreeConfig};

/// Runs of random length so blocks mix literal and repeated runs.
fn generate_symbols(n: usize, seed: u64) -> Vec<(u64, u8)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = Vec::new();
    let mut total = 0usize;
    while total < n {
        let len = if rng.gen_bool(0.7) { rng.gen_range(1..4) } else { rng.gen_range(8..200) };
        let len = len.min(n - total);
        out.push((len as u64, rng.gen_range(0..2u8)));
        total += len;
    }
    out
}

fn build(runs: &[(u64, u8)]) -> IndexedTree {
    let mut tree = IndexedTree::new(vec![StreamKind::Symbols], TreeConfig::default()).unwrap();
    let mut pos = 0;
    for &(len, symbol) in runs {
        tree.insert_symbols(0, pos, len, symbol).unwrap();
        pos += len;
    }
    tree
}

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("append");

    for size in [10_000, 100_000] {
        let runs = generate_symbols(size, 1);
        group.bench_with_input(BenchmarkId::new("IndexedTree", size), &runs, |b, runs| {
            b.iter(|| black_box(build(runs)));
        });
    }

    group.finish();
}

fn bench_random_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("random_insert");

    for size in [10_000, 100_000] {
        let runs = generate_symbols(size, 2);
        let base = build(&runs);
        let total = base.size(0).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let edits: Vec<(u64, u8)> = (0..1_000).map(|_| (rng.gen_range(0..=total), rng.gen_range(0..2u8))).collect();

        group.bench_with_input(BenchmarkId::new("IndexedTree", size), &edits, |b, edits| {
            b.iter(|| {
                let mut tree = build(&runs);
                for &(pos, symbol) in edits {
                    tree.insert_symbols(0, pos, 1, symbol).unwrap();
                }
                black_box(tree.size(0).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_rank_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("rank_select");
    let tree = build(&generate_symbols(100_000, 4));
    let total = tree.size(0).unwrap();
    let ones = tree.rank(0, total, 1).unwrap();

    group.bench_function("rank", |b| {
        b.iter(|| {
            let mut sum = 0u64;
            for pos in (0..total).step_by(97) {
                sum += tree.rank(0, pos, 1).unwrap();
            }
            black_box(sum)
        })
    });

    group.bench_function("select", |b| {
        b.iter(|| {
            let mut sum = 0u64;
            for rank in (0..ones).step_by(97) {
                if let Some(cursor) = tree.select_forward(0, rank, 1).unwrap() {
                    sum += cursor.pos();
                }
            }
            black_box(sum)
        })
    });

    group.bench_function("skip", |b| {
        b.iter(|| {
            let mut cursor = tree.seek(0, 0).unwrap();
            while cursor.pos() + 131 < total {
                cursor = tree.skip_forward(&cursor, 131).unwrap();
            }
            black_box(cursor.pos())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_append, bench_random_insert, bench_rank_select);
criterion_main!(benches);
