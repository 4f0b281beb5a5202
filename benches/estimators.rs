//! Estimator throughput on cheap closed-form games.
//!
//! With a free characteristic function the numbers isolate the engine's own
//! overhead: permutation walks, subset enumeration, surrogate fits.

use contributivity::testing::VotingGame;
use contributivity::{
    AccuracyParams, ContributivityMethod, EstimationLogger, ExactShapley,
    LinearImportanceSampling, Scenario, Session, StratifiedMC, TruncatedMC,
};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn game(n: usize) -> VotingGame {
    let weights: Vec<f64> = (0..n).map(|p| (p + 1) as f64).collect();
    let quota: f64 = weights.iter().sum::<f64>() * 0.6;
    VotingGame::new(weights, quota)
}

fn scenario(n: usize) -> Scenario {
    let sizes: Vec<usize> = (0..n).map(|p| 100 * (p + 1)).collect();
    Scenario::from_train_sizes(&sizes).unwrap()
}

fn bench_exact(c: &mut Criterion) {
    let mut group = c.benchmark_group("exact");
    for n in [4usize, 8, 12] {
        let scenario = scenario(n);
        group.bench_with_input(BenchmarkId::new("enumerate", n), &n, |b, &n| {
            b.iter(|| {
                let mut session = Session::new(&scenario, game(n));
                black_box(
                    ExactShapley
                        .estimate(&mut session, 0, &EstimationLogger::silent())
                        .unwrap(),
                )
            })
        });
    }
    group.finish();
}

fn bench_sampling(c: &mut Criterion) {
    let mut group = c.benchmark_group("sampling");
    let accuracy = AccuracyParams::new(0.05, 0.9).with_max_iterations(2_000);

    for n in [5usize, 10] {
        let scenario = scenario(n);
        group.bench_with_input(BenchmarkId::new("tmc", n), &n, |b, &n| {
            b.iter(|| {
                let mut session = Session::new(&scenario, game(n));
                black_box(
                    TruncatedMC::new(accuracy, 0.05)
                        .estimate(&mut session, 42, &EstimationLogger::silent())
                        .unwrap(),
                )
            })
        });
        group.bench_with_input(BenchmarkId::new("stratified", n), &n, |b, &n| {
            b.iter(|| {
                let mut session = Session::new(&scenario, game(n));
                black_box(
                    StratifiedMC::new(accuracy)
                        .estimate(&mut session, 42, &EstimationLogger::silent())
                        .unwrap(),
                )
            })
        });
    }

    // The importance-sampling draw enumerates the complement's subsets; keep
    // n small enough for a bench iteration to stay cheap.
    for n in [5usize, 8] {
        let scenario = scenario(n);
        group.bench_with_input(BenchmarkId::new("linear_is", n), &n, |b, &n| {
            b.iter(|| {
                let mut session = Session::new(&scenario, game(n));
                black_box(
                    LinearImportanceSampling::new(accuracy)
                        .estimate(&mut session, 42, &EstimationLogger::silent())
                        .unwrap(),
                )
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_exact, bench_sampling);
criterion_main!(benches);
