//! Criterion benchmarks for the snake simulation.
//!
//! Run with:
//!   cargo bench
//!   cargo bench --features parallel
//!
//! Results are saved to target/criterion/

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use serpent::prng::Prng;
use serpent::snake::{Action, GameMode, SnakeConfig, SnakeSim};
use serpent::vec_env::VecEnv;

/// Benchmark step() with varying grid sizes.
fn bench_step_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("step_grid");

    for size in [6usize, 10, 20, 40].iter() {
        group.throughput(Throughput::Elements(1));

        group.bench_with_input(BenchmarkId::new("obstacles", size), size, |b, &size| {
            let cfg = SnakeConfig::with_grid_size(size).with_mode(GameMode::Obstacles);
            let mut sim = SnakeSim::new(cfg, 42).expect("valid config");
            let mut pick = Prng::new(7);

            b.iter(|| {
                let r = sim.step(Action::ALL[pick.index(4)]);
                if r.done() {
                    sim.reset(None);
                }
                black_box(r.reward)
            });
        });
    }

    group.finish();
}

/// Benchmark a vector step across env counts.
fn bench_vec_env(c: &mut Criterion) {
    let mut group = c.benchmark_group("vec_env");

    for n in [1usize, 4, 16].iter() {
        group.throughput(Throughput::Elements(*n as u64));

        group.bench_with_input(BenchmarkId::new("step", n), n, |b, &n| {
            let mut envs = VecEnv::new(n, SnakeConfig::with_grid_size(10), 3).expect("valid config");
            let mut pick = Prng::new(11);
            let mut actions = vec![Action::Up; n];

            b.iter(|| {
                for a in actions.iter_mut() {
                    *a = Action::ALL[pick.index(4)];
                }
                let out = envs.step(&actions).expect("matching action count");
                black_box(out.len())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_step_sizes, bench_vec_env);
criterion_main!(benches);
