//! Simulator benchmarks.
//!
//! Measures plan generation and small zero-latency runs per backend, which
//! bounds the overhead the harness adds on top of store round trips.
//!
//! Example: cargo bench --bench simulator

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dualbench_core::{
    BackendOptions, BackendVariant, FixtureSpec, MemoryConfig, MemoryConnector, MixRatio,
    PlanPolicy, RunSpec, Simulator, SimulatorConfig, WorkloadGenerator, WorkloadKind,
};

fn bench_generate(c: &mut Criterion) {
    let mut group = c.benchmark_group("workload/generate");
    let generator = WorkloadGenerator::new(FixtureSpec::default(), MixRatio::default());

    for kind in WorkloadKind::ALL {
        group.bench_with_input(BenchmarkId::new(kind.as_str(), 1000), &kind, |b, &kind| {
            b.iter(|| {
                let plan = generator.generate(kind, 1000, black_box(42));
                black_box(plan.len());
            });
        });
    }

    group.bench_function("replicate_5_clients", |b| {
        b.iter(|| {
            let plans = generator.plans_for_clients(
                WorkloadKind::Mixed,
                1000,
                5,
                black_box(42),
                PlanPolicy::Replicate,
            );
            black_box(plans.len());
        });
    });

    group.finish();
}

fn bench_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("simulator/run");
    group.sample_size(20);

    let fixture = FixtureSpec::new(200, 200);
    let store = Arc::new(MemoryConnector::new(
        MemoryConfig::new(fixture).with_io_latency(Duration::ZERO),
    ));
    let options = BackendOptions::default().with_pool_size(4).with_workers(4);
    let simulator = Simulator::new(store, SimulatorConfig::default().with_options(options));
    let generator = WorkloadGenerator::new(fixture, MixRatio::default());

    for variant in BackendVariant::ALL {
        for concurrency in [1, 4] {
            let spec = RunSpec::new(WorkloadKind::Standard, 200, concurrency);
            group.bench_with_input(
                BenchmarkId::new(variant.as_str(), concurrency),
                &spec,
                |b, spec| {
                    b.iter(|| {
                        let result = simulator.run(variant, spec, &generator);
                        black_box(result.successful);
                    });
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_generate, bench_run);
criterion_main!(benches);
