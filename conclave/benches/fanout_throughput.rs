//! Benchmarks for the fan-out coordinator: one round over a growing number
//! of workers, each answering immediately.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use conclave::progress::analysis_stages::WORKERS;
use conclave::{
    AnalysisContext, ConclaveConfig, EngineBuilder, FanOutCoordinator, JobKind, WorkerRegistry,
};
use conclave_testkit::StaticWorker;
use serde_json::json;
use tokio::runtime::Runtime;

fn create_runtime() -> Runtime {
    Runtime::new().expect("Failed to create tokio runtime")
}

fn registry(size: usize) -> WorkerRegistry {
    let mut registry = WorkerRegistry::new();
    for i in 0..size {
        registry
            .register(
                format!("worker-{i}"),
                Arc::new(StaticWorker::new(json!({ "worker": i }))),
            )
            .expect("worker ids are unique");
    }
    registry
}

fn bench_fanout_round(c: &mut Criterion) {
    let rt = create_runtime();

    let worker_counts = vec![1usize, 4, 16, 64];

    let mut group = c.benchmark_group("fanout_round");
    group.sample_size(50);
    group.measurement_time(Duration::from_secs(10));

    for count in &worker_counts {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::new("static", count), count, |b, &size| {
            let engine = EngineBuilder::new(ConclaveConfig::default())
                .build()
                .expect("engine should build");
            let lifecycle = Arc::clone(engine.lifecycle());
            let workers = registry(size).all();
            let coordinator = FanOutCoordinator::with_timeout(Duration::from_secs(5));
            let context = Arc::new(AnalysisContext::new("bench query"));

            b.to_async(&rt).iter(|| async {
                let job_id = lifecycle
                    .create(JobKind::MultiWorkerAnalysis)
                    .await
                    .expect("create should succeed");
                let reporter = lifecycle.reporter(job_id, JobKind::MultiWorkerAnalysis);
                let tasks = coordinator
                    .run_stage(&reporter, WORKERS, &workers, Arc::clone(&context), None)
                    .await;
                assert_eq!(tasks.len(), size);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fanout_round);
criterion_main!(benches);
