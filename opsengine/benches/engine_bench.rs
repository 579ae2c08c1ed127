//! Benchmarks for staged pipeline execution.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;

use opsengine::events::NoOpEventPublisher;
use opsengine::operation::Operation;
use opsengine::queue::Executor;
use opsengine::staged::StagedManager;
use opsengine::storage::{InMemoryOperationStorage, OperationStorage};
use opsengine::testing::{StepLog, TrackingStep};

fn two_stage_manager(
    storage: Arc<InMemoryOperationStorage<Operation>>,
) -> StagedManager {
    let log: StepLog = Arc::new(parking_lot::Mutex::new(Vec::new()));
    StagedManager::builder("bench", storage, Arc::new(NoOpEventPublisher))
        .stage("stage-1")
        .step(Arc::new(TrackingStep::new("first", log.clone())))
        .step(Arc::new(TrackingStep::new("second", log.clone())))
        .stage("stage-2")
        .step(Arc::new(TrackingStep::new("third", log)))
        .build()
        .expect("valid pipeline")
}

fn engine_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");

    let storage = Arc::new(InMemoryOperationStorage::new());
    let manager = two_stage_manager(storage.clone());

    c.bench_function("execute_fresh_operation", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let operation = Operation::new("bench-instance");
                storage.insert(operation.clone()).await.expect("insert");
                let delay = manager.execute(&operation.id).await.expect("execute");
                black_box(delay)
            })
        })
    });
}

criterion_group!(benches, engine_benchmark);
criterion_main!(benches);
