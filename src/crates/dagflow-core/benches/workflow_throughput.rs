use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dagflow_core::config::{TaskConfig, WorkflowConfig};
use dagflow_core::task::Work;
use dagflow_core::workflow::Workflow;
use serde_json::json;
use std::sync::Arc;

fn chain_work() -> Work {
    Arc::new(|deps| {
        Box::pin(async move {
            let n = deps.first().and_then(|v| v.as_i64()).unwrap_or(0);
            Ok(json!(n + 1))
        })
    })
}

async fn run_chain(len: usize, max_concurrent: usize) {
    let wf = Workflow::new(WorkflowConfig::with_max_concurrent(max_concurrent));
    let mut prev = None;
    for _ in 0..len {
        let config = match &prev {
            Some(id) => TaskConfig::relying_on(vec![id.clone().into()]),
            None => TaskConfig::default(),
        };
        let task = wf.add(chain_work(), config).unwrap();
        prev = Some(task.id().to_string());
    }
    wf.process().await;
}

fn bench_chain_throughput(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("workflow_chain");
    for len in [10usize, 100, 500] {
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, &len| {
            b.to_async(&rt).iter(|| run_chain(black_box(len), black_box(8)));
        });
    }
    group.finish();
}

fn bench_concurrency_scaling(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("workflow_concurrency");
    for max_concurrent in [1usize, 4, 16] {
        group.bench_with_input(
            BenchmarkId::from_parameter(max_concurrent),
            &max_concurrent,
            |b, &max_concurrent| {
                b.to_async(&rt)
                    .iter(|| run_chain(black_box(200), black_box(max_concurrent)));
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_chain_throughput, bench_concurrency_scaling);
criterion_main!(benches);
