use criterion::{Criterion, criterion_group, criterion_main};
use futures::stream;
use pipeline_common::{LinkOptions, Pipeline, PipelineContext, StageConfig};
use std::hint::black_box;

const NUM_ITEMS: u64 = 20_000;

async fn run_chain(preserve_order: bool) {
    let mut pipeline = Pipeline::new(PipelineContext::arc_new(Default::default()));
    let sink = pipeline
        .add_sink("sink", StageConfig::new().bounded(64), |n: u64| async move {
            black_box(n);
            Ok::<_, std::io::Error>(())
        })
        .unwrap();
    let link = pipeline.link(sink, LinkOptions::propagate());
    let head = pipeline
        .add_stage(
            "square",
            StageConfig::new()
                .max_parallelism(8)
                .bounded(64)
                .preserve_order(preserve_order),
            |n: u64| async move { Ok::<_, std::io::Error>(n.wrapping_mul(n)) },
            link,
        )
        .unwrap();

    let source = stream::iter((0..NUM_ITEMS).map(Ok::<_, std::io::Error>));
    pipeline.run(head, source).await.unwrap();
}

fn stage_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("stage_unordered", |b| {
        b.to_async(&rt).iter(|| run_chain(false))
    });
    c.bench_function("stage_ordered", |b| {
        b.to_async(&rt).iter(|| run_chain(true))
    });
}

criterion_group!(benches, stage_benchmark);
criterion_main!(benches);
