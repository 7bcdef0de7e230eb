use criterion::{criterion_group, criterion_main, Criterion};

use tracelet::trace::{NeverSample, Tracer};

fn span_lifecycle(c: &mut Criterion) {
    let unsampled = Tracer::builder().with_sampler(NeverSample).build();
    c.bench_function("start_end_unsampled", |b| {
        b.iter(|| {
            let span = unsampled.span_builder("bench").start();
            let _ = span.end();
        })
    });

    let sampled = Tracer::builder().build();
    c.bench_function("start_annotate_end_sampled", |b| {
        b.iter(|| {
            let span = sampled.span_builder("bench").start();
            let _ = span.add_annotation("step");
            let _ = span.end();
        })
    });

    c.bench_function("scoped_span", |b| {
        b.iter(|| {
            let scope = sampled.span_builder("bench").start_scoped();
            let _ = scope.span().add_annotation("step");
        })
    });
}

criterion_group!(benches, span_lifecycle);
criterion_main!(benches);
