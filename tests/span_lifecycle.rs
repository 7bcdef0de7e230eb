//! End-to-end scenarios across the tracer, context, and export queue.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use tracelet::export::{InMemorySpanExporter, LoggingSpanExporter, QueueConfig, SpanData};
use tracelet::trace::Tracer;

fn tracer_and_exporter() -> (Tracer, InMemorySpanExporter) {
    let exporter = InMemorySpanExporter::default();
    let tracer = Tracer::builder().with_exporter(exporter.clone()).build();
    (tracer, exporter)
}

fn find<'a>(spans: &'a [SpanData], name: &str) -> &'a SpanData {
    spans
        .iter()
        .find(|span| span.name == name)
        .unwrap_or_else(|| panic!("no span named {name}"))
}

#[test]
fn nested_scopes_produce_a_linked_trace() {
    let (tracer, exporter) = tracer_and_exporter();

    {
        let root = tracer.span_builder("Root").start_scoped();
        root.span().add_annotation("root started work").unwrap();
        {
            let child = tracer.span_builder("Child").start_scoped();
            child.span().add_annotation("first step").unwrap();
            child.span().add_annotation("second step").unwrap();
        }
        root.span().add_annotation("root finishing").unwrap();
    }

    tracer.force_flush().unwrap();
    let spans = exporter.get_finished_spans().unwrap();
    assert_eq!(spans.len(), 2);

    let root = find(&spans, "Root");
    let child = find(&spans, "Child");
    assert_eq!(root.parent_span_id, None);
    assert_eq!(
        child.span_context.trace_id(),
        root.span_context.trace_id()
    );
    assert_eq!(child.parent_span_id, Some(root.span_context.span_id()));

    let root_messages: Vec<_> = root
        .annotations
        .iter()
        .map(|a| a.message.as_ref())
        .collect();
    assert_eq!(root_messages, ["root started work", "root finishing"]);
    let child_messages: Vec<_> = child
        .annotations
        .iter()
        .map(|a| a.message.as_ref())
        .collect();
    assert_eq!(child_messages, ["first step", "second step"]);

    // The child closed before the root did.
    assert!(child.end_time <= root.end_time);
}

#[test]
fn threads_do_not_observe_each_others_context() {
    let (tracer, exporter) = tracer_and_exporter();

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let tracer = tracer.clone();
            thread::spawn(move || {
                let scope = tracer
                    .span_builder(format!("worker-{i}"))
                    .start_scoped();
                // The current span on this thread is ours alone.
                assert_eq!(
                    tracer.current_span().span_context(),
                    scope.span().span_context()
                );
                scope.span().span_context().trace_id()
            })
        })
        .collect();

    let trace_ids: HashSet<_> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();
    assert_eq!(trace_ids.len(), 4, "each thread must get its own root");

    // The spawning thread never saw any of them.
    assert!(!tracer.current_span().span_context().is_valid());

    tracer.force_flush().unwrap();
    let spans = exporter.get_finished_spans().unwrap();
    assert_eq!(spans.len(), 4);
    assert!(spans.iter().all(|span| span.parent_span_id.is_none()));
}

#[test]
fn a_panic_still_ends_the_scoped_span() {
    let (tracer, exporter) = tracer_and_exporter();

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let _scope = tracer.span_builder("doomed").start_scoped();
        panic!("something went wrong mid-span");
    }));
    assert!(result.is_err());

    // The scope unwound: nothing is current and the span was exported.
    assert!(!tracer.current_span().span_context().is_valid());
    tracer.force_flush().unwrap();
    let spans = exporter.get_finished_spans().unwrap();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].name, "doomed");
}

#[test]
fn manual_span_activated_with_with_span() {
    let (tracer, exporter) = tracer_and_exporter();

    let span = tracer.span_builder("manual").start();
    {
        let _guard = tracer.with_span(span.clone());
        tracer
            .current_span()
            .add_annotation("annotated through the context")
            .unwrap();
    }
    // Deactivated but not ended; that is still the caller's job.
    assert!(!span.has_ended());
    span.end().unwrap();

    tracer.force_flush().unwrap();
    let spans = exporter.get_finished_spans().unwrap();
    assert_eq!(spans.len(), 1);
    assert_eq!(
        spans[0].annotations[0].message,
        "annotated through the context"
    );
}

#[test]
fn explicit_parent_crosses_threads() {
    let (tracer, exporter) = tracer_and_exporter();

    let root = tracer.span_builder("coordinator").start();
    let worker = {
        let tracer = tracer.clone();
        let root = root.clone();
        thread::spawn(move || {
            let child = tracer
                .span_builder_with_explicit_parent("offloaded", Some(&root))
                .start();
            child.add_annotation("ran elsewhere").unwrap();
            child.end().unwrap();
        })
    };
    worker.join().unwrap();
    root.end().unwrap();

    tracer.force_flush().unwrap();
    let spans = exporter.get_finished_spans().unwrap();
    let root_data = find(&spans, "coordinator");
    let child_data = find(&spans, "offloaded");
    assert_eq!(
        child_data.span_context.trace_id(),
        root_data.span_context.trace_id()
    );
    assert_eq!(
        child_data.parent_span_id,
        Some(root_data.span_context.span_id())
    );
}

#[test]
fn annotating_outside_any_scope_is_harmless() {
    let (tracer, exporter) = tracer_and_exporter();

    let sentinel = tracer.current_span();
    assert!(!sentinel.span_context().is_valid());
    sentinel.add_annotation("goes nowhere").unwrap();
    sentinel.end().unwrap();

    tracer.force_flush().unwrap();
    assert!(exporter.get_finished_spans().unwrap().is_empty());
}

#[test]
fn late_registered_exporter_sees_later_batches() {
    let first = InMemorySpanExporter::default();
    let second = InMemorySpanExporter::default();
    let tracer = Tracer::builder().with_exporter(first.clone()).build();

    tracer.span_builder("before").start().end().unwrap();
    tracer.force_flush().unwrap();

    tracer.register_exporter(second.clone()).unwrap();
    tracer.span_builder("after").start().end().unwrap();
    tracer.force_flush().unwrap();

    assert_eq!(first.get_finished_spans().unwrap().len(), 2);
    let late = second.get_finished_spans().unwrap();
    assert_eq!(late.len(), 1);
    assert_eq!(late[0].name, "after");
}

#[test]
fn shutdown_flushes_and_stops() {
    let (tracer, exporter) = tracer_and_exporter();
    tracer.span_builder("last-words").start().end().unwrap();
    tracer.shutdown().unwrap();
    assert_eq!(exporter.get_finished_spans().unwrap().len(), 1);

    // Spans ended after shutdown disappear quietly.
    tracer.span_builder("too-late").start().end().unwrap();
    assert!(tracer.force_flush().is_err());
    assert_eq!(exporter.get_finished_spans().unwrap().len(), 1);
}

#[test]
fn logging_exporter_accepts_batches() {
    let tracer = Tracer::builder()
        .with_exporter(LoggingSpanExporter::with_service_name("integration"))
        .with_queue_config(QueueConfig::builder().build())
        .build();

    let scope = tracer.span_builder("printed").start_scoped();
    scope.span().add_annotation("visible on stdout").unwrap();
    drop(scope);

    tracer.force_flush().unwrap();
}
