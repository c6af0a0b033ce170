//! Metric instrument factories for workq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"workq"` meter; without a
//! registered provider they are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for workq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("workq")
}

/// Counter: items offered to a worker.
/// Labels: `result` ("queued" | "dropped" | "rejected").
pub fn items_pushed() -> Counter<u64> {
    meter()
        .u64_counter("workq.items.pushed")
        .with_description("Number of work items pushed to a worker")
        .build()
}

/// Counter: items the worker loop finished with.
/// Labels: `outcome` ("ok" | "skipped" | "fault").
pub fn items_executed() -> Counter<u64> {
    meter()
        .u64_counter("workq.items.executed")
        .with_description("Number of work items taken off the queue and run")
        .build()
}

/// Counter: faults no error subscriber marked handled.
pub fn unhandled_faults() -> Counter<u64> {
    meter()
        .u64_counter("workq.faults.unhandled")
        .with_description("Work item faults left unhandled by subscribers")
        .build()
}

/// Counter: worker loops that stopped.
/// Labels: `reason`.
pub fn workers_canceled() -> Counter<u64> {
    meter()
        .u64_counter("workq.workers.canceled")
        .with_description("Number of worker loops that stopped")
        .build()
}

/// Histogram: time spent in a work item's action, in milliseconds.
pub fn execute_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("workq.execute.duration_ms")
        .with_description("Work item execution duration in milliseconds")
        .with_unit("ms")
        .build()
}
