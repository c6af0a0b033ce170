//! Work execution span helpers.
//!
//! Provides span creation and outcome recording for items run by the
//! worker thread.

use tracing::Span;

use crate::model::WorkId;

/// Start a span for one item's pass through the worker loop.
///
/// The `work.outcome` field is declared empty and filled in by
/// [`record_outcome`].
pub fn start_work_span(work_id: &WorkId, queue_depth: usize) -> Span {
    tracing::info_span!(
        "work.execute",
        "work.id" = %work_id,
        "work.queue_depth" = queue_depth,
        "work.outcome" = tracing::field::Empty,
    )
}

/// Record how the item finished ("ok", "skipped" or "fault").
pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("work.outcome", outcome);
    span.in_scope(|| {
        tracing::debug!(outcome = outcome, "work item finished");
    });
}
