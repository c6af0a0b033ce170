//! The single consumer loop: dequeue, notify, run, repeat until canceled.

use opentelemetry::KeyValue;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Hooks;
use super::handler::{Execution, WorkerHandler};
use crate::error::Fault;
use crate::event::{CancelReason, CanceledEvent, ErrorEvent, ExecuteEvent};
use crate::model::WorkItem;
use crate::telemetry::metrics;
use crate::telemetry::work::{record_outcome, start_work_span};

pub(super) struct WorkerLoop {
    pub(super) rx: mpsc::Receiver<Arc<WorkItem>>,
    pub(super) cancel: CancellationToken,
    pub(super) hooks: Arc<Hooks>,
    pub(super) handler: Box<dyn WorkerHandler>,
    /// Drives only the dequeue wait; items and hooks run outside it so they
    /// may call blocking `push`.
    pub(super) runtime: Runtime,
}

impl WorkerLoop {
    /// Run until the cancellation token fires. This is the only exit.
    pub(super) fn run(mut self) {
        debug!("worker loop started");

        while let Some(item) = self.next_item() {
            self.process(item);
        }

        self.finish(CancelReason::Disposed);
    }

    /// Block for the queue head. `None` once cancellation is observed.
    fn next_item(&mut self) -> Option<Arc<WorkItem>> {
        let rx = &mut self.rx;
        let cancel = &self.cancel;
        self.runtime.block_on(async {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                // `None` means every sender is gone, which only happens on disposal.
                item = rx.recv() => item,
            }
        })
    }

    fn process(&self, item: Arc<WorkItem>) {
        let span = start_work_span(&item.id(), self.rx.len());
        let _enter = span.enter();
        debug!(work.id = %item.id(), "item dequeued");

        let event = ExecuteEvent {
            item: Arc::clone(&item),
        };
        self.hooks.pre_execute.emit(&event);
        guarded("on_pre_execute", || self.handler.on_pre_execute(&item));

        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.handler.execute(Execution::new(&item))
        }))
        .unwrap_or_else(|payload| Err(Fault::from_panic(payload)));
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        item.release_from_queue();

        match outcome {
            Ok(ran) => {
                let label = if ran { "ok" } else { "skipped" };
                record_outcome(&span, label);
                if ran {
                    metrics::execute_duration_ms().record(elapsed_ms, &[]);
                }
                metrics::items_executed().add(1, &[KeyValue::new("outcome", label)]);

                self.hooks.post_execute.emit(&event);
                guarded("on_post_execute", || self.handler.on_post_execute(&item));
            }
            Err(fault) => {
                record_outcome(&span, "fault");
                metrics::execute_duration_ms().record(elapsed_ms, &[]);
                metrics::items_executed().add(1, &[KeyValue::new("outcome", "fault")]);
                debug!(work.id = %item.id(), error = %fault, "work item faulted");

                let event = ErrorEvent::new(Arc::clone(&item), Arc::new(fault));
                self.hooks.error.emit(&event);
                if !event.is_handled() {
                    metrics::unhandled_faults().add(1, &[]);
                    guarded("on_unhandled_error", || {
                        self.handler.on_unhandled_error(&event.fault, &item)
                    });
                }
            }
        }
    }

    /// Close the queue, drop whatever is still in it and emit the canceled notification.
    fn finish(mut self, reason: CancelReason) {
        // Closing wakes producers blocked on a full queue.
        self.rx.close();
        let mut abandoned = 0;
        while let Ok(item) = self.rx.try_recv() {
            item.release_from_queue();
            abandoned += 1;
        }

        info!(%reason, abandoned, "worker loop canceled");
        metrics::workers_canceled().add(1, &[KeyValue::new("reason", reason.to_string())]);

        let event = CanceledEvent { reason, abandoned };
        self.hooks.canceled.emit(&event);
        guarded("on_canceled", || self.handler.on_canceled(&event));
    }
}

/// Run a handler method, logging instead of unwinding the worker thread.
fn guarded(hook: &'static str, f: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!(hook, "worker handler panicked");
    }
}
