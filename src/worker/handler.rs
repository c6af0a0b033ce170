//! Extension points invoked by the worker loop after the public subscribers.

use std::sync::Arc;
use tracing::error;

use crate::error::Fault;
use crate::event::CanceledEvent;
use crate::model::WorkItem;

/// One pending run of a dequeued item, handed to [`WorkerHandler::execute`].
///
/// Only the worker loop creates these. Calling [`run`](Self::run) consumes
/// it, so a handler runs the item at most once.
#[derive(Debug)]
pub struct Execution<'a> {
    item: &'a Arc<WorkItem>,
}

impl<'a> Execution<'a> {
    pub(crate) fn new(item: &'a Arc<WorkItem>) -> Self {
        Self { item }
    }

    pub fn item(&self) -> &'a Arc<WorkItem> {
        self.item
    }

    /// Run the item's action unless cancellation was requested.
    ///
    /// Returns whether the action ran. A successful or skipped run marks the
    /// item executed; a fault leaves it unexecuted and is returned as is.
    pub fn run(self) -> Result<bool, Fault> {
        self.item.run()
    }
}

/// Per-worker extension point.
///
/// Each method runs on the worker thread, after the subscribers of the
/// matching notification. Every method has a default, so an embedder
/// overrides only what it needs. Heavy work here stalls the queue.
pub trait WorkerHandler: Send + Sync {
    /// Called before an item's action runs.
    fn on_pre_execute(&self, _item: &Arc<WorkItem>) {}

    /// Runs a dequeued item, between the pre-execute and post-execute
    /// notifications.
    ///
    /// The default calls [`Execution::run`]. An override may wrap it or
    /// replace it; an item whose execution is never run stays unexecuted.
    /// An `Err` is reported through the error notification.
    fn execute(&self, execution: Execution<'_>) -> Result<bool, Fault> {
        execution.run()
    }

    /// Called after an item's action returned without a fault.
    fn on_post_execute(&self, _item: &Arc<WorkItem>) {}

    /// Called once, when the loop stops.
    fn on_canceled(&self, _event: &CanceledEvent) {}

    /// Called when an item faulted and no error subscriber marked it handled.
    ///
    /// The default logs the fault at error level. The loop moves on to the
    /// next item whatever this method does; a panic here is caught and logged.
    fn on_unhandled_error(&self, fault: &Arc<Fault>, item: &Arc<WorkItem>) {
        error!(work.id = %item.id(), error = %fault, "unhandled work item fault");
    }
}

/// Handler with every default behaviour.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHandler;

impl WorkerHandler for DefaultHandler {}
