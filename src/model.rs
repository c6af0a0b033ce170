//! Core data model.
//!
//! A work item is one unit of work handed to a [`Worker`](crate::worker::Worker):
//! an immutable argument, the action that does the work, and the execution
//! state the worker advances exactly once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Error, Fault, Result};

/// An opaque value carried by a work item. The holder never checks its type;
/// readers reinterpret it with [`WorkItem::argument`] and [`WorkItem::result`].
pub type Opaque = Box<dyn Any + Send + Sync>;

// ---------------------------------------------------------------------------
// Work ID
// ---------------------------------------------------------------------------

/// Newtype for work item IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkId(pub Uuid);

impl WorkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for WorkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl Default for WorkId {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

/// The body of work executed for an item.
///
/// Called on the worker thread with the owning item as context, so the
/// implementation can read the argument and write the result. Returning an
/// error (or panicking) is reported through the worker's error notification.
pub trait Consumer: Send + Sync {
    fn execute(&self, item: &WorkItem) -> anyhow::Result<()>;
}

/// Adapter for actions that ignore the item.
struct FnConsumer<F>(F);

impl<F> Consumer for FnConsumer<F>
where
    F: Fn() -> anyhow::Result<()> + Send + Sync,
{
    fn execute(&self, _item: &WorkItem) -> anyhow::Result<()> {
        (self.0)()
    }
}

/// Adapter for actions that read or write the item.
struct ItemFnConsumer<F>(F);

impl<F> Consumer for ItemFnConsumer<F>
where
    F: Fn(&WorkItem) -> anyhow::Result<()> + Send + Sync,
{
    fn execute(&self, item: &WorkItem) -> anyhow::Result<()> {
        (self.0)(item)
    }
}

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// A unit of work pushed to a worker.
///
/// Created through one of the `from_*` factories, which hand back an
/// `Arc<WorkItem>` so the producer keeps a handle for reading the result
/// after the worker has executed the item.
pub struct WorkItem {
    id: WorkId,
    created_at: DateTime<Utc>,
    argument: Option<Opaque>,
    result: Mutex<Option<Opaque>>,
    consumer: Box<dyn Consumer>,
    cancel_requested: AtomicBool,
    /// Set while the item sits in a worker queue.
    queued: AtomicBool,
    executed: Mutex<bool>,
    executed_cv: Condvar,
}

impl WorkItem {
    fn new(argument: Option<Opaque>, consumer: Box<dyn Consumer>) -> Arc<Self> {
        Arc::new(Self {
            id: WorkId::new(),
            created_at: Utc::now(),
            argument,
            result: Mutex::new(None),
            consumer,
            cancel_requested: AtomicBool::new(false),
            queued: AtomicBool::new(false),
            executed: Mutex::new(false),
            executed_cv: Condvar::new(),
        })
    }

    /// Create an item whose action takes no arguments.
    pub fn from_fn<F>(action: F) -> Arc<Self>
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::new(None, Box::new(FnConsumer(action)))
    }

    /// Create an item with an argument whose action ignores the item.
    pub fn from_fn_with<A, F>(argument: A, action: F) -> Arc<Self>
    where
        A: Any + Send + Sync,
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::new(Some(Box::new(argument)), Box::new(FnConsumer(action)))
    }

    /// Create an item whose action receives the item itself.
    pub fn from_item_fn<F>(action: F) -> Arc<Self>
    where
        F: Fn(&WorkItem) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::new(None, Box::new(ItemFnConsumer(action)))
    }

    /// Create an item with an argument whose action receives the item itself.
    pub fn from_item_fn_with<A, F>(argument: A, action: F) -> Arc<Self>
    where
        A: Any + Send + Sync,
        F: Fn(&WorkItem) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::new(Some(Box::new(argument)), Box::new(ItemFnConsumer(action)))
    }

    /// Create an item executed by a [`Consumer`] implementation.
    pub fn from_consumer<C>(consumer: C) -> Arc<Self>
    where
        C: Consumer + 'static,
    {
        Self::new(None, Box::new(consumer))
    }

    /// Create an item with an argument executed by a [`Consumer`] implementation.
    pub fn from_consumer_with<A, C>(argument: A, consumer: C) -> Arc<Self>
    where
        A: Any + Send + Sync,
        C: Consumer + 'static,
    {
        Self::new(Some(Box::new(argument)), Box::new(consumer))
    }

    pub fn id(&self) -> WorkId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The argument reinterpreted as `T`.
    ///
    /// The caller is responsible for asking for the type the item was created
    /// with. `None` means there is no argument or the type does not match.
    pub fn argument<T: Any>(&self) -> Option<&T> {
        self.argument.as_ref()?.downcast_ref::<T>()
    }

    pub fn has_argument(&self) -> bool {
        self.argument.is_some()
    }

    /// A copy of the result reinterpreted as `T`.
    ///
    /// Same contract as [`argument`](Self::argument): `None` if no result was
    /// written or it is not a `T`.
    pub fn result<T: Any + Clone>(&self) -> Option<T> {
        self.lock_result().as_ref()?.downcast_ref::<T>().cloned()
    }

    /// Move the result out of the item. A result of another type is left in place.
    pub fn take_result<T: Any>(&self) -> Option<T> {
        let mut slot = self.lock_result();
        if !slot.as_ref().is_some_and(|v| v.is::<T>()) {
            return None;
        }
        slot.take()?.downcast::<T>().ok().map(|v| *v)
    }

    pub fn has_result(&self) -> bool {
        self.lock_result().is_some()
    }

    /// Store the result. Meant to be called by the action while it runs.
    pub fn set_result<T: Any + Send + Sync>(&self, value: T) {
        *self.lock_result() = Some(Box::new(value));
    }

    /// Ask the worker to skip this item's action.
    ///
    /// Only effective if set before the worker inspects the item; the flag is
    /// read once, immediately before execution.
    pub fn cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Whether the worker has finished with this item (action succeeded or was skipped).
    pub fn is_executed(&self) -> bool {
        *self.lock_executed()
    }

    /// Block until the worker has finished with this item or `timeout` elapses.
    ///
    /// Returns whether the item was executed. An item whose action faulted
    /// stays unexecuted, so this times out unless it is pushed again and
    /// succeeds.
    pub fn wait_executed(&self, timeout: Duration) -> bool {
        let guard = self.lock_executed();
        let (guard, _) = self
            .executed_cv
            .wait_timeout_while(guard, timeout, |done| !*done)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }

    /// Run the action unless cancellation was requested.
    ///
    /// Returns whether the action ran. The item is marked executed when the
    /// action succeeds or is skipped. A fault is handed back unmodified and
    /// leaves the item unexecuted, so an error subscriber may push it again.
    /// An item that is already executed is never run a second time.
    pub(crate) fn run(&self) -> std::result::Result<bool, Fault> {
        if self.is_executed() {
            return Ok(false);
        }
        if self.is_cancel_requested() {
            self.mark_executed();
            return Ok(false);
        }
        match panic::catch_unwind(AssertUnwindSafe(|| self.consumer.execute(self))) {
            Ok(Ok(())) => {
                self.mark_executed();
                Ok(true)
            }
            Ok(Err(e)) => Err(Fault::Failed(e)),
            Err(payload) => Err(Fault::from_panic(payload)),
        }
    }

    /// Reserve the item for a queue. Rejects items already queued or executed.
    ///
    /// The claim is taken before the executed check: the worker marks an item
    /// executed before releasing it, so a claim that wins after the release
    /// always sees the executed flag.
    pub(crate) fn claim_for_queue(&self) -> Result<()> {
        self.queued
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| Error::InvalidItem {
                id: self.id,
                reason: "item is already queued",
            })?;
        if self.is_executed() {
            self.release_from_queue();
            return Err(Error::InvalidItem {
                id: self.id,
                reason: "item was already executed",
            });
        }
        Ok(())
    }

    /// Undo [`claim_for_queue`](Self::claim_for_queue) when the item never made it
    /// into the queue, or once the worker has dequeued it.
    pub(crate) fn release_from_queue(&self) {
        self.queued.store(false, Ordering::SeqCst);
    }

    fn mark_executed(&self) {
        let mut executed = self.lock_executed();
        *executed = true;
        self.executed_cv.notify_all();
    }

    fn lock_result(&self) -> MutexGuard<'_, Option<Opaque>> {
        self.result.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_executed(&self) -> MutexGuard<'_, bool> {
        self.executed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItem")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("has_argument", &self.has_argument())
            .field("cancel_requested", &self.is_cancel_requested())
            .field("executed", &self.is_executed())
            .finish_non_exhaustive()
    }
}
