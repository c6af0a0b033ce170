//! The producer-consumer worker.
//!
//! A [`Worker`] owns a bounded FIFO queue and exactly one background thread
//! that drains it. Producers on any thread call [`Worker::push`]; the worker
//! thread runs each item in order and reports every step through the
//! lifecycle notifications in [`crate::event`].
//!
//! Items are processed strictly one at a time. An action that never returns
//! stalls the whole queue; there is no per-item timeout.

pub mod handler;
mod run_loop;

pub use handler::{DefaultHandler, Execution, WorkerHandler};

use opentelemetry::KeyValue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendError, TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::event::{CanceledEvent, ErrorEvent, ExecuteEvent, Hook, SubscriptionId};
use crate::model::WorkItem;
use crate::telemetry::metrics;
use run_loop::WorkerLoop;

/// Public notification channels, shared with the worker thread.
pub(crate) struct Hooks {
    pub(crate) pre_execute: Hook<ExecuteEvent>,
    pub(crate) post_execute: Hook<ExecuteEvent>,
    pub(crate) canceled: Hook<CanceledEvent>,
    pub(crate) error: Hook<ErrorEvent>,
}

impl Hooks {
    fn new() -> Self {
        Self {
            pre_execute: Hook::new("pre_execute"),
            post_execute: Hook::new("post_execute"),
            canceled: Hook::new("canceled"),
            error: Hook::new("error"),
        }
    }
}

/// State guarded by the disposal gate.
struct Gate {
    disposed: bool,
    /// Producer side of the queue. Released on disposal.
    sender: Option<mpsc::Sender<Arc<WorkItem>>>,
    loop_handle: Option<JoinHandle<()>>,
}

/// A bounded work queue drained in FIFO order by one background thread.
///
/// Share it between producers with `Arc<Worker>`. Call [`dispose`](Self::dispose)
/// (or drop the last handle) to stop the thread; a worker that is leaked
/// without being dropped keeps its thread alive.
pub struct Worker {
    capacity: usize,
    gate: Mutex<Gate>,
    cancel: CancellationToken,
    hooks: Arc<Hooks>,
    next_subscription: AtomicU64,
}

impl Worker {
    /// Start a worker with the default capacity (4096).
    pub fn new() -> Result<Self> {
        Self::from_config(WorkerConfig::default())
    }

    /// Start a worker whose queue holds at most `capacity` items.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidCapacity`] if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Self::from_config(WorkerConfig::with_capacity(capacity))
    }

    pub fn from_config(config: WorkerConfig) -> Result<Self> {
        Self::with_handler(config, DefaultHandler)
    }

    /// Start a worker whose extension points are provided by `handler`.
    pub fn with_handler<H>(config: WorkerConfig, handler: H) -> Result<Self>
    where
        H: WorkerHandler + 'static,
    {
        config.validate()?;

        let runtime = tokio::runtime::Builder::new_current_thread().build()?;
        let (sender, rx) = mpsc::channel(config.capacity);
        let cancel = CancellationToken::new();
        let hooks = Arc::new(Hooks::new());

        let worker_loop = WorkerLoop {
            rx,
            cancel: cancel.clone(),
            hooks: Arc::clone(&hooks),
            handler: Box::new(handler),
            runtime,
        };
        let loop_handle = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || worker_loop.run())?;

        info!(
            worker.capacity = config.capacity,
            thread = %config.thread_name,
            "worker started"
        );

        Ok(Self {
            capacity: config.capacity,
            gate: Mutex::new(Gate {
                disposed: false,
                sender: Some(sender),
                loop_handle: Some(loop_handle),
            }),
            cancel,
            hooks,
            next_subscription: AtomicU64::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of items queued and not yet taken by the worker thread.
    ///
    /// Advisory only: producers and the worker keep moving after it is read.
    pub fn count(&self) -> usize {
        self.lock_gate()
            .sender
            .as_ref()
            .map_or(0, |tx| tx.max_capacity() - tx.capacity())
    }

    pub fn is_disposed(&self) -> bool {
        self.lock_gate().disposed
    }

    /// Append `item` to the queue, blocking while the queue is full.
    ///
    /// Blocked producers are admitted in the order they arrived. After
    /// disposal the item is silently dropped and `Ok(())` is returned.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidItem`] if the item is already queued or was already executed.
    /// - [`Error::Disposed`] if the worker was disposed while this call was blocked.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context; use
    /// [`push_async`](Self::push_async) there. Calling it from a hook on a
    /// full queue deadlocks, since the worker thread is the only consumer.
    pub fn push(&self, item: Arc<WorkItem>) -> Result<()> {
        let Some(sender) = self.admit(&item)? else {
            return Ok(());
        };
        sender
            .blocking_send(item)
            .map_err(|SendError(item)| Self::reject_closed(&item))?;
        metrics::items_pushed().add(1, &[KeyValue::new("result", "queued")]);
        Ok(())
    }

    /// [`push`](Self::push) for producers running on an async runtime.
    pub async fn push_async(&self, item: Arc<WorkItem>) -> Result<()> {
        let Some(sender) = self.admit(&item)? else {
            return Ok(());
        };
        sender
            .send(item)
            .await
            .map_err(|SendError(item)| Self::reject_closed(&item))?;
        metrics::items_pushed().add(1, &[KeyValue::new("result", "queued")]);
        Ok(())
    }

    /// Append `item` without blocking.
    ///
    /// # Errors
    ///
    /// [`Error::QueueFull`] when the queue is at capacity, otherwise as [`push`](Self::push).
    pub fn try_push(&self, item: Arc<WorkItem>) -> Result<()> {
        let Some(sender) = self.admit(&item)? else {
            return Ok(());
        };
        match sender.try_send(item) {
            Ok(()) => {
                metrics::items_pushed().add(1, &[KeyValue::new("result", "queued")]);
                Ok(())
            }
            Err(TrySendError::Full(item)) => {
                item.release_from_queue();
                Err(Error::QueueFull)
            }
            Err(TrySendError::Closed(item)) => Err(Self::reject_closed(&item)),
        }
    }

    /// Validate the item and hand back a sender, or `None` if the worker is disposed.
    fn admit(&self, item: &WorkItem) -> Result<Option<mpsc::Sender<Arc<WorkItem>>>> {
        if let Err(e) = item.claim_for_queue() {
            metrics::items_pushed().add(1, &[KeyValue::new("result", "rejected")]);
            return Err(e);
        }

        let sender = {
            let gate = self.lock_gate();
            if gate.disposed {
                None
            } else {
                gate.sender.clone()
            }
        };
        if sender.is_none() {
            item.release_from_queue();
            debug!(work.id = %item.id(), "worker disposed, dropping pushed item");
            metrics::items_pushed().add(1, &[KeyValue::new("result", "dropped")]);
        }
        Ok(sender)
    }

    fn reject_closed(item: &WorkItem) -> Error {
        item.release_from_queue();
        debug!(work.id = %item.id(), "worker disposed while push was pending");
        metrics::items_pushed().add(1, &[KeyValue::new("result", "dropped")]);
        Error::Disposed
    }

    // -----------------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------------

    /// Subscribe to the notification fired before each item runs.
    pub fn on_pre_execute<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&ExecuteEvent) + Send + Sync + 'static,
    {
        let id = self.next_subscription_id();
        self.hooks.pre_execute.subscribe(id, Arc::new(f));
        id
    }

    /// Subscribe to the notification fired after an item ran without a fault.
    pub fn on_post_execute<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&ExecuteEvent) + Send + Sync + 'static,
    {
        let id = self.next_subscription_id();
        self.hooks.post_execute.subscribe(id, Arc::new(f));
        id
    }

    /// Subscribe to the notification fired once when the worker loop stops.
    pub fn on_canceled<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&CanceledEvent) + Send + Sync + 'static,
    {
        let id = self.next_subscription_id();
        self.hooks.canceled.subscribe(id, Arc::new(f));
        id
    }

    /// Subscribe to the notification fired when an item's action faults.
    pub fn on_error<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&ErrorEvent) + Send + Sync + 'static,
    {
        let id = self.next_subscription_id();
        self.hooks.error.subscribe(id, Arc::new(f));
        id
    }

    /// Remove a subscription. Returns whether it was found.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.hooks.pre_execute.unsubscribe(id)
            || self.hooks.post_execute.unsubscribe(id)
            || self.hooks.canceled.unsubscribe(id)
            || self.hooks.error.unsubscribe(id)
    }

    fn next_subscription_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed))
    }

    // -----------------------------------------------------------------------
    // Disposal
    // -----------------------------------------------------------------------

    /// Stop the worker thread and release the queue.
    ///
    /// Safe to call any number of times from any number of threads: the
    /// first caller cancels the loop and waits for it to exit, every other
    /// call returns as soon as it sees the worker is disposed. Items still
    /// queued are dropped unexecuted. Called from the worker thread itself
    /// (e.g. inside a hook) it cancels without waiting.
    pub fn dispose(&self) {
        let loop_handle = {
            let mut gate = self.lock_gate();
            if gate.disposed {
                return;
            }
            gate.disposed = true;
            gate.sender = None;
            gate.loop_handle.take()
        };

        self.cancel.cancel();

        let Some(handle) = loop_handle else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            debug!("dispose called from the worker thread, not waiting for the loop");
        } else if !handle.is_finished() && handle.join().is_err() {
            warn!("worker thread panicked during shutdown");
        }

        info!(worker.capacity = self.capacity, "worker disposed");
    }

    fn lock_gate(&self) -> MutexGuard<'_, Gate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("capacity", &self.capacity)
            .field("count", &self.count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
