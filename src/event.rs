//! Lifecycle notifications emitted by the worker thread.
//!
//! Every notification is broadcast synchronously, on the worker's single
//! background thread, to all subscribers of the matching hook. Subscribers
//! that take a long time delay every item behind them.

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::warn;

use crate::error::Fault;
use crate::model::WorkItem;

/// Payload for the pre-execute and post-execute notifications.
#[derive(Debug, Clone)]
pub struct ExecuteEvent {
    pub item: Arc<WorkItem>,
}

/// Why the worker loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// `dispose()` was called (explicitly or on drop).
    Disposed,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::Disposed => write!(f, "disposed"),
        }
    }
}

/// Payload for the canceled notification. Emitted once, as the loop exits.
#[derive(Debug, Clone)]
pub struct CanceledEvent {
    pub reason: CancelReason,
    /// Items still queued when the loop stopped. They are dropped unexecuted.
    pub abandoned: usize,
}

/// Payload for the error notification.
///
/// A subscriber that deals with the fault calls [`mark_handled`](Self::mark_handled);
/// otherwise the worker's unhandled-error hook runs after all subscribers.
#[derive(Debug)]
pub struct ErrorEvent {
    pub item: Arc<WorkItem>,
    pub fault: Arc<Fault>,
    handled: Cell<bool>,
}

impl ErrorEvent {
    pub(crate) fn new(item: Arc<WorkItem>, fault: Arc<Fault>) -> Self {
        Self {
            item,
            fault,
            handled: Cell::new(false),
        }
    }

    pub fn mark_handled(&self) {
        self.handled.set(true);
    }

    /// Set the handled flag explicitly. A later subscriber may clear it again.
    pub fn set_handled(&self, handled: bool) {
        self.handled.set(handled);
    }

    pub fn is_handled(&self) -> bool {
        self.handled.get()
    }
}

/// Token returned by the worker's `on_*` methods, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);

type Subscriber<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// A multi-subscriber broadcast for one lifecycle point.
pub(crate) struct Hook<E> {
    name: &'static str,
    subscribers: RwLock<Vec<(SubscriptionId, Subscriber<E>)>>,
}

impl<E> Hook<E> {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            subscribers: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn subscribe(&self, id: SubscriptionId, subscriber: Subscriber<E>) {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, subscriber));
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    /// Call every subscriber in subscription order.
    ///
    /// Works on a snapshot, so subscribers may (un)subscribe from inside the
    /// callback. A panicking subscriber is logged and skipped.
    pub(crate) fn emit(&self, event: &E) {
        let snapshot: Vec<Subscriber<E>> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, s)| Arc::clone(s))
            .collect();

        for subscriber in snapshot {
            if panic::catch_unwind(AssertUnwindSafe(|| subscriber(event))).is_err() {
                warn!(hook = self.name, "subscriber panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn emit_calls_subscribers_in_order() {
        let hook: Hook<u32> = Hook::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));

        for (i, tag) in ["a", "b"].into_iter().enumerate() {
            let seen = Arc::clone(&seen);
            hook.subscribe(
                SubscriptionId(i as u64),
                Arc::new(move |n: &u32| seen.lock().unwrap().push(format!("{tag}{n}"))),
            );
        }

        hook.emit(&7);
        assert_eq!(*seen.lock().unwrap(), vec!["a7", "b7"]);
    }

    #[test]
    fn unsubscribe_removes_only_matching_subscriber() {
        let hook: Hook<()> = Hook::new("test");
        let hits = Arc::new(Mutex::new(0));

        let h = Arc::clone(&hits);
        hook.subscribe(SubscriptionId(1), Arc::new(move |_: &()| *h.lock().unwrap() += 1));
        let h = Arc::clone(&hits);
        hook.subscribe(SubscriptionId(2), Arc::new(move |_: &()| *h.lock().unwrap() += 10));

        assert!(hook.unsubscribe(SubscriptionId(1)));
        assert!(!hook.unsubscribe(SubscriptionId(1)));

        hook.emit(&());
        assert_eq!(*hits.lock().unwrap(), 10);
    }

    #[test]
    fn panicking_subscriber_does_not_stop_the_rest() {
        let hook: Hook<()> = Hook::new("test");
        let reached = Arc::new(Mutex::new(false));

        hook.subscribe(SubscriptionId(1), Arc::new(|_: &()| panic!("bad subscriber")));
        let r = Arc::clone(&reached);
        hook.subscribe(SubscriptionId(2), Arc::new(move |_: &()| *r.lock().unwrap() = true));

        hook.emit(&());
        assert!(*reached.lock().unwrap());
    }

    #[test]
    fn error_event_handled_flag() {
        let item = WorkItem::from_fn(|| Ok(()));
        let event = ErrorEvent::new(item, Arc::new(Fault::Panicked("x".into())));
        assert!(!event.is_handled());
        event.mark_handled();
        assert!(event.is_handled());
        event.set_handled(false);
        assert!(!event.is_handled());
    }
}
