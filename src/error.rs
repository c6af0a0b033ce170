//! Error types for workq.

use thiserror::Error;

use crate::model::WorkId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid capacity {0}: a worker queue must hold at least one item")]
    InvalidCapacity(usize),

    #[error("invalid work item {id}: {reason}")]
    InvalidItem { id: WorkId, reason: &'static str },

    #[error("work queue is full")]
    QueueFull,

    #[error("worker was disposed before the item could be queued")]
    Disposed,

    #[error("failed to start worker: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A fault raised by a work item's action while the worker was running it.
///
/// Faults never leave the worker thread on their own; they are reported
/// through the error notification and the unhandled-error hook.
#[derive(Debug, Error)]
pub enum Fault {
    /// The action returned an error.
    #[error("work item action failed: {0}")]
    Failed(#[source] anyhow::Error),

    /// The action panicked. The panic payload is kept when it was a string.
    #[error("work item action panicked: {0}")]
    Panicked(String),
}

impl Fault {
    /// Build a fault from a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Fault::Panicked(message)
    }

    /// The underlying action error, if the action returned one.
    pub fn as_error(&self) -> Option<&anyhow::Error> {
        match self {
            Fault::Failed(e) => Some(e),
            Fault::Panicked(_) => None,
        }
    }

    /// Attempt to view the action error as a concrete type.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        self.as_error().and_then(|e| e.downcast_ref::<E>())
    }
}
