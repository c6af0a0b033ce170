//! # workq
//!
//! A bounded, single-consumer work queue. Producers push [`WorkItem`]s from
//! any thread; one dedicated background thread per [`Worker`] runs them in
//! FIFO order and reports each step through lifecycle notifications.
//!
//! ```no_run
//! use std::time::Duration;
//! use workq::{WorkItem, Worker};
//!
//! let worker = Worker::new()?;
//! worker.on_error(|e| {
//!     eprintln!("{} failed: {}", e.item.id(), e.fault);
//!     e.mark_handled();
//! });
//!
//! let item = WorkItem::from_item_fn_with(20u32, |item| {
//!     let n = item.argument::<u32>().copied().unwrap_or_default();
//!     item.set_result(n + 1);
//!     Ok(())
//! });
//! worker.push(item.clone())?;
//! item.wait_executed(Duration::from_secs(1));
//! assert_eq!(item.result::<u32>(), Some(21));
//!
//! worker.dispose();
//! # Ok::<(), workq::error::Error>(())
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod model;
pub mod telemetry;
pub mod worker;

pub use config::WorkerConfig;
pub use error::{Error, Fault, Result};
pub use event::{CancelReason, CanceledEvent, ErrorEvent, ExecuteEvent, SubscriptionId};
pub use model::{Consumer, WorkId, WorkItem};
pub use worker::{DefaultHandler, Execution, Worker, WorkerHandler};
