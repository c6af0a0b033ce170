//! Typed worker configuration.
//!
//! Defaults cover most embedders; applications that keep settings in a file
//! can deserialize a [`WorkerConfig`] from TOML.

use crate::error::{Error, Result};
use serde::Deserialize;

/// Queue capacity used when none is given.
pub const DEFAULT_CAPACITY: usize = 4096;

/// Name given to the background worker thread when none is given.
pub const DEFAULT_THREAD_NAME: &str = "workq-worker";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    /// Maximum number of queued items before `push` blocks.
    pub capacity: usize,
    /// Name of the background thread, shown in panics and debuggers.
    pub thread_name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

impl WorkerConfig {
    /// Default configuration with the given capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Parse a flat TOML document such as `capacity = 16`.
    /// Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| Error::Config(format!("invalid worker config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings a worker cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::InvalidCapacity(self.capacity));
        }
        if self.thread_name.contains('\0') {
            return Err(Error::Config(
                "thread_name must not contain NUL bytes".to_string(),
            ));
        }
        Ok(())
    }
}
