//! Queue configuration.
//!
//! Every field has a default, so a partial JSON document (or `{}`) is valid.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Diagnostic name, used in logs.
    pub name: Option<String>,

    /// Upper bound on tasks between start and finish at once. `None` means
    /// unbounded; `0` is treated as `1`.
    pub max_concurrent: Option<usize>,

    /// Start with dispatch paused (see `TaskQueue::set_suspended`).
    pub start_suspended: bool,
}

impl QueueConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// One task at a time.
    pub fn serial(name: impl Into<String>) -> Self {
        Self::named(name).with_max_concurrent(1)
    }

    pub fn with_max_concurrent(mut self, limit: usize) -> Self {
        self.max_concurrent = Some(limit);
        self
    }

    pub fn suspended(mut self) -> Self {
        self.start_suspended = true;
        self
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub(crate) fn permit_count(&self) -> Option<usize> {
        self.max_concurrent.map(|limit| limit.max(1))
    }
}
