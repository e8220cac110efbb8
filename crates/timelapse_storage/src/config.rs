//! Store configuration.

use serde::{Deserialize, Serialize};

/// Store configuration shared by the change log and the resource store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Pending rows that trigger a synchronous flush on append (0 = never)
    pub flush_threshold: usize,
    /// Idle interval after which the background flusher persists pending rows
    pub idle_flush_ms: u64,
    /// zstd level used for bodies that arrive without a content encoding
    pub body_compression_level: i32,
    /// Global id gap above which an appended change is logged as out of order
    pub max_global_id_gap: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            flush_threshold: 500,
            idle_flush_ms: 500,
            body_compression_level: 3,
            max_global_id_gap: 10_000,
        }
    }
}

impl StoreConfig {
    /// Set the flush threshold
    #[must_use]
    pub fn with_flush_threshold(mut self, threshold: usize) -> Self {
        self.flush_threshold = threshold;
        self
    }

    /// Set the idle flush interval
    #[must_use]
    pub fn with_idle_flush_ms(mut self, millis: u64) -> Self {
        self.idle_flush_ms = millis;
        self
    }

    /// Idle flush interval as a std duration
    #[must_use]
    pub fn idle_flush_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.idle_flush_ms)
    }
}
