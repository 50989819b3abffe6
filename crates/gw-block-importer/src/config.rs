//! Importer configuration.

use std::time::Duration;

/// Tuning knobs for the block importer.
#[derive(Debug, Clone)]
pub struct BlockImporterConfig {
    /// First height to import.
    pub start_height: u64,
    /// Exclusive upper bound; `None` keeps importing forever.
    pub stop_height: Option<u64>,
    /// How often to poll the upstream tip while waiting for it to advance.
    pub height_polling_interval: Duration,
    /// First backoff delay after a transient error.
    pub backoff_base: Duration,
    /// Backoff ceiling.
    pub backoff_cap: Duration,
}

impl Default for BlockImporterConfig {
    fn default() -> Self {
        Self {
            start_height: 0,
            stop_height: None,
            height_polling_interval: Duration::from_secs(5),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
        }
    }
}

impl BlockImporterConfig {
    /// A config with tight timings for tests.
    #[must_use]
    pub fn for_testing(start_height: u64) -> Self {
        Self {
            start_height,
            stop_height: None,
            height_polling_interval: Duration::from_millis(10),
            backoff_base: Duration::from_millis(5),
            backoff_cap: Duration::from_millis(50),
        }
    }
}
