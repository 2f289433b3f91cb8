//! Subtask execution
//!
//! A [`TransferEngine`] runs exactly one subtask at a time:
//! - index and template subtasks copy one configuration object
//! - document subtasks scroll the source range, run the data pipeline and
//!   upsert into the destination in flush-sized bulk requests
//!
//! Bulk items rejected by admission control are retried with a randomized
//! backoff; any other item failure fails the subtask.

mod bulk;
mod config_copy;
mod engine;

pub use bulk::BulkFlusher;
pub use config_copy::clean_index_config;
pub use engine::TransferEngine;

use crate::error::ConfigError;
use crate::queue::Progress;
use crate::task::Subtask;

use std::time::Duration;

/// Bulk attempts per flush before giving up on rejected items
pub const MAX_FLUSH_ATTEMPTS: u32 = 5;

/// Attempts for a search or scroll call that fails transiently
pub const SEARCH_ATTEMPTS: u32 = 3;

/// Tunables for subtask execution
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Documents fetched per scroll page
    pub scroll_page_size: usize,
    /// Lower bound of the delay before resending rejected items
    pub backoff_min: Duration,
    /// Upper bound of the delay before resending rejected items
    pub backoff_max: Duration,
    /// Delay between search retries
    pub search_retry_delay: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            scroll_page_size: 500,
            backoff_min: Duration::from_millis(2000),
            backoff_max: Duration::from_millis(7000),
            search_retry_delay: Duration::from_millis(500),
        }
    }
}

impl TransferConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backoff_min > self.backoff_max {
            return Err(ConfigError::InvalidBackoff {
                min_ms: self.backoff_min.as_millis() as u64,
                max_ms: self.backoff_max.as_millis() as u64,
            });
        }
        if self.scroll_page_size == 0 {
            return Err(ConfigError::InvalidInterval {
                name: "scroll_page_size".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Result of one executed subtask
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferOutcome {
    /// Items written to the destination
    pub transferred: u64,
    /// Items dropped by the mutation pipeline
    pub dropped: u64,
    /// Bulk flushes issued
    pub flushes: u64,
    /// Configuration already present on the destination
    pub skipped: bool,
}

/// Receives a progress tick after every flush
pub trait ProgressSink: Send + Sync {
    fn report(&self, subtask: &Subtask, progress: Progress);
}

/// Discards progress
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _subtask: &Subtask, _progress: Progress) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(TransferConfig::default().validate().is_ok());

        let inverted = TransferConfig {
            backoff_min: Duration::from_secs(5),
            backoff_max: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(matches!(
            inverted.validate(),
            Err(ConfigError::InvalidBackoff { min_ms: 5000, max_ms: 1000 })
        ));
    }
}
