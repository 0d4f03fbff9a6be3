use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// A monotonically increasing counter, safe to share between tasks.
#[derive(Debug, Default)]
pub(crate) struct Counter(AtomicU64);

impl Counter {
    pub(crate) fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counters shared by the poll loop and the processing stage.
#[derive(Debug, Default)]
pub(crate) struct IngestCounters {
    pub(crate) polled: Counter,
    pub(crate) processed: Counter,
    pub(crate) skipped: Counter,
    pub(crate) polling_errors: Counter,
    pub(crate) processing_errors: Counter,
}

impl IngestCounters {
    pub(crate) fn snapshot(&self) -> PollingIngestStats {
        PollingIngestStats {
            total_polled_count: self.polled.get(),
            total_processed_count: self.processed.get(),
            total_skipped_count: self.skipped.get(),
            total_polling_error_count: self.polling_errors.get(),
            total_processing_error_count: self.processing_errors.get(),
        }
    }
}

/// A point-in-time snapshot of a poller's ingest counters.
///
/// Every value only ever grows over the lifetime of a poller.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingIngestStats {
    /// Records read from the shard and placed into the hand-off queue.
    pub total_polled_count: u64,
    /// Records successfully applied by the processing stage.
    pub total_processed_count: u64,
    /// Records read from the shard but skipped as already persisted.
    pub total_skipped_count: u64,
    /// Faults caught by the poll loop.
    pub total_polling_error_count: u64,
    /// Failed attempts to apply a record in the processing stage.
    pub total_processing_error_count: u64,
}
