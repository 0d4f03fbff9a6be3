use std::time::Duration;

/// The maximum number of records requested from the shard per read.
pub const DEFAULT_MAX_POLL_SIZE: usize = 1000;

/// How long a single read waits for records to arrive.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(1000);

/// How long the poll loop sleeps between checks of the goal state while
/// paused. Bounds the latency of `resume()` and `close()`.
pub const DEFAULT_PAUSE_INTERVAL: Duration = Duration::from_millis(100);

/// How long `close()` waits for the poll loop to exit before forcing the
/// processing stage down.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// How often `close()` checks whether the poll loop has exited.
pub const DEFAULT_CLOSE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The capacity of the hand-off queue between polling and processing.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// The delay between attempts to apply a record that failed with a
/// non-ignorable error.
pub const DEFAULT_PROCESSOR_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// How long the poll loop waits before the next iteration after a fault the
/// error strategy chose to ignore. Bounds the retry rate against a source that
/// fails immediately.
pub const DEFAULT_FAULT_BACKOFF: Duration = Duration::from_millis(100);

/// Tuning parameters of a [`StreamPoller`](crate::StreamPoller).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    /// See [`DEFAULT_MAX_POLL_SIZE`].
    pub max_poll_size: usize,
    /// See [`DEFAULT_POLL_TIMEOUT`].
    pub poll_timeout: Duration,
    /// See [`DEFAULT_PAUSE_INTERVAL`].
    pub pause_interval: Duration,
    /// See [`DEFAULT_CLOSE_TIMEOUT`].
    pub close_timeout: Duration,
    /// See [`DEFAULT_CLOSE_POLL_INTERVAL`].
    pub close_poll_interval: Duration,
    /// See [`DEFAULT_QUEUE_CAPACITY`]. Must be non-zero.
    pub queue_capacity: usize,
    /// See [`DEFAULT_PROCESSOR_RETRY_INTERVAL`].
    pub processor_retry_interval: Duration,
    /// See [`DEFAULT_FAULT_BACKOFF`].
    pub fault_backoff: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            max_poll_size: DEFAULT_MAX_POLL_SIZE,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            pause_interval: DEFAULT_PAUSE_INTERVAL,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            close_poll_interval: DEFAULT_CLOSE_POLL_INTERVAL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            processor_retry_interval: DEFAULT_PROCESSOR_RETRY_INTERVAL,
            fault_backoff: DEFAULT_FAULT_BACKOFF,
        }
    }
}
