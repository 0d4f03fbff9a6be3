//! CLI config for a shard stream poller.

use std::{num::NonZeroUsize, sync::Arc, time::Duration};

use pollingest::{
    DEFAULT_CLOSE_POLL_INTERVAL, DEFAULT_CLOSE_TIMEOUT, DEFAULT_FAULT_BACKOFF,
    DEFAULT_MAX_POLL_SIZE, DEFAULT_PAUSE_INTERVAL, DEFAULT_POLL_TIMEOUT,
    DEFAULT_PROCESSOR_RETRY_INTERVAL, DEFAULT_QUEUE_CAPACITY, ErrorStrategyKind,
    IngestionErrorStrategy, PollerConfig, ResetPolicy, ResetPolicyError, ResetState,
};
use thiserror::Error;

#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum Error {
    #[error("invalid shard reset configuration: {0}")]
    InvalidReset(#[from] ResetPolicyError),
}

fn leak(s: String) -> &'static str {
    Box::leak(Box::new(s))
}

fn default_duration(d: Duration) -> &'static str {
    leak(humantime::format_duration(d).to_string())
}

fn default_max_poll_size() -> &'static str {
    leak(DEFAULT_MAX_POLL_SIZE.to_string())
}

fn default_queue_capacity() -> &'static str {
    leak(DEFAULT_QUEUE_CAPACITY.to_string())
}

/// CLI config for the shard stream poller.
#[derive(Debug, Clone, clap::Parser)]
#[allow(missing_copy_implementations)]
pub struct StreamPollerConfig {
    /// The maximum number of records requested from the shard in one read.
    #[clap(
        long = "poller-max-poll-size",
        env = "POLLINGEST_MAX_POLL_SIZE",
        default_value = default_max_poll_size(),
        action
    )]
    pub max_poll_size: NonZeroUsize,

    /// How long a single read waits for records to arrive.
    #[clap(
        long = "poller-poll-timeout",
        env = "POLLINGEST_POLL_TIMEOUT",
        default_value = default_duration(DEFAULT_POLL_TIMEOUT),
        value_parser = humantime::parse_duration,
    )]
    pub poll_timeout: Duration,

    /// How often a paused poller checks whether it has been resumed or
    /// closed.
    #[clap(
        long = "poller-pause-interval",
        env = "POLLINGEST_PAUSE_INTERVAL",
        default_value = default_duration(DEFAULT_PAUSE_INTERVAL),
        value_parser = humantime::parse_duration,
    )]
    pub pause_interval: Duration,

    /// How long closing a poller waits for the poll loop to stop before the
    /// processing stage is stopped regardless.
    #[clap(
        long = "poller-close-timeout",
        env = "POLLINGEST_CLOSE_TIMEOUT",
        default_value = default_duration(DEFAULT_CLOSE_TIMEOUT),
        value_parser = humantime::parse_duration,
    )]
    pub close_timeout: Duration,

    /// How often closing a poller checks whether the poll loop has stopped.
    #[clap(
        long = "poller-close-poll-interval",
        env = "POLLINGEST_CLOSE_POLL_INTERVAL",
        default_value = default_duration(DEFAULT_CLOSE_POLL_INTERVAL),
        value_parser = humantime::parse_duration,
    )]
    pub close_poll_interval: Duration,

    /// The number of records buffered between polling and processing.
    ///
    /// Polling blocks once this many records are waiting to be applied.
    #[clap(
        long = "poller-queue-capacity",
        env = "POLLINGEST_QUEUE_CAPACITY",
        default_value = default_queue_capacity(),
        action
    )]
    pub queue_capacity: NonZeroUsize,

    /// The delay before re-applying a record that failed with an error the
    /// error strategy refused to ignore.
    #[clap(
        long = "poller-processor-retry-interval",
        env = "POLLINGEST_PROCESSOR_RETRY_INTERVAL",
        default_value = default_duration(DEFAULT_PROCESSOR_RETRY_INTERVAL),
        value_parser = humantime::parse_duration,
    )]
    pub processor_retry_interval: Duration,

    /// The delay before polling again after a read error the error strategy
    /// chose to ignore.
    #[clap(
        long = "poller-fault-backoff",
        env = "POLLINGEST_FAULT_BACKOFF",
        default_value = default_duration(DEFAULT_FAULT_BACKOFF),
        value_parser = humantime::parse_duration,
    )]
    pub fault_backoff: Duration,

    /// Reposition the shard once before the first read.
    #[clap(
        long = "poller-reset-state",
        env = "POLLINGEST_RESET_STATE",
        default_value_t = ResetState::default(),
        value_enum,
        action
    )]
    pub reset_state: ResetState,

    /// The offset literal for `rewind_by_offset`, or the millisecond UNIX
    /// timestamp for `rewind_by_timestamp`.
    #[clap(long = "poller-reset-value", env = "POLLINGEST_RESET_VALUE", action)]
    pub reset_value: Option<String>,

    /// What to do with records that fail to be read or applied.
    ///
    /// `drop` logs and skips them; `block` pauses polling and retries the
    /// failed apply until the strategy is changed or the failure clears.
    #[clap(
        long = "poller-error-strategy",
        env = "POLLINGEST_ERROR_STRATEGY",
        default_value_t = ErrorStrategyKind::default(),
        value_enum,
        action
    )]
    pub error_strategy: ErrorStrategyKind,
}

impl StreamPollerConfig {
    /// The tuning parameters for a poller.
    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            max_poll_size: self.max_poll_size.get(),
            poll_timeout: self.poll_timeout,
            pause_interval: self.pause_interval,
            close_timeout: self.close_timeout,
            close_poll_interval: self.close_poll_interval,
            queue_capacity: self.queue_capacity.get(),
            processor_retry_interval: self.processor_retry_interval,
            fault_backoff: self.fault_backoff,
        }
    }

    /// The configured reset.
    pub fn reset_policy(&self) -> Result<ResetPolicy, Error> {
        Ok(ResetPolicy::from_parts(
            self.reset_state,
            self.reset_value.as_deref(),
        )?)
    }

    /// A new instance of the configured error strategy.
    pub fn error_strategy(&self) -> Arc<dyn IngestionErrorStrategy> {
        self.error_strategy.build()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use clap::Parser;

    use super::*;

    #[test_log::test]
    fn test_defaults() {
        let cfg = StreamPollerConfig::parse_from([""]);

        assert_eq!(cfg.poller_config(), PollerConfig::default());
        assert_eq!(cfg.reset_policy().unwrap(), ResetPolicy::None);
        assert_eq!(cfg.error_strategy, ErrorStrategyKind::Drop);
    }

    #[test_log::test]
    fn test_overrides() {
        let cfg = StreamPollerConfig::parse_from([
            "",
            "--poller-max-poll-size",
            "10",
            "--poller-poll-timeout",
            "250ms",
            "--poller-pause-interval",
            "1s",
            "--poller-close-timeout",
            "1m",
            "--poller-close-poll-interval",
            "20ms",
            "--poller-queue-capacity",
            "7",
            "--poller-processor-retry-interval",
            "2s",
            "--poller-fault-backoff",
            "500ms",
            "--poller-error-strategy",
            "block",
        ]);

        assert_eq!(
            cfg.poller_config(),
            PollerConfig {
                max_poll_size: 10,
                poll_timeout: Duration::from_millis(250),
                pause_interval: Duration::from_secs(1),
                close_timeout: Duration::from_secs(60),
                close_poll_interval: Duration::from_millis(20),
                queue_capacity: 7,
                processor_retry_interval: Duration::from_secs(2),
                fault_backoff: Duration::from_millis(500),
            }
        );
        assert!(format!("{:?}", cfg.error_strategy()).contains("Block"));
    }

    #[test_log::test]
    fn test_reset() {
        let cfg = StreamPollerConfig::parse_from([
            "",
            "--poller-reset-state",
            "rewind_by_timestamp",
            "--poller-reset-value",
            "1700000000000",
        ]);
        assert_eq!(
            cfg.reset_policy().unwrap(),
            ResetPolicy::RewindByTimestamp(1_700_000_000_000)
        );

        let cfg = StreamPollerConfig::parse_from(["", "--poller-reset-state", "earliest"]);
        assert_eq!(cfg.reset_policy().unwrap(), ResetPolicy::Earliest);

        let cfg = StreamPollerConfig::parse_from(["", "--poller-reset-state", "rewind_by_offset"]);
        assert_matches!(
            cfg.reset_policy(),
            Err(Error::InvalidReset(ResetPolicyError::MissingValue(
                ResetState::RewindByOffset
            )))
        );

        let cfg = StreamPollerConfig::parse_from([
            "",
            "--poller-reset-state",
            "rewind_by_timestamp",
            "--poller-reset-value",
            "yesterday",
        ]);
        assert_matches!(
            cfg.reset_policy(),
            Err(Error::InvalidReset(ResetPolicyError::InvalidTimestamp { .. }))
        );
    }

    #[test_log::test]
    fn test_invalid_values_rejected() {
        assert!(
            StreamPollerConfig::try_parse_from(["", "--poller-queue-capacity", "0"]).is_err()
        );
        assert!(
            StreamPollerConfig::try_parse_from(["", "--poller-poll-timeout", "soon"]).is_err()
        );
        assert!(
            StreamPollerConfig::try_parse_from(["", "--poller-error-strategy", "panic"]).is_err()
        );
    }
}
