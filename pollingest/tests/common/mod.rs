use std::{sync::Arc, time::Duration};

use pollingest::{
    OffsetPointer, PollerConfig, PollerOptions, StreamPoller,
    mock::{MockIngestionEngine, MockShardConsumer, MockShardState},
};

/// The shard ID used for the [`TestContext`].
pub(crate) const TEST_SHARD_ID: u32 = 3;

/// Intervals short enough to keep lifecycle tests fast.
pub(crate) fn test_config() -> PollerConfig {
    PollerConfig {
        max_poll_size: 100,
        poll_timeout: Duration::from_millis(10),
        pause_interval: Duration::from_millis(5),
        close_timeout: Duration::from_secs(1),
        close_poll_interval: Duration::from_millis(5),
        queue_capacity: 100,
        processor_retry_interval: Duration::from_millis(5),
        fault_backoff: Duration::from_millis(5),
    }
}

pub(crate) type TestPoller = StreamPoller<MockShardConsumer, Arc<MockIngestionEngine>>;

pub(crate) struct TestContext {
    pub poller: TestPoller,
    pub shard: MockShardState,
    pub engine: Arc<MockIngestionEngine>,
}

impl TestContext {
    /// Build a poller over `shard` with the given options.
    ///
    /// The options should carry [`test_config()`] (or a variation of it).
    pub(crate) fn new(shard: MockShardState, options: PollerOptions<OffsetPointer>) -> Self {
        let engine = Arc::new(MockIngestionEngine::default());
        let poller = StreamPoller::new(
            MockShardConsumer::with_state(TEST_SHARD_ID, shard.clone()),
            Arc::clone(&engine),
            options,
        );

        Self {
            poller,
            shard,
            engine,
        }
    }

    /// The offsets applied to the engine so far, in order.
    pub(crate) fn applied_offsets(&self) -> Vec<i64> {
        self.engine
            .applied()
            .into_iter()
            .map(|(p, _)| p.get())
            .collect()
    }

    /// Wait until exactly `offsets` have been applied.
    pub(crate) async fn wait_for_applied(&self, offsets: &[i64]) {
        wait_for(|| self.applied_offsets().len() >= offsets.len()).await;
        assert_eq!(self.applied_offsets(), offsets);
    }
}

/// Poll `cond` until it returns true, panicking if it does not within 5s.
pub(crate) async fn wait_for<F>(mut cond: F)
where
    F: FnMut() -> bool + Send,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not satisfied within timeout");
}
