//! The poll loop: reads batches from a shard and feeds the hand-off queue.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::{
    config::PollerConfig,
    consumer::{ConsumerError, ReadBatch, ShardConsumer},
    error_strategy::{ErrorStage, ErrorStrategyHandle},
    persisted::PersistedPointers,
    pointer::{ReadResult, ShardPointer},
    reset::{ResetPolicy, ResetState},
    state::{GoalState, ObservedState, State},
    stats::IngestCounters,
};

/// Faults caught inside a single poll loop iteration.
///
/// These never terminate the loop; they are reported to the active
/// [`IngestionErrorStrategy`](crate::IngestionErrorStrategy) with stage
/// [`ErrorStage::Polling`].
#[derive(Debug, Error)]
pub enum PollError {
    /// Resolving the configured reset to a position failed.
    #[error("failed to reset shard position to {policy}: {source}")]
    Reset {
        /// The reset being applied.
        policy: ResetState,
        /// The consumer error.
        source: ConsumerError,
    },

    /// Reading the next batch from the shard failed.
    #[error("failed to read from shard: {0}")]
    Read(#[source] ConsumerError),

    /// The processing stage stopped consuming the hand-off queue.
    #[error("hand-off queue is closed")]
    QueueClosed,
}

/// The result of one poll loop iteration.
#[derive(Debug)]
pub(crate) enum Outcome {
    /// The goal state requested close and the loop must exit.
    Closed,
    /// The goal state requested a pause; nothing was read.
    Paused,
    /// The read returned no records.
    Empty,
    /// A batch was read and dispatched.
    Dispatched { enqueued: usize, skipped: usize },
    /// The iteration failed.
    Fault(PollError),
}

type Queue<C> =
    mpsc::Sender<ReadResult<<C as ShardConsumer>::Pointer, <C as ShardConsumer>::Message>>;

/// The state owned by the poll loop task.
#[derive(Debug)]
pub(crate) struct PollLoop<C>
where
    C: ShardConsumer,
{
    consumer: C,
    shard_id: u32,

    /// The first record of the most recent batch, or the start / reset
    /// position before the first read. Readable by the lifecycle controller,
    /// written only by this loop.
    batch_start: Arc<Mutex<C::Pointer>>,

    /// True until the first batch following a start or reset has been
    /// dispatched.
    include_batch_start: bool,

    reset: ResetPolicy,
    persisted: Arc<PersistedPointers<C::Pointer>>,
    queue: Queue<C>,

    goal: Arc<GoalState>,
    state: Arc<ObservedState>,
    error_strategy: ErrorStrategyHandle,
    counters: Arc<IngestCounters>,
    config: PollerConfig,
}

impl<C> PollLoop<C>
where
    C: ShardConsumer,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        consumer: C,
        batch_start: Arc<Mutex<C::Pointer>>,
        reset: ResetPolicy,
        persisted: Arc<PersistedPointers<C::Pointer>>,
        queue: Queue<C>,
        goal: Arc<GoalState>,
        state: Arc<ObservedState>,
        error_strategy: ErrorStrategyHandle,
        counters: Arc<IngestCounters>,
        config: PollerConfig,
    ) -> Self {
        let shard_id = consumer.shard_id();
        Self {
            consumer,
            shard_id,
            batch_start,
            // The first read after start must include the start position.
            include_batch_start: true,
            reset,
            persisted,
            queue,
            goal,
            state,
            error_strategy,
            counters,
            config,
        }
    }

    /// Run iterations until the goal state requests close.
    ///
    /// Faults never escape this loop.
    pub(crate) async fn run(mut self) {
        info!(shard_id = self.shard_id, "starting poller");

        loop {
            match self.poll_once().await {
                Outcome::Closed => break,
                Outcome::Paused => tokio::time::sleep(self.config.pause_interval).await,
                Outcome::Empty => tokio::task::yield_now().await,
                Outcome::Dispatched { enqueued, skipped } => {
                    debug!(
                        shard_id = self.shard_id,
                        enqueued, skipped, "dispatched batch"
                    );
                }
                Outcome::Fault(e) => {
                    self.handle_fault(e);
                    tokio::time::sleep(self.config.fault_backoff).await;
                }
            }
        }

        info!(shard_id = self.shard_id, "poller stopped");
    }

    /// Execute a single iteration of the loop.
    pub(crate) async fn poll_once(&mut self) -> Outcome {
        match self.try_poll_once().await {
            Ok(v) => v,
            Err(e) => Outcome::Fault(e),
        }
    }

    async fn try_poll_once(&mut self) -> Result<Outcome, PollError> {
        if self.goal.is_closed() {
            return Ok(self.enter_closed());
        }

        self.apply_reset().await?;

        if self.goal.is_paused() {
            self.state.set(State::Paused);
            return Ok(Outcome::Paused);
        }

        self.state.set(State::Polling);
        let batch = self.read().await?;
        if batch.is_empty() {
            return Ok(Outcome::Empty);
        }

        self.state.set(State::Processing);

        let mut enqueued = 0;
        let mut skipped = 0;
        for (i, record) in batch.into_iter().enumerate() {
            if i == 0 {
                // Track the first record of the batch, not the last one
                // processed: a restart resumes inclusively from here and relies
                // on the persisted filter for anything already applied.
                *self.batch_start.lock() = record.pointer().clone();
            }

            if self.persisted.is_processed(record.pointer()) {
                info!(
                    shard_id = self.shard_id,
                    pointer = %record.pointer().as_string(),
                    "skipping record as it is already processed"
                );
                self.counters.skipped.inc();
                skipped += 1;
                continue;
            }

            trace!(
                shard_id = self.shard_id,
                pointer = %record.pointer().as_string(),
                message = ?record.message(),
                "enqueuing record"
            );

            // Blocks while the queue is full, throttling reads to the pace of
            // the processing stage.
            if self.queue.send(record).await.is_err() {
                if self.goal.is_closed() {
                    return Ok(self.enter_closed());
                }
                return Err(PollError::QueueClosed);
            }
            self.counters.polled.inc();
            enqueued += 1;
        }

        self.include_batch_start = false;

        Ok(Outcome::Dispatched { enqueued, skipped })
    }

    fn enter_closed(&self) -> Outcome {
        self.state.set(State::Closed);
        Outcome::Closed
    }

    /// Apply the pending reset, if any, exactly once.
    async fn apply_reset(&mut self) -> Result<(), PollError> {
        if self.reset.is_none() {
            return Ok(());
        }

        let pointer = self
            .reset
            .resolve(&self.consumer)
            .await
            .map_err(|source| PollError::Reset {
                policy: self.reset.state(),
                source,
            })?;

        let Some(pointer) = pointer else {
            return Ok(());
        };

        match &self.reset {
            ResetPolicy::RewindByTimestamp(ts) => info!(
                shard_id = self.shard_id,
                timestamp_ms = *ts,
                pointer = %pointer.as_string(),
                "resetting shard position by seeking to timestamp"
            ),
            reset => info!(
                shard_id = self.shard_id,
                reset = %reset.state(),
                pointer = %pointer.as_string(),
                "resetting shard position"
            ),
        }

        *self.batch_start.lock() = pointer;
        self.include_batch_start = true;
        self.reset = ResetPolicy::None;

        Ok(())
    }

    async fn read(&mut self) -> Result<ReadBatch<C>, PollError> {
        let max = self.config.max_poll_size;
        let timeout = self.config.poll_timeout;

        let res = if self.include_batch_start {
            let start = self.batch_start.lock().clone();
            self.consumer
                .read_next_from(&start, true, max, timeout)
                .await
        } else {
            self.consumer.read_next(max, timeout).await
        };

        res.map_err(PollError::Read)
    }

    fn handle_fault(&self, error: PollError) {
        self.counters.polling_errors.inc();
        error!(
            shard_id = self.shard_id,
            %error,
            "error polling shard"
        );

        let ignored = self.error_strategy.handle(&error, ErrorStage::Polling);

        // Without a processing stage nothing read from here on can be
        // applied, so reading on would consume the shard and lose records.
        let stage_gone = matches!(error, PollError::QueueClosed);
        if ignored && !stage_gone {
            return;
        }

        // A closed poller is already on its way out; it cannot be paused.
        if self.goal.is_closed() {
            return;
        }

        warn!(
            shard_id = self.shard_id,
            stage_gone,
            "pausing ingestion after a non-ignorable polling error"
        );
        self.goal.set_paused(true);
    }
}
