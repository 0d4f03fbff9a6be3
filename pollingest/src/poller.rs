//! The lifecycle controller of a single shard's ingestion.

use std::{collections::HashSet, sync::Arc};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    config::PollerConfig,
    consumer::ShardConsumer,
    error_strategy::{ErrorStrategyHandle, IngestionErrorStrategy},
    persisted::PersistedPointers,
    poll_loop::PollLoop,
    processor::{IngestionEngine, MessageProcessor},
    reset::ResetPolicy,
    state::{GoalState, ObservedState, State},
    stats::{IngestCounters, PollingIngestStats},
};

/// Misuse of the [`StreamPoller`] lifecycle.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PollerError {
    /// The poller has been closed.
    #[error("poller is closed")]
    Closed,

    /// [`StreamPoller::start()`] was called more than once.
    #[error("poller is already started")]
    AlreadyStarted,
}

/// Construction-time inputs of a [`StreamPoller`].
#[derive(Debug)]
pub struct PollerOptions<P> {
    start_pointer: P,
    persisted: HashSet<P>,
    reset: ResetPolicy,
    error_strategy: Arc<dyn IngestionErrorStrategy>,
    initial_state: State,
    config: PollerConfig,
}

impl<P> PollerOptions<P>
where
    P: std::hash::Hash + Eq,
{
    /// Options for a poller resuming from `start_pointer` (inclusive), with no
    /// persisted pointers, no reset and the default [`PollerConfig`].
    pub fn new(start_pointer: P, error_strategy: Arc<dyn IngestionErrorStrategy>) -> Self {
        Self {
            start_pointer,
            persisted: HashSet::new(),
            reset: ResetPolicy::None,
            error_strategy,
            initial_state: State::None,
            config: PollerConfig::default(),
        }
    }

    /// Pointers of records durably applied by a previous run, which are
    /// skipped when read again.
    pub fn with_persisted_pointers(mut self, pointers: impl IntoIterator<Item = P>) -> Self {
        self.persisted = pointers.into_iter().collect();
        self
    }

    /// A reset applied once before the first read.
    pub fn with_reset_policy(mut self, reset: ResetPolicy) -> Self {
        self.reset = reset;
        self
    }

    /// The observed state reported before the poll loop first runs.
    pub fn with_initial_state(mut self, state: State) -> Self {
        self.initial_state = state;
        self
    }

    /// Override the tuning parameters.
    pub fn with_config(mut self, config: PollerConfig) -> Self {
        self.config = config;
        self
    }
}

/// The tasks not yet spawned by [`StreamPoller::start()`].
#[derive(Debug)]
struct Pending<C, E>
where
    C: ShardConsumer,
{
    poll_loop: PollLoop<C>,
    processor: MessageProcessor<C::Pointer, C::Message, E>,
}

#[derive(Debug)]
struct Tasks {
    poll_loop: JoinHandle<()>,
    processor: JoinHandle<()>,
}

/// Continuously pulls records from one shard of type `C` and applies them,
/// in order, to the engine `E`.
///
/// Two tasks are spawned by [`StreamPoller::start()`]: a poll loop reading
/// batches from the shard and a single processing worker applying them. They
/// are connected by a bounded queue, so a slow engine throttles reads.
///
/// Records whose pointer is in the persisted set given at construction are
/// skipped, making a restart from an earlier position idempotent.
///
/// Dropping the poller requests close without waiting for the tasks to stop.
#[derive(Debug)]
pub struct StreamPoller<C, E>
where
    C: ShardConsumer,
{
    shard_id: u32,

    goal: Arc<GoalState>,
    state: Arc<ObservedState>,

    batch_start: Arc<Mutex<C::Pointer>>,
    persisted: Arc<PersistedPointers<C::Pointer>>,
    error_strategy: ErrorStrategyHandle,
    counters: Arc<IngestCounters>,
    config: PollerConfig,

    /// Stops the processing worker.
    shutdown: CancellationToken,

    pending: Mutex<Option<Pending<C, E>>>,
    tasks: Mutex<Option<Tasks>>,
}

impl<C, E> StreamPoller<C, E>
where
    C: ShardConsumer,
    E: IngestionEngine<C::Pointer, C::Message>,
{
    /// Initialise a poller reading from `consumer` and applying to `engine`.
    ///
    /// Nothing is read until [`StreamPoller::start()`] is called.
    pub fn new(consumer: C, engine: E, options: PollerOptions<C::Pointer>) -> Self {
        let PollerOptions {
            start_pointer,
            persisted,
            reset,
            error_strategy,
            initial_state,
            config,
        } = options;

        let shard_id = consumer.shard_id();
        let goal = Arc::new(GoalState::default());
        let state = Arc::new(ObservedState::new(initial_state));
        let batch_start = Arc::new(Mutex::new(start_pointer));
        let persisted = Arc::new(PersistedPointers::new(persisted));
        let error_strategy = ErrorStrategyHandle::new(error_strategy);
        let counters = Arc::new(IngestCounters::default());

        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));

        let poll_loop = PollLoop::new(
            consumer,
            Arc::clone(&batch_start),
            reset,
            Arc::clone(&persisted),
            tx,
            Arc::clone(&goal),
            Arc::clone(&state),
            error_strategy.clone(),
            Arc::clone(&counters),
            config,
        );
        let processor = MessageProcessor::new(
            rx,
            engine,
            error_strategy.clone(),
            Arc::clone(&counters),
            config.processor_retry_interval,
            shard_id,
        );

        Self {
            shard_id,
            goal,
            state,
            batch_start,
            persisted,
            error_strategy,
            counters,
            config,
            shutdown: CancellationToken::new(),
            pending: Mutex::new(Some(Pending {
                poll_loop,
                processor,
            })),
            tasks: Mutex::new(None),
        }
    }

    /// Spawn the poll loop and processing tasks onto the current tokio
    /// runtime.
    ///
    /// Fails without side effects if the poller is closed or already started.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn start(&self) -> Result<(), PollerError> {
        // Held until the tasks are recorded, so close() never observes a
        // started poller without them.
        let mut pending = self.pending.lock();

        if self.goal.is_closed() {
            return Err(PollerError::Closed);
        }
        if !self.goal.mark_started() {
            return Err(PollerError::AlreadyStarted);
        }

        let Some(Pending {
            poll_loop,
            processor,
        }) = pending.take()
        else {
            return Err(PollerError::AlreadyStarted);
        };

        info!(shard_id = self.shard_id, "starting stream poller");

        let processor = tokio::spawn(processor.run(self.shutdown.clone()));
        let poll_loop = tokio::spawn(poll_loop.run());
        *self.tasks.lock() = Some(Tasks {
            poll_loop,
            processor,
        });

        Ok(())
    }

    /// Stop reading from the shard until [`StreamPoller::resume()`] is
    /// called. Records already queued are still applied.
    pub fn pause(&self) -> Result<(), PollerError> {
        if self.goal.is_closed() {
            return Err(PollerError::Closed);
        }
        self.goal.set_paused(true);
        Ok(())
    }

    /// Continue reading from the shard after a [`StreamPoller::pause()`] or a
    /// fault the error strategy refused to ignore.
    pub fn resume(&self) -> Result<(), PollerError> {
        if self.goal.is_closed() {
            return Err(PollerError::Closed);
        }
        self.goal.set_paused(false);
        Ok(())
    }

    /// Stop ingestion.
    ///
    /// Waits up to [`PollerConfig::close_timeout`] for the poll loop to exit,
    /// then stops the processing task, discarding any records still queued.
    /// Records not yet applied will be read again by the next poller for this
    /// shard.
    ///
    /// Safe to call more than once.
    pub async fn close(&self) {
        self.goal.close();

        {
            let mut pending = self.pending.lock();
            if !self.goal.is_started() {
                info!(
                    shard_id = self.shard_id,
                    "closing stream poller that was never started"
                );
                pending.take();
                return;
            }
        }

        let deadline = Instant::now() + self.config.close_timeout;
        while self.state.get() != State::Closed {
            if Instant::now() >= deadline {
                error!(
                    shard_id = self.shard_id,
                    timeout = ?self.config.close_timeout,
                    state = %self.state.get(),
                    "timed out waiting for poller to close"
                );
                break;
            }
            tokio::time::sleep(self.config.close_poll_interval).await;
        }

        self.shutdown.cancel();

        let Some(Tasks {
            poll_loop,
            processor,
        }) = self.tasks.lock().take()
        else {
            return;
        };

        if let Err(e) = processor.await {
            warn!(
                shard_id = self.shard_id,
                error = %e,
                "message processor task failed"
            );
        }

        // A poll loop that has not yet observed close is left to exit on its
        // own; it is never aborted.
        if self.state.get() == State::Closed {
            if let Err(e) = poll_loop.await {
                warn!(
                    shard_id = self.shard_id,
                    error = %e,
                    "poll loop task failed"
                );
            }
        }

        info!(shard_id = self.shard_id, "stream poller closed");
    }

    /// Replace the error strategy consulted by both the poll loop and the
    /// processing task.
    pub fn update_error_strategy(&self, strategy: Arc<dyn IngestionErrorStrategy>) {
        let old = self.error_strategy.swap(Arc::clone(&strategy));
        info!(
            shard_id = self.shard_id,
            old = ?old,
            new = ?strategy,
            "updated ingestion error strategy"
        );
    }
}

impl<C, E> StreamPoller<C, E>
where
    C: ShardConsumer,
{
    /// The state most recently reported by the poll loop.
    pub fn state(&self) -> State {
        self.state.get()
    }

    /// Returns true if reading is paused, either by
    /// [`StreamPoller::pause()`] or after a non-ignorable fault.
    pub fn is_paused(&self) -> bool {
        self.goal.is_paused()
    }

    /// Returns true once [`StreamPoller::close()`] has been called.
    pub fn is_closed(&self) -> bool {
        self.goal.is_closed()
    }

    /// Returns true once [`StreamPoller::start()`] has succeeded.
    pub fn is_started(&self) -> bool {
        self.goal.is_started()
    }

    /// The pointer of the first record of the most recently read batch, or
    /// the start (or reset) pointer if nothing has been read yet.
    pub fn batch_start_pointer(&self) -> C::Pointer {
        self.batch_start.lock().clone()
    }

    /// The active error strategy.
    pub fn error_strategy(&self) -> Arc<dyn IngestionErrorStrategy> {
        self.error_strategy.current()
    }

    /// The greatest persisted pointer, if any.
    pub fn max_persisted_pointer(&self) -> Option<C::Pointer> {
        self.persisted.max().cloned()
    }

    /// A snapshot of the ingestion counters.
    pub fn stats(&self) -> PollingIngestStats {
        self.counters.snapshot()
    }

    /// The shard this poller reads.
    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }
}

impl<C, E> Drop for StreamPoller<C, E>
where
    C: ShardConsumer,
{
    fn drop(&mut self) {
        self.goal.close();
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use std::time::Duration;

    use super::*;
    use crate::{
        error_strategy::{BlockErrorStrategy, DropErrorStrategy},
        mock::{MockIngestionEngine, MockShardConsumer},
        pointer::OffsetPointer,
    };

    fn poller(
        options: PollerOptions<OffsetPointer>,
    ) -> StreamPoller<MockShardConsumer, Arc<MockIngestionEngine>> {
        StreamPoller::new(
            MockShardConsumer::new(7),
            Arc::new(MockIngestionEngine::default()),
            options.with_config(PollerConfig {
                poll_timeout: Duration::from_millis(10),
                pause_interval: Duration::from_millis(5),
                close_poll_interval: Duration::from_millis(5),
                ..Default::default()
            }),
        )
    }

    #[test]
    fn test_construction() {
        let p = poller(
            PollerOptions::new(OffsetPointer::new(3), Arc::new(BlockErrorStrategy))
                .with_persisted_pointers([1, 5, 2].map(OffsetPointer::new))
                .with_initial_state(State::Paused),
        );

        assert_eq!(p.shard_id(), 7);
        assert_eq!(p.state(), State::Paused);
        assert_eq!(p.batch_start_pointer(), OffsetPointer::new(3));
        assert_eq!(p.max_persisted_pointer(), Some(OffsetPointer::new(5)));
        assert_eq!(p.stats(), PollingIngestStats::default());
        assert!(!p.is_started());
        assert!(!p.is_paused());
        assert!(!p.is_closed());
        assert!(format!("{:?}", p.error_strategy()).contains("Block"));
    }

    #[test]
    fn test_pause_before_start() {
        let p = poller(PollerOptions::new(
            OffsetPointer::new(0),
            Arc::new(DropErrorStrategy),
        ));

        p.pause().unwrap();
        p.pause().unwrap();
        assert!(p.is_paused());
        p.resume().unwrap();
        assert!(!p.is_paused());
    }

    #[tokio::test]
    async fn test_double_start() {
        let p = poller(PollerOptions::new(
            OffsetPointer::new(0),
            Arc::new(DropErrorStrategy),
        ));

        p.start().unwrap();
        assert_matches!(p.start(), Err(PollerError::AlreadyStarted));
        assert!(p.is_started());
        assert!(!p.is_closed());

        p.close().await;
        assert_eq!(p.state(), State::Closed);
    }

    #[tokio::test]
    async fn test_operations_after_close() {
        let p = poller(PollerOptions::new(
            OffsetPointer::new(0),
            Arc::new(DropErrorStrategy),
        ));

        p.close().await;
        assert!(p.is_closed());
        assert!(!p.is_started());
        assert_eq!(p.state(), State::None);

        assert_matches!(p.start(), Err(PollerError::Closed));
        assert_matches!(p.pause(), Err(PollerError::Closed));
        assert_matches!(p.resume(), Err(PollerError::Closed));
        assert!(!p.is_started());
        assert!(!p.is_paused());

        // Repeated close is a no-op.
        p.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_start_racing_close() {
        for _ in 0..50 {
            let p = Arc::new(poller(PollerOptions::new(
                OffsetPointer::new(0),
                Arc::new(DropErrorStrategy),
            )));

            let starter = tokio::spawn({
                let p = Arc::clone(&p);
                async move { p.start() }
            });
            p.close().await;
            let started = starter.await.unwrap();

            match started {
                Ok(()) => {
                    // close() saw the tasks and waited for them.
                    assert!(p.is_started());
                    assert_eq!(p.state(), State::Closed);
                    assert!(p.tasks.lock().is_none());
                }
                Err(e) => {
                    assert_matches!(e, PollerError::Closed);
                    assert!(!p.is_started());
                    assert!(p.pending.lock().is_none());
                }
            }
        }
    }
}
