//! The single-worker stage draining the hand-off queue into the durable
//! engine.

use std::{any::Any, fmt::Debug, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{
    error_strategy::{ErrorStage, ErrorStrategyHandle},
    pointer::{ReadResult, ShardPointer},
    stats::IngestCounters,
};

/// Generic boxed error type returned by [`IngestionEngine`] implementations.
pub type EngineError = Box<dyn std::error::Error + Sync + Send>;

/// A panic raised while applying a record, surfaced as an ordinary
/// processing failure.
#[derive(Debug, Error)]
#[error("ingestion engine panicked: {0}")]
struct EnginePanic(String);

impl EnginePanic {
    fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self(msg)
    }
}

/// The durable engine records are applied to.
#[async_trait]
pub trait IngestionEngine<P, M>: Debug + Send + Sync + 'static
where
    P: Send + Sync,
    M: Send + Sync,
{
    /// Durably apply the record `message` read at `pointer`.
    async fn apply(&self, pointer: &P, message: &M) -> Result<(), EngineError>;
}

#[async_trait]
impl<T, P, M> IngestionEngine<P, M> for Arc<T>
where
    T: IngestionEngine<P, M>,
    P: Send + Sync + 'static,
    M: Send + Sync + 'static,
{
    async fn apply(&self, pointer: &P, message: &M) -> Result<(), EngineError> {
        (**self).apply(pointer, message).await
    }
}

/// Drains the hand-off queue one record at a time, in queue order, applying
/// each to an [`IngestionEngine`].
#[derive(Debug)]
pub(crate) struct MessageProcessor<P, M, E> {
    queue: mpsc::Receiver<ReadResult<P, M>>,
    engine: E,
    error_strategy: ErrorStrategyHandle,
    counters: Arc<IngestCounters>,
    retry_interval: Duration,
    shard_id: u32,
}

impl<P, M, E> MessageProcessor<P, M, E>
where
    P: ShardPointer,
    M: Debug + Send + Sync + 'static,
    E: IngestionEngine<P, M>,
{
    pub(crate) fn new(
        queue: mpsc::Receiver<ReadResult<P, M>>,
        engine: E,
        error_strategy: ErrorStrategyHandle,
        counters: Arc<IngestCounters>,
        retry_interval: Duration,
        shard_id: u32,
    ) -> Self {
        Self {
            queue,
            engine,
            error_strategy,
            counters,
            retry_interval,
            shard_id,
        }
    }

    /// Process queued records until `shutdown` is cancelled or every sender
    /// has been dropped.
    ///
    /// Cancellation interrupts an in-flight apply. Once stopped the queue is
    /// closed, so further sends fail, and any records still queued are
    /// discarded.
    pub(crate) async fn run(mut self, shutdown: CancellationToken) {
        debug!(shard_id = self.shard_id, "starting message processor");

        loop {
            let record = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                record = self.queue.recv() => match record {
                    Some(v) => v,
                    None => break,
                },
            };

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.process(&record) => {},
            }
        }

        self.discard_queued();
    }

    /// Apply `record`, retrying for as long as the error strategy refuses to
    /// skip the failure.
    ///
    /// A panicking apply is handled like a failed one and does not stop the
    /// stage.
    async fn process(&self, record: &ReadResult<P, M>) {
        let pointer = record.pointer();
        loop {
            let applied = AssertUnwindSafe(self.engine.apply(pointer, record.message()))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(EnginePanic::from_payload(payload).into()));

            match applied {
                Ok(()) => {
                    self.counters.processed.inc();
                    trace!(
                        shard_id = self.shard_id,
                        pointer = %pointer.as_string(),
                        "applied record"
                    );
                    return;
                }
                Err(e) => {
                    self.counters.processing_errors.inc();
                    error!(
                        error = %e,
                        shard_id = self.shard_id,
                        pointer = %pointer.as_string(),
                        "failed to apply record"
                    );

                    if self.error_strategy.handle(&*e, ErrorStage::Processing) {
                        warn!(
                            shard_id = self.shard_id,
                            pointer = %pointer.as_string(),
                            potential_data_loss = true,
                            "skipping record that failed to apply"
                        );
                        return;
                    }
                }
            }

            tokio::time::sleep(self.retry_interval).await;
        }
    }

    fn discard_queued(&mut self) {
        self.queue.close();

        let mut discarded = 0_usize;
        while self.queue.try_recv().is_ok() {
            discarded += 1;
        }

        info!(
            shard_id = self.shard_id,
            discarded, "message processor stopped"
        );
    }
}
