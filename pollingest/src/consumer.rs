use std::{fmt::Debug, time::Duration};

use async_trait::async_trait;

use crate::pointer::{ReadResult, ShardPointer};

/// Generic boxed error type returned by [`ShardConsumer`] implementations.
///
/// The dynamic boxing makes it easier to deal with errors from different
/// source clients.
pub type ConsumerError = Box<dyn std::error::Error + Sync + Send>;

/// The batch of records returned by a single read.
pub type ReadBatch<C> =
    Vec<ReadResult<<C as ShardConsumer>::Pointer, <C as ShardConsumer>::Message>>;

/// A client reading ordered records from a single shard of a data source.
///
/// Implementations track their own read position: [`read_next()`] continues
/// strictly after the last record returned by the previous read, while
/// [`read_next_from()`] repositions the consumer before reading.
///
/// [`read_next()`]: ShardConsumer::read_next
/// [`read_next_from()`]: ShardConsumer::read_next_from
#[async_trait]
pub trait ShardConsumer: Debug + Send + Sync + 'static {
    /// The position type of this source.
    type Pointer: ShardPointer;

    /// The payload type of this source.
    type Message: Debug + Send + Sync + 'static;

    /// The shard this consumer reads from, used as log context.
    fn shard_id(&self) -> u32;

    /// Read up to `max` records following the last record returned, waiting
    /// at most `timeout` for data to become available.
    ///
    /// An empty batch is a valid response when no new records arrived within
    /// `timeout`.
    async fn read_next(
        &mut self,
        max: usize,
        timeout: Duration,
    ) -> Result<ReadBatch<Self>, ConsumerError>;

    /// Reposition the consumer at `pointer` and read up to `max` records.
    ///
    /// If `include_start` is true, the record at `pointer` is the first record
    /// returned (if it exists), otherwise reading starts strictly after it.
    async fn read_next_from(
        &mut self,
        pointer: &Self::Pointer,
        include_start: bool,
        max: usize,
        timeout: Duration,
    ) -> Result<ReadBatch<Self>, ConsumerError>;

    /// The oldest position still available in the shard.
    async fn earliest_pointer(&self) -> Result<Self::Pointer, ConsumerError>;

    /// The position following the most recent record in the shard.
    async fn latest_pointer(&self) -> Result<Self::Pointer, ConsumerError>;

    /// Translate a source-specific offset literal into a position.
    async fn pointer_from_offset(&self, offset: &str) -> Result<Self::Pointer, ConsumerError>;

    /// The position of the first record written at or after `timestamp_ms`
    /// (milliseconds since the UNIX epoch).
    async fn pointer_from_timestamp_millis(
        &self,
        timestamp_ms: i64,
    ) -> Result<Self::Pointer, ConsumerError>;
}
