//! In-memory implementations of the poller's collaborators, for tests.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, watch};

use crate::{
    consumer::{ConsumerError, ReadBatch, ShardConsumer},
    error_strategy::{ErrorStage, IngestionErrorStrategy},
    pointer::{OffsetPointer, ReadResult},
    processor::{EngineError, IngestionEngine},
};

/// A read call observed by a [`MockShardConsumer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadCall {
    /// A continuation read via [`ShardConsumer::read_next()`].
    Next,
    /// A positioned read via [`ShardConsumer::read_next_from()`].
    From {
        /// The requested start position.
        pointer: OffsetPointer,
        /// Whether the start position was requested inclusively.
        include_start: bool,
    },
}

#[derive(Debug)]
struct StoredRecord {
    offset: i64,
    message: String,
    timestamp_ms: i64,
}

#[derive(Debug, Default)]
struct Log {
    records: Vec<StoredRecord>,
    read_errors: VecDeque<String>,
    read_failure: Option<String>,
    reads: Vec<ReadCall>,
}

/// The shard contents of a [`MockShardConsumer`], shared with the test that
/// created it.
///
/// Records must be pushed in strictly increasing offset order.
#[derive(Debug, Clone, Default)]
pub struct MockShardState {
    log: Arc<Mutex<Log>>,
    notify: Arc<Notify>,
}

impl MockShardState {
    /// Append `message` at the offset following the last record, returning
    /// its position.
    pub fn push(&self, message: impl Into<String>) -> OffsetPointer {
        let offset = self.log.lock().records.last().map_or(0, |r| r.offset + 1);
        self.push_at(offset, message, offset);
        OffsetPointer::new(offset)
    }

    /// Append `message` at `offset`, written at `timestamp_ms`.
    ///
    /// # Panics
    ///
    /// Panics if `offset` does not follow the last record.
    pub fn push_at(&self, offset: i64, message: impl Into<String>, timestamp_ms: i64) {
        let mut log = self.log.lock();
        if let Some(last) = log.records.last() {
            assert!(offset > last.offset, "offsets must be strictly increasing");
        }
        log.records.push(StoredRecord {
            offset,
            message: message.into(),
            timestamp_ms,
        });
        drop(log);

        self.notify.notify_waiters();
    }

    /// Fail the next read with an error rendering as `message`.
    pub fn push_read_error(&self, message: impl Into<String>) {
        self.log.lock().read_errors.push_back(message.into());
        self.notify.notify_waiters();
    }

    /// Fail every subsequent read with an error rendering as `message`.
    pub fn fail_reads(&self, message: impl Into<String>) {
        self.log.lock().read_failure = Some(message.into());
        self.notify.notify_waiters();
    }

    /// All read calls made so far, in order.
    pub fn reads(&self) -> Vec<ReadCall> {
        self.log.lock().reads.clone()
    }

    fn earliest(&self) -> i64 {
        self.log.lock().records.first().map_or(0, |r| r.offset)
    }

    fn latest(&self) -> i64 {
        self.log.lock().records.last().map_or(0, |r| r.offset + 1)
    }

    fn offset_for_timestamp(&self, timestamp_ms: i64) -> i64 {
        let log = self.log.lock();
        log.records
            .iter()
            .find(|r| r.timestamp_ms >= timestamp_ms)
            .map(|r| r.offset)
            .unwrap_or_else(|| log.records.last().map_or(0, |r| r.offset + 1))
    }

    fn records_from(&self, from: i64, max: usize) -> Vec<ReadResult<OffsetPointer, String>> {
        self.log
            .lock()
            .records
            .iter()
            .filter(|r| r.offset >= from)
            .take(max)
            .map(|r| ReadResult::new(OffsetPointer::new(r.offset), r.message.clone()))
            .collect()
    }
}

/// A [`ShardConsumer`] over a [`MockShardState`].
///
/// Like a Kafka consumer it tracks the next offset to read: continuation reads
/// resume after the last record returned, and positioned reads move the
/// cursor first. A new consumer starts at offset 0.
#[derive(Debug)]
pub struct MockShardConsumer {
    shard_id: u32,
    state: MockShardState,
    cursor: i64,
}

impl MockShardConsumer {
    /// A consumer for shard `shard_id` over a new, empty shard.
    pub fn new(shard_id: u32) -> Self {
        Self::with_state(shard_id, MockShardState::default())
    }

    /// A consumer for shard `shard_id` over existing shard contents.
    pub fn with_state(shard_id: u32, state: MockShardState) -> Self {
        Self {
            shard_id,
            state,
            cursor: 0,
        }
    }

    /// The shard contents this consumer reads.
    pub fn state(&self) -> &MockShardState {
        &self.state
    }

    async fn read(
        &mut self,
        max: usize,
        timeout: Duration,
    ) -> Result<ReadBatch<Self>, ConsumerError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let notify = Arc::clone(&self.state.notify);

        loop {
            // Register interest before inspecting the log so a concurrent push
            // cannot be missed.
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let read_error = {
                let mut log = self.state.log.lock();
                log.read_errors
                    .pop_front()
                    .or_else(|| log.read_failure.clone())
            };
            if let Some(e) = read_error {
                return Err(e.into());
            }

            let batch = self.state.records_from(self.cursor, max);
            if let Some(last) = batch.last() {
                self.cursor = last.pointer().get() + 1;
                return Ok(batch);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(vec![]);
            }
        }
    }
}

#[async_trait]
impl ShardConsumer for MockShardConsumer {
    type Pointer = OffsetPointer;
    type Message = String;

    fn shard_id(&self) -> u32 {
        self.shard_id
    }

    async fn read_next(
        &mut self,
        max: usize,
        timeout: Duration,
    ) -> Result<ReadBatch<Self>, ConsumerError> {
        self.state.log.lock().reads.push(ReadCall::Next);
        self.read(max, timeout).await
    }

    async fn read_next_from(
        &mut self,
        pointer: &OffsetPointer,
        include_start: bool,
        max: usize,
        timeout: Duration,
    ) -> Result<ReadBatch<Self>, ConsumerError> {
        self.state.log.lock().reads.push(ReadCall::From {
            pointer: *pointer,
            include_start,
        });
        self.cursor = if include_start {
            pointer.get()
        } else {
            pointer.get() + 1
        };
        self.read(max, timeout).await
    }

    async fn earliest_pointer(&self) -> Result<OffsetPointer, ConsumerError> {
        Ok(OffsetPointer::new(self.state.earliest()))
    }

    async fn latest_pointer(&self) -> Result<OffsetPointer, ConsumerError> {
        Ok(OffsetPointer::new(self.state.latest()))
    }

    async fn pointer_from_offset(&self, offset: &str) -> Result<OffsetPointer, ConsumerError> {
        Ok(offset.parse::<OffsetPointer>()?)
    }

    async fn pointer_from_timestamp_millis(
        &self,
        timestamp_ms: i64,
    ) -> Result<OffsetPointer, ConsumerError> {
        Ok(OffsetPointer::new(
            self.state.offset_for_timestamp(timestamp_ms),
        ))
    }
}

/// An [`IngestionEngine`] recording every record it applies.
#[derive(Debug)]
pub struct MockIngestionEngine {
    applied: Mutex<Vec<(OffsetPointer, String)>>,
    failing: Mutex<Vec<OffsetPointer>>,
    panicking: Mutex<Vec<OffsetPointer>>,
    gate: watch::Sender<bool>,
    in_flight: AtomicBool,
}

impl Default for MockIngestionEngine {
    fn default() -> Self {
        Self {
            applied: Default::default(),
            failing: Default::default(),
            panicking: Default::default(),
            gate: watch::Sender::new(true),
            in_flight: AtomicBool::new(false),
        }
    }
}

impl MockIngestionEngine {
    /// The records applied so far, in order.
    pub fn applied(&self) -> Vec<(OffsetPointer, String)> {
        self.applied.lock().clone()
    }

    /// Fail every apply of the record at `pointer` until
    /// [`clear_failures()`](Self::clear_failures) is called.
    pub fn fail_pointer(&self, pointer: OffsetPointer) {
        self.failing.lock().push(pointer);
    }

    /// Panic inside every apply of the record at `pointer`.
    pub fn panic_on(&self, pointer: OffsetPointer) {
        self.panicking.lock().push(pointer);
    }

    /// Stop failing applies.
    pub fn clear_failures(&self) {
        self.failing.lock().clear();
    }

    /// Stall every subsequent apply until [`unblock()`](Self::unblock).
    pub fn block(&self) {
        self.gate.send_replace(false);
    }

    /// Release stalled applies.
    pub fn unblock(&self) {
        self.gate.send_replace(true);
    }

    /// Returns true while an apply is stalled or in progress.
    pub fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IngestionEngine<OffsetPointer, String> for MockIngestionEngine {
    async fn apply(&self, pointer: &OffsetPointer, message: &String) -> Result<(), EngineError> {
        self.in_flight.store(true, Ordering::SeqCst);
        let mut gate = self.gate.subscribe();
        let opened = gate.wait_for(|open| *open).await.is_ok();
        self.in_flight.store(false, Ordering::SeqCst);

        if !opened {
            return Err("engine gate dropped".into());
        }
        let panics = self.panicking.lock().contains(pointer);
        if panics {
            panic!("engine bug applying record at {pointer}");
        }
        if self.failing.lock().contains(pointer) {
            return Err(format!("failed to apply record at {pointer}").into());
        }

        self.applied.lock().push((*pointer, message.clone()));
        Ok(())
    }
}

/// An [`IngestionErrorStrategy`] recording the calls made to it, with a
/// switchable verdict.
#[derive(Debug)]
pub struct MockErrorStrategy {
    ignore: AtomicBool,
    handled: AtomicUsize,
    calls: Mutex<Vec<(&'static str, ErrorStage)>>,
}

impl MockErrorStrategy {
    /// A strategy answering `ignore` to every
    /// [`should_ignore_error()`](IngestionErrorStrategy::should_ignore_error).
    pub fn new(ignore: bool) -> Self {
        Self {
            ignore: AtomicBool::new(ignore),
            handled: AtomicUsize::new(0),
            calls: Default::default(),
        }
    }

    /// Change the verdict for subsequent faults.
    pub fn set_ignore(&self, ignore: bool) {
        self.ignore.store(ignore, Ordering::SeqCst);
    }

    /// The number of faults reported via
    /// [`handle_error()`](IngestionErrorStrategy::handle_error).
    pub fn handled_count(&self) -> usize {
        self.handled.load(Ordering::SeqCst)
    }

    /// The ordered log of calls, as `("handle" | "should_ignore", stage)`.
    pub fn calls(&self) -> Vec<(&'static str, ErrorStage)> {
        self.calls.lock().clone()
    }
}

impl IngestionErrorStrategy for MockErrorStrategy {
    fn handle_error(&self, _error: &(dyn std::error::Error + 'static), stage: ErrorStage) {
        self.handled.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().push(("handle", stage));
    }

    fn should_ignore_error(
        &self,
        _error: &(dyn std::error::Error + 'static),
        stage: ErrorStage,
    ) -> bool {
        self.calls.lock().push(("should_ignore", stage));
        self.ignore.load(Ordering::SeqCst)
    }
}
