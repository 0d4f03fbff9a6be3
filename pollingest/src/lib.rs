//! A resilient, pull-based poller for a single shard of an ordered,
//! offset-addressable stream.
//!
//! A [`StreamPoller`] continuously reads batches of records from a
//! [`ShardConsumer`] and applies them, one at a time and in shard order, to an
//! [`IngestionEngine`]. The two halves run as separate tokio tasks connected
//! by a bounded queue:
//!
//! ```text
//!                  ┌───────────┐   bounded    ┌────────────────┐
//!   ShardConsumer ─► poll loop ├─────queue───► processing task ├─► IngestionEngine
//!                  └─────┬─────┘              └───────┬────────┘
//!                        │                            │
//!                        └──► IngestionErrorStrategy ◄┘
//! ```
//!
//! ## Restarts
//!
//! A poller is constructed with the pointer to resume from and the set of
//! pointers a previous run durably applied ([`PersistedPointers`]). The first
//! read includes the start pointer, and any record found in the persisted set
//! is skipped, so restarting from an earlier position never applies a record
//! twice. A one-shot [`ResetPolicy`] may move the start position before the
//! first read.
//!
//! ## Faults
//!
//! Faults never stop either task. Each is reported to the active
//! [`IngestionErrorStrategy`], which decides whether it is ignored. A
//! non-ignorable polling fault pauses the poller until
//! [`StreamPoller::resume()`]; a non-ignorable processing fault is retried
//! until it clears or the strategy is swapped with
//! [`StreamPoller::update_error_strategy()`].

mod config;
mod consumer;
mod error_strategy;
pub mod mock;
mod persisted;
mod pointer;
mod poll_loop;
mod poller;
mod processor;
mod reset;
mod state;
mod stats;

#[cfg(test)]
mod test_util;

pub use config::*;
pub use consumer::{ConsumerError, ReadBatch, ShardConsumer};
pub use error_strategy::{
    BlockErrorStrategy, DropErrorStrategy, ErrorStage, ErrorStrategyHandle, ErrorStrategyKind,
    IngestionErrorStrategy,
};
pub use persisted::PersistedPointers;
pub use pointer::{OffsetPointer, ReadResult, ShardPointer};
pub use poll_loop::PollError;
pub use poller::{PollerError, PollerOptions, StreamPoller};
pub use processor::{EngineError, IngestionEngine};
pub use reset::{ResetPolicy, ResetPolicyError, ResetState};
pub use state::State;
pub use stats::PollingIngestStats;
