//! Policies deciding whether an ingestion fault is skipped or stalls ingest.

use std::{fmt::Debug, fmt::Display, str::FromStr, sync::Arc};

use parking_lot::RwLock;
use tracing::{error, warn};

/// The pipeline stage a fault was observed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorStage {
    /// Reading from the shard, resetting its position or enqueuing records.
    Polling,
    /// Applying a dequeued record to the durable engine.
    Processing,
}

impl Display for ErrorStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Polling => f.write_str("polling"),
            Self::Processing => f.write_str("processing"),
        }
    }
}

/// Decides the fate of every fault caught by the poll loop and the processing
/// stage.
///
/// For each fault the caller invokes [`handle_error()`] exactly once and then
/// [`should_ignore_error()`] exactly once, in that order. An ignorable fault
/// lets the stage continue with the next record; a non-ignorable fault pauses
/// polling, or makes the processing stage retry the failed record.
///
/// [`handle_error()`]: IngestionErrorStrategy::handle_error
/// [`should_ignore_error()`]: IngestionErrorStrategy::should_ignore_error
pub trait IngestionErrorStrategy: Debug + Send + Sync {
    /// Record / report `error` observed in `stage`.
    fn handle_error(&self, error: &(dyn std::error::Error + 'static), stage: ErrorStage);

    /// Returns true if ingestion may continue past `error`.
    fn should_ignore_error(&self, error: &(dyn std::error::Error + 'static), stage: ErrorStage)
    -> bool;
}

/// Skip past every fault, accepting that the affected records are lost.
#[derive(Debug, Default, Clone, Copy)]
pub struct DropErrorStrategy;

impl IngestionErrorStrategy for DropErrorStrategy {
    fn handle_error(&self, error: &(dyn std::error::Error + 'static), stage: ErrorStage) {
        warn!(
            %error,
            %stage,
            potential_data_loss=true,
            "dropping record after ingestion error"
        );
    }

    fn should_ignore_error(
        &self,
        _error: &(dyn std::error::Error + 'static),
        _stage: ErrorStage,
    ) -> bool {
        true
    }
}

/// Stall ingestion on every fault until an operator intervenes.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlockErrorStrategy;

impl IngestionErrorStrategy for BlockErrorStrategy {
    fn handle_error(&self, error: &(dyn std::error::Error + 'static), stage: ErrorStage) {
        error!(%error, %stage, "blocking ingestion after ingestion error");
    }

    fn should_ignore_error(
        &self,
        _error: &(dyn std::error::Error + 'static),
        _stage: ErrorStage,
    ) -> bool {
        false
    }
}

/// The built-in strategies, selectable by name from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ErrorStrategyKind {
    /// See [`DropErrorStrategy`].
    #[default]
    Drop,
    /// See [`BlockErrorStrategy`].
    Block,
}

impl ErrorStrategyKind {
    /// Construct the strategy this kind names.
    pub fn build(&self) -> Arc<dyn IngestionErrorStrategy> {
        match self {
            Self::Drop => Arc::new(DropErrorStrategy),
            Self::Block => Arc::new(BlockErrorStrategy),
        }
    }
}

impl FromStr for ErrorStrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop" => Ok(Self::Drop),
            "block" => Ok(Self::Block),
            _ => Err(format!("unknown error strategy {s:?}")),
        }
    }
}

/// A shared, swappable slot holding the active [`IngestionErrorStrategy`].
///
/// The poll loop and the processing stage hold clones of the same handle, so
/// a single [`swap()`](Self::swap) changes the policy for both stages at once.
/// Readers take an [`Arc`] snapshot and never observe a partial update.
#[derive(Debug, Clone)]
pub struct ErrorStrategyHandle {
    inner: Arc<RwLock<Arc<dyn IngestionErrorStrategy>>>,
}

impl ErrorStrategyHandle {
    /// Wrap `strategy` in a new shared slot.
    pub fn new(strategy: Arc<dyn IngestionErrorStrategy>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(strategy)),
        }
    }

    /// The currently active strategy.
    pub fn current(&self) -> Arc<dyn IngestionErrorStrategy> {
        Arc::clone(&self.inner.read())
    }

    /// Replace the active strategy, returning the previous one.
    pub fn swap(
        &self,
        strategy: Arc<dyn IngestionErrorStrategy>,
    ) -> Arc<dyn IngestionErrorStrategy> {
        std::mem::replace(&mut *self.inner.write(), strategy)
    }

    /// Report `error` to the current strategy and return its verdict.
    ///
    /// Both calls are made against the same strategy snapshot, even if the
    /// strategy is swapped concurrently.
    pub fn handle(&self, error: &(dyn std::error::Error + 'static), stage: ErrorStage) -> bool {
        let strategy = self.current();
        strategy.handle_error(error, stage);
        strategy.should_ignore_error(error, stage)
    }
}
