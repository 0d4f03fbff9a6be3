//! Shard positions and the record envelopes they address.

use std::{
    fmt::{Debug, Display},
    hash::Hash,
    num::ParseIntError,
    str::FromStr,
};

use serde::{Deserialize, Serialize};

/// An opaque, totally ordered position within a single shard.
///
/// The [`Ord`] implementation defines "more recent than": for two pointers
/// `a` and `b` read from the same shard, `a > b` means `a` was appended after
/// `b`.
pub trait ShardPointer: Ord + Hash + Clone + Debug + Display + Send + Sync + 'static {
    /// Render this pointer for logging and diagnostics.
    ///
    /// The rendering is stable for the lifetime of the pointer.
    fn as_string(&self) -> String {
        self.to_string()
    }
}

/// A [`ShardPointer`] for sources addressed by a monotonically increasing
/// integer offset, such as a Kafka partition.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct OffsetPointer(i64);

impl OffsetPointer {
    /// Construct a pointer at `offset`.
    pub const fn new(offset: i64) -> Self {
        Self(offset)
    }

    /// The raw offset value.
    pub const fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for OffsetPointer {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl FromStr for OffsetPointer {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl Display for OffsetPointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ShardPointer for OffsetPointer {}

/// A single record read from a shard: the position it was read at, and the
/// uninterpreted message stored there.
///
/// Produced by a [`ShardConsumer`] and forwarded, unmodified, to the
/// processing stage.
///
/// [`ShardConsumer`]: crate::consumer::ShardConsumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResult<P, M> {
    pointer: P,
    message: M,
}

impl<P, M> ReadResult<P, M> {
    /// Pair `message` with the `pointer` it was read from.
    pub fn new(pointer: P, message: M) -> Self {
        Self { pointer, message }
    }

    /// The position this record was read from.
    pub fn pointer(&self) -> &P {
        &self.pointer
    }

    /// The payload of this record.
    pub fn message(&self) -> &M {
        &self.message
    }

    /// Split the record into its pointer and message.
    pub fn into_parts(self) -> (P, M) {
        (self.pointer, self.message)
    }
}
