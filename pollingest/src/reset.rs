//! One-shot translation of a symbolic restart instruction into a concrete
//! starting position.

use std::{fmt::Display, str::FromStr};

use thiserror::Error;

use crate::consumer::{ConsumerError, ShardConsumer};

/// Errors building a [`ResetPolicy`] from its configured parts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResetPolicyError {
    /// A rewind was requested without the offset / timestamp to rewind to.
    #[error("reset state {0} requires a reset value")]
    MissingValue(ResetState),

    /// The rewind timestamp is not an integer number of milliseconds.
    #[error("invalid reset timestamp {value:?}: expected milliseconds since epoch")]
    InvalidTimestamp {
        /// The rejected input.
        value: String,
    },

    /// The reset state name is not recognised.
    #[error("unknown reset state {0:?}")]
    UnknownState(String),
}

/// The symbolic restart instruction, as it appears in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum ResetState {
    /// Resume from the configured start pointer.
    #[default]
    None,
    /// Seek to the oldest available record.
    Earliest,
    /// Seek past the most recent record, ignoring the backlog.
    Latest,
    /// Seek to a source-specific offset literal.
    RewindByOffset,
    /// Seek to the first record at or after a millisecond timestamp.
    RewindByTimestamp,
}

impl Display for ResetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Earliest => "earliest",
            Self::Latest => "latest",
            Self::RewindByOffset => "rewind_by_offset",
            Self::RewindByTimestamp => "rewind_by_timestamp",
        };
        f.write_str(s)
    }
}

impl FromStr for ResetState {
    type Err = ResetPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "earliest" => Ok(Self::Earliest),
            "latest" => Ok(Self::Latest),
            "rewind_by_offset" => Ok(Self::RewindByOffset),
            "rewind_by_timestamp" => Ok(Self::RewindByTimestamp),
            _ => Err(ResetPolicyError::UnknownState(s.to_string())),
        }
    }
}

/// A pending reset of the poller's read position, applied at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ResetPolicy {
    /// No reset pending.
    #[default]
    None,
    /// Seek to the oldest available record.
    Earliest,
    /// Seek past the most recent record.
    Latest,
    /// Seek to the given offset literal.
    RewindByOffset(String),
    /// Seek to the given timestamp, in milliseconds since the UNIX epoch.
    RewindByTimestamp(i64),
}

impl ResetPolicy {
    /// Build a policy from a configured [`ResetState`] and its optional
    /// literal value.
    ///
    /// The value is ignored for states that do not take one.
    pub fn from_parts(state: ResetState, value: Option<&str>) -> Result<Self, ResetPolicyError> {
        let value = value.map(str::trim).filter(|v| !v.is_empty());
        match state {
            ResetState::None => Ok(Self::None),
            ResetState::Earliest => Ok(Self::Earliest),
            ResetState::Latest => Ok(Self::Latest),
            ResetState::RewindByOffset => value
                .map(|v| Self::RewindByOffset(v.to_string()))
                .ok_or(ResetPolicyError::MissingValue(state)),
            ResetState::RewindByTimestamp => {
                let value = value.ok_or(ResetPolicyError::MissingValue(state))?;
                value
                    .parse::<i64>()
                    .map(Self::RewindByTimestamp)
                    .map_err(|_| ResetPolicyError::InvalidTimestamp {
                        value: value.to_string(),
                    })
            }
        }
    }

    /// The symbolic state of this policy.
    pub fn state(&self) -> ResetState {
        match self {
            Self::None => ResetState::None,
            Self::Earliest => ResetState::Earliest,
            Self::Latest => ResetState::Latest,
            Self::RewindByOffset(_) => ResetState::RewindByOffset,
            Self::RewindByTimestamp(_) => ResetState::RewindByTimestamp,
        }
    }

    /// Returns true if there is no reset to apply.
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Resolve this policy into a concrete pointer using the positional
    /// queries of `consumer`.
    ///
    /// Returns `Ok(None)` for [`ResetPolicy::None`] without touching the
    /// consumer.
    pub async fn resolve<C>(&self, consumer: &C) -> Result<Option<C::Pointer>, ConsumerError>
    where
        C: ShardConsumer,
    {
        let pointer = match self {
            Self::None => return Ok(None),
            Self::Earliest => consumer.earliest_pointer().await?,
            Self::Latest => consumer.latest_pointer().await?,
            Self::RewindByOffset(offset) => consumer.pointer_from_offset(offset).await?,
            Self::RewindByTimestamp(ts) => consumer.pointer_from_timestamp_millis(*ts).await?,
        };
        Ok(Some(pointer))
    }
}
