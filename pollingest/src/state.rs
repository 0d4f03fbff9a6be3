//! Desired (goal) and actual (observed) poller state.
//!
//! The two are kept apart: the lifecycle operations write the goal
//! flags and the poll loop converges on them, so a poller may be "closing"
//! while it still reports [`State::Polling`] for up to one iteration.

use std::{
    fmt::Display,
    str::FromStr,
    sync::atomic::{AtomicBool, AtomicU8, Ordering},
};

/// The state the poll loop is currently in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum State {
    /// Not yet started.
    #[default]
    None = 0,
    /// Reading from the shard.
    Polling = 1,
    /// Dispatching a non-empty batch into the hand-off queue.
    Processing = 2,
    /// Idle at the request of the goal state.
    Paused = 3,
    /// The poll loop has exited. Terminal.
    Closed = 4,
}

impl State {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Polling,
            2 => Self::Processing,
            3 => Self::Paused,
            4 => Self::Closed,
            _ => Self::None,
        }
    }
}

impl Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "NONE",
            Self::Polling => "POLLING",
            Self::Processing => "PROCESSING",
            Self::Paused => "PAUSED",
            Self::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

impl FromStr for State {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => Ok(Self::None),
            "POLLING" => Ok(Self::Polling),
            "PROCESSING" => Ok(Self::Processing),
            "PAUSED" => Ok(Self::Paused),
            "CLOSED" => Ok(Self::Closed),
            _ => Err(format!("unknown poller state {s:?}")),
        }
    }
}

/// The observed [`State`], written only by the poll loop and readable from
/// any thread.
#[derive(Debug)]
pub(crate) struct ObservedState(AtomicU8);

impl ObservedState {
    pub(crate) fn new(initial: State) -> Self {
        Self(AtomicU8::new(initial as u8))
    }

    pub(crate) fn get(&self) -> State {
        State::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub(crate) fn set(&self, state: State) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

/// The desired behaviour of the poller.
///
/// `started` and `closed` only ever transition from false to true. `paused`
/// toggles freely.
#[derive(Debug, Default)]
pub(crate) struct GoalState {
    started: AtomicBool,
    closed: AtomicBool,
    paused: AtomicBool,
}

impl GoalState {
    /// Mark the poller started, returning false if it already was.
    pub(crate) fn mark_started(&self) -> bool {
        !self.started.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub(crate) fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}
