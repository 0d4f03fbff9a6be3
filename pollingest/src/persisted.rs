//! Replay filtering against pointers durably applied by a previous run.

use std::collections::HashSet;

use crate::pointer::ShardPointer;

/// An immutable snapshot of the pointers already applied to the durable
/// engine before this poller began running.
///
/// The maximum pointer is computed once at construction. Any pointer greater
/// than it cannot be a member of the set, which lets the common case (reading
/// past everything persisted) skip the set lookup entirely.
#[derive(Debug, Clone)]
pub struct PersistedPointers<P> {
    pointers: HashSet<P>,
    max: Option<P>,
}

impl<P> Default for PersistedPointers<P> {
    fn default() -> Self {
        Self {
            pointers: HashSet::new(),
            max: None,
        }
    }
}

impl<P> PersistedPointers<P>
where
    P: ShardPointer,
{
    /// Build the filter from the set of persisted `pointers`.
    pub fn new(pointers: HashSet<P>) -> Self {
        let max = pointers.iter().max().cloned();
        Self { pointers, max }
    }

    /// Returns true if the record at `pointer` was already applied and must
    /// not be delivered again.
    pub fn is_processed(&self, pointer: &P) -> bool {
        match &self.max {
            None => false,
            Some(max) if pointer > max => false,
            Some(_) => self.pointers.contains(pointer),
        }
    }

    /// The greatest persisted pointer, if any.
    pub fn max(&self) -> Option<&P> {
        self.max.as_ref()
    }

    /// The number of persisted pointers.
    pub fn len(&self) -> usize {
        self.pointers.len()
    }

    /// Returns true if nothing was persisted.
    pub fn is_empty(&self) -> bool {
        self.pointers.is_empty()
    }
}

impl<P> FromIterator<P> for PersistedPointers<P>
where
    P: ShardPointer,
{
    fn from_iter<T: IntoIterator<Item = P>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
