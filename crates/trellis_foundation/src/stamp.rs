//! Monotonic change stamps.
//!
//! Every committed change in the store is tagged with a fresh [`Stamp`].
//! Anything observable (a field, a record's shape, an index bucket, a
//! selector's cached value) remembers the stamp of its last change, so
//! "did this change identity?" is a single integer comparison.

use std::cell::Cell;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A point in the store's change history.
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Stamp(u64);

impl Stamp {
    /// Stamp of things that have never changed (or do not exist yet).
    pub const ZERO: Stamp = Stamp(0);

    /// Returns the raw counter value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Issues strictly increasing stamps.
///
/// The clock is never rolled back, even when store state is restored from a
/// snapshot, so a stamp handed out once is never handed out again.
#[derive(Debug, Default)]
pub struct Clock {
    last: Cell<u64>,
}

impl Clock {
    /// Creates a clock whose first tick is `@1`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a fresh stamp.
    pub fn tick(&self) -> Stamp {
        let next = self.last.get() + 1;
        self.last.set(next);
        Stamp(next)
    }

    /// Returns the most recently issued stamp.
    #[must_use]
    pub fn now(&self) -> Stamp {
        Stamp(self.last.get())
    }
}
