//! Global event sequence numbers.
//!
//! One atomic counter stamps every published event, providing the total
//! order that per-user delivery, catch-up replay, and idempotent
//! application all key off.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Position of an event in the global publish order.
///
/// `Sequence::ZERO` is never assigned to an event; it is the cursor value
/// of a client that has seen nothing.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Sequence(u64);

impl Sequence {
    /// The cursor value before any event has been seen.
    pub const ZERO: Sequence = Sequence(0);

    /// Creates a sequence from a raw value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// The immediately following sequence.
    pub fn next(&self) -> Sequence {
        Sequence(self.0 + 1)
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Allocates monotonically increasing sequences.
///
/// The one globally shared mutable resource in the core; everything else
/// is partitioned by user or chat key.
#[derive(Debug, Default)]
pub struct SequenceAllocator {
    counter: AtomicU64,
}

impl SequenceAllocator {
    /// Creates an allocator starting at zero (first allocation is 1).
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    /// Creates an allocator that resumes after `last`, e.g. from the head
    /// of a restored event log.
    pub fn resume_after(last: Sequence) -> Self {
        Self {
            counter: AtomicU64::new(last.as_u64()),
        }
    }

    /// Allocates the next sequence.
    pub fn allocate(&self) -> Sequence {
        Sequence(self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// The most recently allocated sequence (ZERO if none).
    pub fn last_allocated(&self) -> Sequence {
        Sequence(self.counter.load(Ordering::SeqCst))
    }
}
