//! Fiber identity.
//!
//! A [`FiberId`] names a lightweight cooperative task. The primitives in this
//! crate only use it for diagnostics (what a parked fiber is blocked on) and
//! for attributing interruptions to their requester; they never dereference it.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_FIBER: AtomicU64 = AtomicU64::new(1);

/// A unique identifier for a fiber.
///
/// Ids are allocated from a process-wide counter and are never reused within
/// a process lifetime.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiberId(u64);

impl FiberId {
    /// Allocates a fresh fiber id.
    #[must_use]
    pub fn fresh() -> Self {
        Self(NEXT_FIBER.fetch_add(1, Ordering::Relaxed))
    }

    /// The reserved id for completions not attributable to any fiber
    /// (e.g. a queue's shutdown hook before any caller is known).
    pub const NONE: Self = Self(0);

    /// Returns the raw numeric value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Creates a fiber id for testing purposes.
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FiberId({})", self.0)
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F{}", self.0)
    }
}
