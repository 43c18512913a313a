//! Error values.
//!
//! These primitives signal expected conditions (a full buffer, an
//! already-completed future) through `bool`/`Option` returns, never through
//! errors. The one condition that propagates as an error is interruption: a
//! parked fiber whose wait was cancelled, or any operation attempted on a
//! shut-down queue.

use crate::types::{Cause, FiberId};

/// A fiber's blocking operation was interrupted.
///
/// Carries the identity of the interrupting fiber when it is known. On a
/// shut-down queue the calling fiber self-interrupts, so `by` names the
/// caller itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("interrupted by {by}")]
pub struct Interrupted {
    /// The fiber that requested the interruption.
    pub by: FiberId,
}

impl Interrupted {
    /// Creates an interruption attributed to `by`.
    #[must_use]
    pub const fn by(by: FiberId) -> Self {
        Self { by }
    }

    /// Converts into a failure cause.
    #[must_use]
    pub const fn into_cause<E>(self) -> Cause<E> {
        Cause::Interrupt(self.by)
    }
}
