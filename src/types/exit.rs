//! The terminal outcome of a computation.
//!
//! An [`Exit`] is either a success value or a [`Cause`] describing the
//! failure, including interruption. Finalizers receive the exit of the scope
//! they were registered in; futures deliver an exit to every waiter.

use super::{Cause, Defect, FiberId};
use core::fmt;

/// The terminal outcome of a computation: success, or failure with a cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit<A, E> {
    /// The computation produced a value.
    Success(A),
    /// The computation failed; the cause says how.
    Failure(Cause<E>),
}

impl<A, E> Exit<A, E> {
    /// Creates a successful exit.
    #[must_use]
    pub const fn succeed(value: A) -> Self {
        Self::Success(value)
    }

    /// Creates a failed exit from a typed error.
    #[must_use]
    pub const fn fail(error: E) -> Self {
        Self::Failure(Cause::Fail(error))
    }

    /// Creates a failed exit from a full cause.
    #[must_use]
    pub const fn fail_cause(cause: Cause<E>) -> Self {
        Self::Failure(cause)
    }

    /// Creates an interrupted exit attributed to `fiber`.
    #[must_use]
    pub const fn interrupt(fiber: FiberId) -> Self {
        Self::Failure(Cause::Interrupt(fiber))
    }

    /// Creates an exit that died with a defect.
    #[must_use]
    pub const fn die(defect: Defect) -> Self {
        Self::Failure(Cause::Die(defect))
    }

    /// Returns true if this exit is a success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns true if this exit is a failure of any kind.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Returns true if this exit failed with an interruption somewhere in
    /// its cause.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        match self {
            Self::Success(_) => false,
            Self::Failure(cause) => cause.is_interrupted(),
        }
    }

    /// Maps the success value.
    pub fn map<B, F: FnOnce(A) -> B>(self, f: F) -> Exit<B, E> {
        match self {
            Self::Success(a) => Exit::Success(f(a)),
            Self::Failure(cause) => Exit::Failure(cause),
        }
    }

    /// Maps the typed error inside the cause.
    pub fn map_err<E2, F: Fn(E) -> E2>(self, f: F) -> Exit<A, E2> {
        match self {
            Self::Success(a) => Exit::Success(a),
            Self::Failure(cause) => Exit::Failure(cause.map(&f)),
        }
    }

    /// Erases the success value, keeping the cause on failure.
    ///
    /// Scopes close with a value-erased exit; finalizers only observe the
    /// success/failure shape.
    #[must_use]
    pub fn unit(&self) -> Exit<(), E>
    where
        E: Clone,
    {
        match self {
            Self::Success(_) => Exit::Success(()),
            Self::Failure(cause) => Exit::Failure(cause.clone()),
        }
    }

    /// Converts to a standard `Result`, surfacing the full cause as the error.
    pub fn into_result(self) -> Result<A, Cause<E>> {
        match self {
            Self::Success(a) => Ok(a),
            Self::Failure(cause) => Err(cause),
        }
    }

    /// Returns the success value or panics.
    ///
    /// # Panics
    ///
    /// Panics if the exit is a failure.
    #[track_caller]
    pub fn unwrap(self) -> A
    where
        E: fmt::Debug,
    {
        match self {
            Self::Success(a) => a,
            Self::Failure(cause) => {
                panic!("called `Exit::unwrap()` on a `Failure` value: {cause:?}")
            }
        }
    }
}

impl<A, E> From<Result<A, E>> for Exit<A, E> {
    fn from(result: Result<A, E>) -> Self {
        match result {
            Ok(a) => Self::Success(a),
            Err(e) => Self::fail(e),
        }
    }
}
