//! Failure causes and defects.
//!
//! A [`Cause`] describes *why* a computation failed. Unlike a flat error
//! value, it is a small tree: sequential composition (`Then`) records
//! failures that happened one after another (a failing effect followed by a
//! failing finalizer), parallel composition (`Both`) records failures from
//! concurrent branches. Nothing is ever dropped when causes are combined.

use super::FiberId;
use core::fmt;

/// Payload describing a programmer-error condition, usually a caught panic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Defect {
    message: String,
}

impl Defect {
    /// Creates a defect with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Extracts a defect from a caught panic payload.
    #[must_use]
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Self { message }
    }

    /// Returns the defect message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "defect: {}", self.message)
    }
}

/// The reason a computation failed.
///
/// `Fail` carries an expected, typed error. `Die` carries a [`Defect`].
/// `Interrupt` records which fiber requested the interruption. `Then` and
/// `Both` compose causes without losing any of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cause<E> {
    /// An expected, typed error.
    Fail(E),
    /// An unexpected programmer-error condition.
    Die(Defect),
    /// Interruption, attributed to the requesting fiber.
    Interrupt(FiberId),
    /// Two causes that occurred in sequence.
    Then(Box<Cause<E>>, Box<Cause<E>>),
    /// Two causes that occurred concurrently.
    Both(Box<Cause<E>>, Box<Cause<E>>),
}

impl<E> Cause<E> {
    /// Creates an interruption cause.
    #[must_use]
    pub const fn interrupt(fiber: FiberId) -> Self {
        Self::Interrupt(fiber)
    }

    /// Creates a defect cause from a message.
    #[must_use]
    pub fn die(message: impl Into<String>) -> Self {
        Self::Die(Defect::new(message))
    }

    /// Sequentially combines two causes.
    #[must_use]
    pub fn then(self, second: Self) -> Self {
        Self::Then(Box::new(self), Box::new(second))
    }

    /// Combines two causes that occurred in parallel.
    #[must_use]
    pub fn both(self, other: Self) -> Self {
        Self::Both(Box::new(self), Box::new(other))
    }

    /// Returns true if any part of this cause is an interruption.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        match self {
            Self::Interrupt(_) => true,
            Self::Fail(_) | Self::Die(_) => false,
            Self::Then(a, b) | Self::Both(a, b) => a.is_interrupted() || b.is_interrupted(),
        }
    }

    /// Returns true if this cause contains only interruptions.
    #[must_use]
    pub fn is_interrupted_only(&self) -> bool {
        match self {
            Self::Interrupt(_) => true,
            Self::Fail(_) | Self::Die(_) => false,
            Self::Then(a, b) | Self::Both(a, b) => {
                a.is_interrupted_only() && b.is_interrupted_only()
            }
        }
    }

    /// Collects references to every expected error, left to right.
    #[must_use]
    pub fn failures(&self) -> Vec<&E> {
        let mut out = Vec::new();
        self.visit(&mut |cause| {
            if let Self::Fail(e) = cause {
                out.push(e);
            }
        });
        out
    }

    /// Collects references to every defect, left to right.
    #[must_use]
    pub fn defects(&self) -> Vec<&Defect> {
        let mut out = Vec::new();
        self.visit(&mut |cause| {
            if let Self::Die(d) = cause {
                out.push(d);
            }
        });
        out
    }

    /// Collects the fibers whose interruptions appear in this cause.
    #[must_use]
    pub fn interruptors(&self) -> Vec<FiberId> {
        let mut out = Vec::new();
        self.visit(&mut |cause| {
            if let Self::Interrupt(id) = cause {
                out.push(*id);
            }
        });
        out
    }

    /// Maps the typed error through `f`, leaving the tree shape intact.
    pub fn map<E2, F: Fn(E) -> E2>(self, f: &F) -> Cause<E2> {
        match self {
            Self::Fail(e) => Cause::Fail(f(e)),
            Self::Die(d) => Cause::Die(d),
            Self::Interrupt(id) => Cause::Interrupt(id),
            Self::Then(a, b) => Cause::Then(Box::new(a.map(f)), Box::new(b.map(f))),
            Self::Both(a, b) => Cause::Both(Box::new(a.map(f)), Box::new(b.map(f))),
        }
    }

    fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Self)) {
        f(self);
        if let Self::Then(a, b) | Self::Both(a, b) = self {
            a.visit(f);
            b.visit(f);
        }
    }
}

impl<E: fmt::Display> fmt::Display for Cause<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fail(e) => write!(f, "{e}"),
            Self::Die(d) => write!(f, "{d}"),
            Self::Interrupt(id) => write!(f, "interrupted by {id}"),
            Self::Then(a, b) => write!(f, "{a}; then {b}"),
            Self::Both(a, b) => write!(f, "{a}; alongside {b}"),
        }
    }
}
