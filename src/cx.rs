//! The fiber capability context.
//!
//! A [`Cx`] is the token a fiber carries into every blocking operation. It
//! provides:
//!
//! - **Identity**: the fiber's [`FiberId`], used to attribute waits and
//!   interruptions.
//! - **Interruption**: an interrupt-request flag observed at checkpoints.
//! - **Masking**: an uninterruptible-region primitive so a check-then-register
//!   step can never observe interruption halfway through.
//!
//! # Interruption model
//!
//! Interruption is cooperative: requesting it sets a flag, and the target
//! fiber observes it the next time it calls [`Cx::checkpoint`] outside a
//! masked region. Blocking primitives in this crate park in
//! lock → check → checkpoint → condvar-wait loops, so a parked fiber notices
//! the request within one wait quantum and unwinds by removing its own
//! registration.
//!
//! `Cx` is cheaply clonable; clones share the same flag and mask, so an
//! interrupt requested through one clone is visible to all.

use crate::error::Interrupted;
use crate::tracing_compat::trace;
use crate::types::FiberId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct CxInner {
    fiber: FiberId,
    interrupt_requested: AtomicBool,
    interrupter: Mutex<Option<FiberId>>,
    mask_depth: AtomicU32,
}

/// The capability context for a fiber.
#[derive(Debug, Clone)]
pub struct Cx {
    inner: Arc<CxInner>,
}

/// Guard that restores the interruption mask on drop.
struct MaskGuard<'a> {
    inner: &'a CxInner,
}

impl Drop for MaskGuard<'_> {
    fn drop(&mut self) {
        self.inner.mask_depth.fetch_sub(1, Ordering::Release);
    }
}

impl Cx {
    /// Creates a context for the given fiber.
    #[must_use]
    pub fn new(fiber: FiberId) -> Self {
        Self {
            inner: Arc::new(CxInner {
                fiber,
                interrupt_requested: AtomicBool::new(false),
                interrupter: Mutex::new(None),
                mask_depth: AtomicU32::new(0),
            }),
        }
    }

    /// Creates a context for a freshly allocated fiber id.
    #[must_use]
    pub fn fresh() -> Self {
        Self::new(FiberId::fresh())
    }

    /// Returns this fiber's identity.
    #[must_use]
    pub fn fiber_id(&self) -> FiberId {
        self.inner.fiber
    }

    /// Requests interruption of this fiber, attributed to `by`.
    ///
    /// The target observes the request at its next unmasked checkpoint. The
    /// first requester wins attribution; later requests are no-ops.
    pub fn interrupt_as(&self, by: FiberId) {
        let mut interrupter = self.inner.interrupter.lock();
        if interrupter.is_none() {
            *interrupter = Some(by);
            self.inner.interrupt_requested.store(true, Ordering::Release);
            trace!(fiber = %self.inner.fiber, by = %by, "interrupt requested");
        }
    }

    /// Returns true if interruption has been requested, masked or not.
    #[must_use]
    pub fn is_interrupt_requested(&self) -> bool {
        self.inner.interrupt_requested.load(Ordering::Acquire)
    }

    /// Returns true if this fiber is currently inside a masked region.
    #[must_use]
    pub fn is_masked(&self) -> bool {
        self.inner.mask_depth.load(Ordering::Acquire) > 0
    }

    /// Observes a pending interruption.
    ///
    /// Returns `Err` when interruption has been requested and this fiber is
    /// not masked. Blocking loops call this between park attempts.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] naming the requesting fiber.
    pub fn checkpoint(&self) -> Result<(), Interrupted> {
        if self.is_masked() || !self.is_interrupt_requested() {
            return Ok(());
        }
        let by = self.inner.interrupter.lock().unwrap_or(self.inner.fiber);
        Err(Interrupted::by(by))
    }

    /// Runs `f` with interruption masked.
    ///
    /// Checkpoints inside `f` succeed even while an interrupt is pending;
    /// the request stays set and is observed at the first checkpoint after
    /// the mask is released. Nesting is supported.
    pub fn uninterruptible<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.mask_depth.fetch_add(1, Ordering::Acquire);
        let _guard = MaskGuard { inner: &self.inner };
        f()
    }

    /// Emits a trace event attributed to this fiber.
    pub fn trace(&self, message: &str) {
        let _ = message;
        trace!(fiber = %self.inner.fiber, "{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_passes_until_interrupted() {
        let cx = Cx::fresh();
        assert!(cx.checkpoint().is_ok());

        let by = FiberId::fresh();
        cx.interrupt_as(by);
        assert_eq!(cx.checkpoint(), Err(Interrupted::by(by)));
    }

    #[test]
    fn first_interrupter_wins_attribution() {
        let cx = Cx::fresh();
        let first = FiberId::fresh();
        let second = FiberId::fresh();
        cx.interrupt_as(first);
        cx.interrupt_as(second);
        assert_eq!(cx.checkpoint(), Err(Interrupted::by(first)));
    }

    #[test]
    fn mask_defers_observation() {
        let cx = Cx::fresh();
        let by = FiberId::fresh();
        cx.interrupt_as(by);

        let inside = cx.uninterruptible(|| cx.checkpoint());
        assert!(inside.is_ok());
        assert!(cx.is_interrupt_requested());

        // Mask released: the pending request is now observable.
        assert!(cx.checkpoint().is_err());
    }

    #[test]
    fn masks_nest() {
        let cx = Cx::fresh();
        cx.interrupt_as(FiberId::fresh());
        cx.uninterruptible(|| {
            cx.uninterruptible(|| assert!(cx.checkpoint().is_ok()));
            assert!(cx.checkpoint().is_ok());
        });
        assert!(cx.checkpoint().is_err());
    }

    #[test]
    fn clones_share_interrupt_state() {
        let cx = Cx::fresh();
        let clone = cx.clone();
        clone.interrupt_as(FiberId::fresh());
        assert!(cx.checkpoint().is_err());
    }
}
