//! Structured resource scopes.
//!
//! A [`Scope`] owns the finalizers of every resource acquired within it and
//! guarantees they run, in reverse registration order, exactly once —
//! whether the scoped work succeeds, fails, or is interrupted. Parent/child
//! relationships are encoded purely as finalizer entries: [`Scope::fork`]
//! registers "close the child" in the parent, so closing a parent
//! transitively closes every still-open descendant without any separate tree
//! structure.
//!
//! The acquire/run/release idiom is [`Scope::use_scoped`]:
//!
//! ```
//! use fibersync::{Cx, Exit, Scope};
//!
//! let cx = Cx::fresh();
//! let scope: Scope<String> = Scope::make();
//! let exit = scope.use_scoped(&cx, |scope| {
//!     scope
//!         .add_finalizer(|| Ok(()))
//!         .expect("scope is open");
//!     Exit::succeed(42)
//! });
//! assert_eq!(exit, Exit::succeed(42));
//! assert!(scope.is_closed());
//! ```

mod release_map;

pub use release_map::{Finalizer, FinalizerKey, ReleaseMap};

use crate::cx::Cx;
use crate::tracing_compat::trace;
use crate::types::{Cause, Defect, Exit};
use std::sync::Arc;

/// How a closing scope runs its finalizers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionStrategy {
    /// Strictly one after another, newest first. Required whenever release
    /// order matters (nested teardown).
    #[default]
    Sequential,
    /// Concurrently, on scoped threads. Valid only when finalizers are
    /// independent; all complete before `close` returns.
    Parallel,
}

/// A structured region owning zero or more acquired resources.
///
/// Cheaply clonable; clones share the same underlying registry.
#[derive(Debug)]
pub struct Scope<E> {
    releases: Arc<ReleaseMap<E>>,
    strategy: ExecutionStrategy,
}

impl<E> Clone for Scope<E> {
    fn clone(&self) -> Self {
        Self {
            releases: Arc::clone(&self.releases),
            strategy: self.strategy,
        }
    }
}

impl<E> Default for Scope<E> {
    fn default() -> Self {
        Self::make()
    }
}

impl<E> Scope<E> {
    /// Creates an open scope with the sequential execution strategy.
    #[must_use]
    pub fn make() -> Self {
        Self::make_with(ExecutionStrategy::Sequential)
    }

    /// Creates an open scope with an explicit execution strategy.
    #[must_use]
    pub fn make_with(strategy: ExecutionStrategy) -> Self {
        Self {
            releases: Arc::new(ReleaseMap::new()),
            strategy,
        }
    }

    /// Returns the strategy this scope closes with.
    #[must_use]
    pub fn execution_strategy(&self) -> ExecutionStrategy {
        self.strategy
    }

    /// Returns true once this scope has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.releases.is_closed()
    }

    /// Runs `f` with this scope as its resource dependency, without tying
    /// the scope's lifetime to `f`'s completion.
    ///
    /// Resources acquired inside `f` outlive the call; they are released
    /// when this scope eventually closes. Compare [`Scope::use_scoped`].
    pub fn extend<R>(&self, cx: &Cx, f: impl FnOnce(&Self) -> R) -> R {
        cx.trace("scope::extend");
        f(self)
    }
}

impl<E: Clone> Scope<E> {
    /// Registers a finalizer that observes the exit the scope closes with.
    ///
    /// Returns `Ok(Some(key))` while open; the key allows early release via
    /// [`ReleaseMap::release`] through [`Scope::release_map`]. If the scope
    /// has already closed, the finalizer runs immediately against the stored
    /// exit and `Ok(None)` is returned.
    ///
    /// # Errors
    ///
    /// Returns the finalizer's cause when it ran immediately and failed.
    pub fn add_finalizer_exit(
        &self,
        f: impl FnOnce(&Exit<(), E>) -> Result<(), Cause<E>> + Send + 'static,
    ) -> Result<Option<FinalizerKey>, Cause<E>> {
        self.releases.add(Box::new(f))
    }

    /// Registers a finalizer that ignores the closing exit.
    ///
    /// # Errors
    ///
    /// Returns the finalizer's cause when it ran immediately and failed.
    pub fn add_finalizer(
        &self,
        f: impl FnOnce() -> Result<(), Cause<E>> + Send + 'static,
    ) -> Result<Option<FinalizerKey>, Cause<E>> {
        self.add_finalizer_exit(move |_| f())
    }

    /// Direct access to the underlying registry, for early release by key.
    #[must_use]
    pub fn release_map(&self) -> &ReleaseMap<E> {
        &self.releases
    }
}

impl<E: Clone + Send> Scope<E> {
    /// Closes the scope: transitions to `Closed`, then runs every stored
    /// finalizer newest-first, each observing `exit`.
    ///
    /// Idempotent — a second close runs nothing and returns `Ok`. One
    /// finalizer's failure never skips the rest; the scope reaches `Closed`
    /// even if every finalizer fails.
    ///
    /// # Errors
    ///
    /// Returns the combined cause naming every finalizer that failed.
    pub fn close(&self, exit: &Exit<(), E>) -> Result<(), Cause<E>> {
        trace!("scope::close");
        self.releases.release_all(exit, self.strategy)
    }

    /// Runs `f` against this scope, then unconditionally closes with `f`'s
    /// exit: the "acquire, run, release on any outcome" idiom.
    ///
    /// A panic in `f` is captured as a defect and still triggers the close.
    /// When the close itself fails, its cause becomes the result; if the
    /// effect had already failed, the two causes combine sequentially.
    pub fn use_scoped<A>(&self, cx: &Cx, f: impl FnOnce(&Self) -> Exit<A, E>) -> Exit<A, E> {
        cx.trace("scope::use_scoped");
        let exit = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(self))) {
            Ok(exit) => exit,
            Err(payload) => Exit::die(Defect::from_panic(payload.as_ref())),
        };
        // Finalizers must run to completion even if the calling fiber is
        // being interrupted.
        let closed = cx.uninterruptible(|| self.close(&exit.unit()));
        match closed {
            Ok(()) => exit,
            Err(release_cause) => match exit {
                Exit::Success(_) => Exit::Failure(release_cause),
                Exit::Failure(cause) => Exit::Failure(cause.then(release_cause)),
            },
        }
    }
}

impl<E: Clone + Send + 'static> Scope<E> {
    /// Allocates a child scope whose closer is registered as a finalizer of
    /// this scope, so closing the parent transitively closes the child.
    ///
    /// The child inherits this scope's execution strategy. Forking an
    /// already-closed scope yields a child that is closed immediately.
    #[must_use]
    pub fn fork(&self) -> Self {
        self.fork_with(self.strategy)
    }

    /// [`Scope::fork`] with an explicit strategy for the child.
    #[must_use]
    pub fn fork_with(&self, strategy: ExecutionStrategy) -> Self {
        let child = Self::make_with(strategy);
        let closer = child.clone();
        // A freshly made child has no finalizers, so the immediate run on an
        // already-closed parent cannot fail.
        let _ = self.add_finalizer_exit(move |exit| closer.close(exit));
        child
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn close_runs_finalizers_in_reverse_order() {
        let scope: Scope<&str> = Scope::make();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in [1, 2] {
            let order = Arc::clone(&order);
            scope
                .add_finalizer(move || {
                    order.lock().push(tag);
                    Ok(())
                })
                .expect("open");
        }

        scope.close(&Exit::succeed(())).expect("clean close");
        assert_eq!(*order.lock(), vec![2, 1]);
    }

    #[test]
    fn second_close_is_a_safe_no_op() {
        let scope: Scope<&str> = Scope::make();
        let order = Arc::new(Mutex::new(Vec::new()));
        let order2 = Arc::clone(&order);
        scope
            .add_finalizer(move || {
                order2.lock().push(1);
                Ok(())
            })
            .expect("open");

        scope.close(&Exit::succeed(())).expect("first close");
        scope.close(&Exit::succeed(())).expect("second close no-op");
        assert_eq!(*order.lock(), vec![1]);
    }

    #[test]
    fn finalizers_observe_the_closing_exit() {
        let scope: Scope<&str> = Scope::make();
        let seen = Arc::new(Mutex::new(None));
        let seen2 = Arc::clone(&seen);
        scope
            .add_finalizer_exit(move |exit| {
                *seen2.lock() = Some(exit.clone());
                Ok(())
            })
            .expect("open");

        scope.close(&Exit::fail("went wrong")).expect("finalizer fine");
        assert_eq!(*seen.lock(), Some(Exit::fail("went wrong")));
    }

    #[test]
    fn closing_the_parent_closes_the_fork() {
        let parent: Scope<&str> = Scope::make();
        let child = parent.fork();
        let ran = Arc::new(Mutex::new(false));
        let ran2 = Arc::clone(&ran);
        child
            .add_finalizer(move || {
                *ran2.lock() = true;
                Ok(())
            })
            .expect("child open");

        assert!(!child.is_closed());
        parent.close(&Exit::succeed(())).expect("clean close");
        assert!(child.is_closed());
        assert!(*ran.lock());
    }

    #[test]
    fn early_closed_child_is_skipped_by_parent_close() {
        let parent: Scope<&str> = Scope::make();
        let child = parent.fork();

        child.close(&Exit::succeed(())).expect("early close");
        // Parent close finds the child already closed; still a clean close.
        parent.close(&Exit::succeed(())).expect("clean close");
    }

    #[test]
    fn forking_a_closed_scope_yields_a_closed_child() {
        let parent: Scope<&str> = Scope::make();
        parent.close(&Exit::succeed(())).expect("empty close");

        let child = parent.fork();
        assert!(child.is_closed());
    }

    #[test]
    fn use_scoped_releases_on_success() {
        let cx = Cx::fresh();
        let scope: Scope<&str> = Scope::make();
        let exit = scope.use_scoped(&cx, |scope| {
            scope.add_finalizer(|| Ok(())).expect("open");
            Exit::succeed(5)
        });
        assert_eq!(exit, Exit::succeed(5));
        assert!(scope.is_closed());
    }

    #[test]
    fn use_scoped_combines_effect_and_finalizer_failures() {
        let cx = Cx::fresh();
        let scope: Scope<&str> = Scope::make();
        let exit: Exit<i32, &str> = scope.use_scoped(&cx, |scope| {
            scope
                .add_finalizer(|| Err(Cause::Fail("release failed")))
                .expect("open");
            Exit::fail("effect failed")
        });

        let cause = exit.into_result().expect_err("both failed");
        assert_eq!(cause.failures(), vec![&"effect failed", &"release failed"]);
    }

    #[test]
    fn use_scoped_surfaces_finalizer_failure_after_success() {
        let cx = Cx::fresh();
        let scope: Scope<&str> = Scope::make();
        let exit = scope.use_scoped(&cx, |scope| {
            scope
                .add_finalizer(|| Err(Cause::Fail("release failed")))
                .expect("open");
            Exit::succeed(1)
        });
        assert_eq!(exit, Exit::fail("release failed"));
    }

    #[test]
    fn use_scoped_captures_panics_and_still_closes() {
        let cx = Cx::fresh();
        let scope: Scope<&str> = Scope::make();
        let ran = Arc::new(Mutex::new(false));
        let ran2 = Arc::clone(&ran);

        let exit: Exit<i32, &str> = scope.use_scoped(&cx, |scope| {
            scope
                .add_finalizer(move || {
                    *ran2.lock() = true;
                    Ok(())
                })
                .expect("open");
            panic!("user code exploded");
        });

        assert!(*ran.lock());
        assert!(scope.is_closed());
        let cause = exit.into_result().expect_err("died");
        assert_eq!(cause.defects()[0].message(), "user code exploded");
    }

    #[test]
    fn extend_does_not_close() {
        let cx = Cx::fresh();
        let scope: Scope<&str> = Scope::make();
        let value = scope.extend(&cx, |scope| {
            scope.add_finalizer(|| Ok(())).expect("open");
            21
        });
        assert_eq!(value, 21);
        assert!(!scope.is_closed());
        assert_eq!(scope.release_map().len(), 1);
    }

    #[test]
    fn parallel_scope_closes_everything() {
        let scope: Scope<&str> = Scope::make_with(ExecutionStrategy::Parallel);
        let count = Arc::new(Mutex::new(0));
        for _ in 0..4 {
            let count = Arc::clone(&count);
            scope
                .add_finalizer(move || {
                    *count.lock() += 1;
                    Ok(())
                })
                .expect("open");
        }
        scope.close(&Exit::succeed(())).expect("clean close");
        assert_eq!(*count.lock(), 4);
    }
}
