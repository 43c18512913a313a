//! The finalizer registry backing a [`Scope`](super::Scope).
//!
//! A `ReleaseMap` is a one-way state machine:
//!
//! ```text
//! Open { next_key, finalizers } ── release_all(exit) ──► Closed { exit }
//! ```
//!
//! While `Open`, finalizers are recorded under monotonically increasing
//! integer keys. Once `Closed`, every further [`ReleaseMap::add`] runs the
//! finalizer immediately against the stored exit instead of recording it, so
//! no finalizer is ever silently dropped. The whole state lives behind a
//! single mutex; it is never spread across independently mutable fields.

use super::ExecutionStrategy;
use crate::tracing_compat::trace;
use crate::types::{Cause, Defect, Exit};
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// A finalizer: observes the exit the scope closed with, may itself fail.
pub type Finalizer<E> = Box<dyn FnOnce(&Exit<(), E>) -> Result<(), Cause<E>> + Send>;

/// Opaque handle to a registered finalizer.
///
/// Keys are plain integers into the map, so early release and removal never
/// rely on closure identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FinalizerKey(u64);

enum MapState<E> {
    Open {
        next_key: u64,
        finalizers: BTreeMap<u64, Finalizer<E>>,
    },
    Closed {
        exit: Exit<(), E>,
    },
}

/// An ordered, exactly-once finalizer registry.
pub struct ReleaseMap<E> {
    state: Mutex<MapState<E>>,
}

impl<E> Default for ReleaseMap<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: std::fmt::Debug> std::fmt::Debug for ReleaseMap<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &*self.state.lock() {
            MapState::Open { finalizers, .. } => f
                .debug_struct("ReleaseMap")
                .field("state", &"Open")
                .field("finalizers", &finalizers.len())
                .finish(),
            MapState::Closed { exit } => f
                .debug_struct("ReleaseMap")
                .field("state", &"Closed")
                .field("exit", exit)
                .finish(),
        }
    }
}

impl<E> ReleaseMap<E> {
    /// Creates an empty, open map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MapState::Open {
                next_key: 0,
                finalizers: BTreeMap::new(),
            }),
        }
    }

    /// Returns true once the map has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(&*self.state.lock(), MapState::Closed { .. })
    }

    /// Returns the number of finalizers currently recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        match &*self.state.lock() {
            MapState::Open { finalizers, .. } => finalizers.len(),
            MapState::Closed { .. } => 0,
        }
    }

    /// Returns true if no finalizers are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes a recorded finalizer, returning it without running it.
    pub fn remove(&self, key: FinalizerKey) -> Option<Finalizer<E>> {
        match &mut *self.state.lock() {
            MapState::Open { finalizers, .. } => finalizers.remove(&key.0),
            MapState::Closed { .. } => None,
        }
    }
}

impl<E: Clone> ReleaseMap<E> {
    /// Records a finalizer, or runs it immediately if the map has closed.
    ///
    /// Returns `Ok(Some(key))` when recorded, `Ok(None)` when the map was
    /// already closed and the finalizer ran cleanly against the stored exit.
    ///
    /// # Errors
    ///
    /// Returns the finalizer's cause when it ran immediately and failed.
    pub fn add(&self, finalizer: Finalizer<E>) -> Result<Option<FinalizerKey>, Cause<E>> {
        let exit = {
            let mut state = self.state.lock();
            match &mut *state {
                MapState::Open {
                    next_key,
                    finalizers,
                } => {
                    let key = *next_key;
                    *next_key += 1;
                    finalizers.insert(key, finalizer);
                    return Ok(Some(FinalizerKey(key)));
                }
                MapState::Closed { exit } => exit.clone(),
            }
        };
        trace!("finalizer added after close; running immediately");
        run_finalizer(finalizer, &exit).map(|()| None)
    }

    /// Runs and discards the finalizer under `key`, if still recorded.
    ///
    /// A missing key is a no-op: the finalizer already ran, was removed, or
    /// the map has closed.
    ///
    /// # Errors
    ///
    /// Returns the finalizer's cause if it fails.
    pub fn release(&self, key: FinalizerKey, exit: &Exit<(), E>) -> Result<(), Cause<E>> {
        match self.remove(key) {
            Some(finalizer) => run_finalizer(finalizer, exit),
            None => Ok(()),
        }
    }
}

impl<E: Clone + Send> ReleaseMap<E> {
    /// Closes the map and runs every recorded finalizer, newest first.
    ///
    /// The transition to `Closed` happens before any finalizer runs, so the
    /// map always reaches `Closed` even if every finalizer fails. A second
    /// call finds the map closed and runs nothing. One finalizer's failure
    /// never skips the rest; failures are combined ([`Cause::then`] under the
    /// sequential strategy, [`Cause::both`] under the parallel one) rather
    /// than dropped.
    ///
    /// # Errors
    ///
    /// Returns the combined cause of every finalizer that failed.
    pub fn release_all(
        &self,
        exit: &Exit<(), E>,
        strategy: ExecutionStrategy,
    ) -> Result<(), Cause<E>> {
        let finalizers = {
            let mut state = self.state.lock();
            match &mut *state {
                MapState::Closed { .. } => return Ok(()),
                MapState::Open { finalizers, .. } => {
                    let drained = std::mem::take(finalizers);
                    *state = MapState::Closed { exit: exit.clone() };
                    drained
                }
            }
        };
        trace!(count = finalizers.len(), "releasing finalizers");

        match strategy {
            ExecutionStrategy::Sequential => {
                let mut combined: Option<Cause<E>> = None;
                for (_, finalizer) in finalizers.into_iter().rev() {
                    if let Err(cause) = run_finalizer(finalizer, exit) {
                        combined = Some(match combined {
                            Some(acc) => acc.then(cause),
                            None => cause,
                        });
                    }
                }
                combined.map_or(Ok(()), Err)
            }
            ExecutionStrategy::Parallel => {
                let results = std::thread::scope(|s| {
                    let handles: Vec<_> = finalizers
                        .into_iter()
                        .rev()
                        .map(|(_, finalizer)| {
                            let exit = exit.clone();
                            s.spawn(move || run_finalizer(finalizer, &exit))
                        })
                        .collect();
                    handles
                        .into_iter()
                        .map(|handle| {
                            handle
                                .join()
                                .unwrap_or_else(|_| Err(Cause::die("finalizer thread panicked")))
                        })
                        .collect::<Vec<_>>()
                });
                let mut combined: Option<Cause<E>> = None;
                for result in results {
                    if let Err(cause) = result {
                        combined = Some(match combined {
                            Some(acc) => acc.both(cause),
                            None => cause,
                        });
                    }
                }
                combined.map_or(Ok(()), Err)
            }
        }
    }
}

fn run_finalizer<E>(finalizer: Finalizer<E>, exit: &Exit<(), E>) -> Result<(), Cause<E>> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| finalizer(exit))) {
        Ok(result) => result,
        Err(payload) => Err(Cause::Die(Defect::from_panic(payload.as_ref()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record(order: &Arc<Mutex<Vec<u32>>>, tag: u32) -> Finalizer<&'static str> {
        let order = Arc::clone(order);
        Box::new(move |_| {
            order.lock().push(tag);
            Ok(())
        })
    }

    #[test]
    fn release_all_runs_newest_first() {
        let map: ReleaseMap<&str> = ReleaseMap::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in 1..=3 {
            map.add(record(&order, tag)).expect("open");
        }
        map.release_all(&Exit::succeed(()), ExecutionStrategy::Sequential)
            .expect("all finalizers succeed");

        assert_eq!(*order.lock(), vec![3, 2, 1]);
        assert!(map.is_closed());
    }

    #[test]
    fn second_release_all_runs_nothing() {
        let map: ReleaseMap<&str> = ReleaseMap::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        map.add(record(&order, 1)).expect("open");

        let exit = Exit::succeed(());
        map.release_all(&exit, ExecutionStrategy::Sequential)
            .expect("first close");
        map.release_all(&exit, ExecutionStrategy::Sequential)
            .expect("second close is a no-op");

        assert_eq!(*order.lock(), vec![1]);
    }

    #[test]
    fn add_after_close_runs_immediately_against_stored_exit() {
        let map: ReleaseMap<&str> = ReleaseMap::new();
        map.release_all(&Exit::fail("closed with this"), ExecutionStrategy::Sequential)
            .expect("nothing registered");

        let seen = Arc::new(Mutex::new(None));
        let seen2 = Arc::clone(&seen);
        let key = map
            .add(Box::new(move |exit| {
                *seen2.lock() = Some(exit.clone());
                Ok(())
            }))
            .expect("immediate run succeeds");

        assert!(key.is_none());
        assert_eq!(*seen.lock(), Some(Exit::fail("closed with this")));
    }

    #[test]
    fn add_after_close_surfaces_the_failure() {
        let map: ReleaseMap<&str> = ReleaseMap::new();
        map.release_all(&Exit::succeed(()), ExecutionStrategy::Sequential)
            .expect("empty close");

        let result = map.add(Box::new(|_| Err(Cause::Fail("late failure"))));
        assert_eq!(result, Err(Cause::Fail("late failure")));
    }

    #[test]
    fn removed_finalizer_never_runs() {
        let map: ReleaseMap<&str> = ReleaseMap::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        map.add(record(&order, 1)).expect("open");
        let key = map
            .add(record(&order, 2))
            .expect("open")
            .expect("recorded");

        assert!(map.remove(key).is_some());
        assert!(map.remove(key).is_none());

        map.release_all(&Exit::succeed(()), ExecutionStrategy::Sequential)
            .expect("close");
        assert_eq!(*order.lock(), vec![1]);
    }

    #[test]
    fn release_runs_exactly_one_finalizer() {
        let map: ReleaseMap<&str> = ReleaseMap::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let key = map
            .add(record(&order, 7))
            .expect("open")
            .expect("recorded");
        map.release(key, &Exit::succeed(())).expect("runs cleanly");
        assert_eq!(*order.lock(), vec![7]);

        // Already released: a no-op.
        map.release(key, &Exit::succeed(())).expect("no-op");
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn failures_accumulate_without_skipping() {
        let map: ReleaseMap<&str> = ReleaseMap::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        map.add(record(&order, 1)).expect("open");
        map.add(Box::new(|_| Err(Cause::Fail("second")))).expect("open");
        map.add(Box::new(|_| Err(Cause::Fail("third")))).expect("open");

        let cause = map
            .release_all(&Exit::succeed(()), ExecutionStrategy::Sequential)
            .expect_err("two finalizers failed");

        // Newest-first: "third" failed before "second".
        assert_eq!(cause.failures(), vec![&"third", &"second"]);
        // The clean finalizer still ran.
        assert_eq!(*order.lock(), vec![1]);
        assert!(map.is_closed());
    }

    #[test]
    fn panicking_finalizer_becomes_a_defect() {
        let map: ReleaseMap<&str> = ReleaseMap::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        map.add(record(&order, 1)).expect("open");
        map.add(Box::new(|_| panic!("finalizer exploded"))).expect("open");

        let cause = map
            .release_all(&Exit::succeed(()), ExecutionStrategy::Sequential)
            .expect_err("panic captured");

        let defects = cause.defects();
        assert_eq!(defects.len(), 1);
        assert_eq!(defects[0].message(), "finalizer exploded");
        assert_eq!(*order.lock(), vec![1]);
    }

    #[test]
    fn parallel_release_runs_everything_and_combines() {
        let map: ReleaseMap<&str> = ReleaseMap::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in 1..=4 {
            map.add(record(&order, tag)).expect("open");
        }
        map.add(Box::new(|_| Err(Cause::Fail("a")))).expect("open");
        map.add(Box::new(|_| Err(Cause::Fail("b")))).expect("open");

        let cause = map
            .release_all(&Exit::succeed(()), ExecutionStrategy::Parallel)
            .expect_err("two failures");

        let mut order = order.lock().clone();
        order.sort_unstable();
        assert_eq!(order, vec![1, 2, 3, 4]);
        assert_eq!(cause.failures().len(), 2);
        assert!(map.is_closed());
    }
}
