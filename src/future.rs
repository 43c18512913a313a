//! Single-assignment asynchronous result cells.
//!
//! A [`Future`] parks a fiber until some other fiber delivers a result. The
//! cell is written exactly once: every completion path funnels through one
//! fulfil primitive, the first writer wins, and later writers get `false`
//! back rather than an error.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    FUTURE LIFECYCLE                          │
//! │                                                              │
//! │   Pending(waiters) ──── done(exit), first call ──► Done(exit)│
//! │        │                                              │      │
//! │        │ wait() parks the fiber          wait() returns      │
//! │        │ on_done(f) registers f          immediately;        │
//! │        │ (FIFO)                          on_done runs now    │
//! │        ▼                                                     │
//! │   interruption while parked: the wait unwinds cleanly,       │
//! │   leaving no registration behind                             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Completion itself cannot fail; failure is only ever the *content* of the
//! delivered [`Exit`].

use crate::cx::Cx;
use crate::error::Interrupted;
use crate::tracing_compat::trace;
use crate::types::{Cause, Defect, Exit, FiberId};
use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use std::sync::Arc;
use std::time::Duration;

/// How long a parked fiber sleeps between interruption checks.
const PARK_QUANTUM: Duration = Duration::from_millis(10);

/// Opaque handle to a registered waiter callback.
///
/// Keys are plain integers into the cell's waiter list, so removal never
/// relies on callback identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaiterKey(u64);

type WaiterFn<A, E> = Box<dyn FnOnce(Exit<A, E>) + Send>;

enum State<A, E> {
    Pending {
        next_key: u64,
        waiters: SmallVec<[(u64, WaiterFn<A, E>); 2]>,
    },
    Done(Exit<A, E>),
}

impl<A: std::fmt::Debug, E: std::fmt::Debug> std::fmt::Debug for State<A, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending { waiters, .. } => f
                .debug_struct("Pending")
                .field("waiters", &waiters.len())
                .finish(),
            Self::Done(exit) => f.debug_tuple("Done").field(exit).finish(),
        }
    }
}

struct Shared<A, E> {
    state: Mutex<State<A, E>>,
    done_cv: Condvar,
    /// The fiber this cell belongs to, for diagnostics of what a parked
    /// fiber is blocked on.
    fiber: FiberId,
}

/// A single-assignment result cell.
///
/// Cheaply clonable; clones observe the same cell.
pub struct Future<A, E> {
    shared: Arc<Shared<A, E>>,
}

impl<A, E> Clone for Future<A, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<A: std::fmt::Debug, E: std::fmt::Debug> std::fmt::Debug for Future<A, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Future")
            .field("fiber", &self.shared.fiber)
            .field("state", &*self.shared.state.lock())
            .finish()
    }
}

impl<A, E> Future<A, E> {
    /// Allocates a pending cell owned by the calling fiber.
    #[must_use]
    pub fn make(cx: &Cx) -> Self {
        Self::unsafe_make(cx.fiber_id())
    }

    /// Allocates a pending cell attributed to an explicit fiber.
    #[must_use]
    pub fn unsafe_make(fiber: FiberId) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Pending {
                    next_key: 0,
                    waiters: SmallVec::new(),
                }),
                done_cv: Condvar::new(),
                fiber,
            }),
        }
    }

    /// Returns the fiber this cell is attributed to.
    #[must_use]
    pub fn fiber_id(&self) -> FiberId {
        self.shared.fiber
    }

    /// Returns true if the cell has been completed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(&*self.shared.state.lock(), State::Done(_))
    }

    /// Returns true if two handles refer to the same cell.
    #[must_use]
    pub(crate) fn same_cell(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Removes a registered waiter callback.
    ///
    /// Returns `true` if the callback was still registered and is now gone;
    /// `false` if it already ran, was already removed, or the cell is done.
    pub fn remove_waiter(&self, key: WaiterKey) -> bool {
        let mut state = self.shared.state.lock();
        match &mut *state {
            State::Pending { waiters, .. } => {
                let before = waiters.len();
                waiters.retain(|(k, _)| *k != key.0);
                waiters.len() != before
            }
            State::Done(_) => false,
        }
    }
}

impl<A: Clone, E: Clone> Future<A, E> {
    /// The fulfil primitive: transitions `Pending → Done` exactly once.
    ///
    /// The first call wins and returns `true`; every later call observes
    /// `Done` and returns `false`. On the winning call, every registered
    /// waiter runs in registration order with a clone of the exit; a waiter
    /// that panics does not stop the rest.
    pub fn unsafe_done(&self, exit: Exit<A, E>) -> bool {
        let drained = {
            let mut state = self.shared.state.lock();
            match &mut *state {
                State::Done(_) => return false,
                State::Pending { waiters, .. } => {
                    let drained = std::mem::take(waiters);
                    *state = State::Done(exit.clone());
                    drained
                }
            }
        };
        // Wake and deliver outside the lock.
        self.shared.done_cv.notify_all();
        for (_, waiter) in drained {
            run_waiter(waiter, exit.clone());
        }
        true
    }

    /// Completes the cell with `exit`. See [`Future::unsafe_done`].
    pub fn done(&self, exit: Exit<A, E>) -> bool {
        self.unsafe_done(exit)
    }

    /// Completes the cell with a success value.
    pub fn succeed(&self, value: A) -> bool {
        self.unsafe_done(Exit::succeed(value))
    }

    /// Completes the cell with a typed error.
    pub fn fail(&self, error: E) -> bool {
        self.unsafe_done(Exit::fail(error))
    }

    /// Completes the cell with a full failure cause.
    pub fn fail_cause(&self, cause: Cause<E>) -> bool {
        self.unsafe_done(Exit::fail_cause(cause))
    }

    /// Completes the cell with a defect.
    pub fn die(&self, defect: Defect) -> bool {
        self.unsafe_done(Exit::die(defect))
    }

    /// Completes the cell with an interruption attributed to the caller.
    pub fn interrupt(&self, cx: &Cx) -> bool {
        self.interrupt_as(cx.fiber_id())
    }

    /// Completes the cell with an interruption attributed to `fiber`.
    pub fn interrupt_as(&self, fiber: FiberId) -> bool {
        self.unsafe_done(Exit::interrupt(fiber))
    }

    /// Returns the result without parking, or `None` while pending.
    #[must_use]
    pub fn poll(&self) -> Option<Exit<A, E>> {
        match &*self.shared.state.lock() {
            State::Done(exit) => Some(exit.clone()),
            State::Pending { .. } => None,
        }
    }

    /// Registers a callback to run when the cell completes.
    ///
    /// Callbacks run in registration order, each receiving a clone of the
    /// exit. If the cell is already done the callback runs immediately on the
    /// calling fiber and `None` is returned; otherwise the returned key can
    /// be handed to [`Future::remove_waiter`].
    pub fn on_done(&self, f: impl FnOnce(Exit<A, E>) + Send + 'static) -> Option<WaiterKey> {
        let exit = {
            let mut state = self.shared.state.lock();
            match &mut *state {
                State::Pending { next_key, waiters } => {
                    let key = *next_key;
                    *next_key += 1;
                    waiters.push((key, Box::new(f)));
                    return Some(WaiterKey(key));
                }
                State::Done(exit) => exit.clone(),
            }
        };
        run_waiter(Box::new(f), exit);
        None
    }

    /// Parks the calling fiber until the cell completes.
    ///
    /// Returns the delivered exit. If the cell is already done this returns
    /// immediately without parking. If the fiber is interrupted while parked,
    /// the wait unwinds with no registration left behind.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if the calling fiber is interrupted while
    /// parked.
    pub fn wait(&self, cx: &Cx) -> Result<Exit<A, E>, Interrupted> {
        let mut state = self.shared.state.lock();
        loop {
            if let State::Done(exit) = &*state {
                return Ok(exit.clone());
            }
            if let Err(interrupted) = cx.checkpoint() {
                trace!(fiber = %cx.fiber_id(), on = %self.shared.fiber, "wait interrupted");
                return Err(interrupted);
            }
            self.shared.done_cv.wait_for(&mut state, PARK_QUANTUM);
        }
    }
}

fn run_waiter<A, E>(waiter: WaiterFn<A, E>, exit: Exit<A, E>) {
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| waiter(exit)));
    if outcome.is_err() {
        trace!("future waiter panicked; continuing with remaining waiters");
    }
}
