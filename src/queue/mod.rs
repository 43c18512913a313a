//! Fiber-blocking FIFO queues with pluggable overflow policies.
//!
//! A [`Queue`] is a lightweight in-memory channel between fibers. Consumers
//! park on [`Queue::take`] while the queue is empty; what happens to
//! producers when a bounded queue is full depends on how the queue was
//! built:
//!
//! - [`Queue::make_bounded`] — back-pressure: [`Queue::offer`] parks the
//!   offering fiber until its items are admitted.
//! - [`Queue::make_dropping`] — surplus items are discarded and the offer
//!   reports `false`.
//! - [`Queue::make_sliding`] — the oldest buffered items are evicted to
//!   make room; the offer reports `true`.
//! - [`Queue::make_unbounded`] — offers always succeed immediately.
//!
//! Shutdown is one-way and idempotent: every parked fiber is interrupted,
//! buffered items are discarded, and any later operation fails with
//! [`Interrupted`]. [`Queue::await_shutdown`] parks until that happens.
//!
//! ```
//! use fibersync::{Cx, Queue};
//!
//! let cx = Cx::fresh();
//! let queue = Queue::make_bounded(16);
//! assert!(queue.offer(&cx, "job").unwrap());
//! assert_eq!(queue.take(&cx).unwrap(), "job");
//! ```

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cx::Cx;
use crate::error::Interrupted;
use crate::future::Future;
use crate::tracing_compat::trace;
use crate::types::{Exit, FiberId};

mod buffer;
mod strategy;

use buffer::MutableQueue;
use strategy::Strategy;

/// A fiber-blocking FIFO queue.
///
/// Cloning yields another handle to the same queue. Handles are cheap and
/// may be shared freely across threads.
pub struct Queue<A> {
    core: Arc<QueueCore<A>>,
}

struct QueueCore<A> {
    state: Mutex<QueueState<A>>,
    /// Resolved exactly once, when the queue shuts down.
    shutdown_hook: Future<(), Infallible>,
    capacity: usize,
}

struct QueueState<A> {
    buffer: MutableQueue<A>,
    /// Fibers parked in `take`, oldest first. Each entry is resolved with
    /// exactly one item, or interrupted at shutdown.
    takers: VecDeque<Future<A, Infallible>>,
    strategy: Strategy<A>,
    shutdown: bool,
}

impl<A> Clone for Queue<A> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<A> std::fmt::Debug for Queue<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("capacity", &self.core.capacity)
            .field("shutdown", &self.core.shutdown_hook.is_done())
            .finish_non_exhaustive()
    }
}

impl<A: Clone> Queue<A> {
    fn make(buffer: MutableQueue<A>, strategy: Strategy<A>) -> Self {
        let capacity = buffer.capacity();
        Self {
            core: Arc::new(QueueCore {
                state: Mutex::new(QueueState {
                    buffer,
                    takers: VecDeque::new(),
                    strategy,
                    shutdown: false,
                }),
                shutdown_hook: Future::unsafe_make(FiberId::NONE),
                capacity,
            }),
        }
    }

    /// Creates a bounded queue that parks offering fibers when full.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn make_bounded(capacity: usize) -> Self {
        Self::make(MutableQueue::bounded(capacity), Strategy::back_pressure())
    }

    /// Creates a bounded queue that discards surplus items when full.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn make_dropping(capacity: usize) -> Self {
        Self::make(MutableQueue::bounded(capacity), Strategy::Dropping)
    }

    /// Creates a bounded queue that evicts its oldest items when full.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn make_sliding(capacity: usize) -> Self {
        Self::make(MutableQueue::bounded(capacity), Strategy::Sliding)
    }

    /// Creates a queue with no capacity bound.
    #[must_use]
    pub fn make_unbounded() -> Self {
        Self::make(MutableQueue::unbounded(), Strategy::Dropping)
    }

    /// The maximum number of buffered items, `usize::MAX` when unbounded.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.core.capacity
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.core.shutdown_hook.is_done()
    }

    /// The number of buffered items, minus fibers parked in `take`, plus
    /// items parked behind back-pressure.
    ///
    /// Negative exactly when consumers outnumber buffered items.
    ///
    /// # Errors
    ///
    /// Fails with [`Interrupted`] if the queue has shut down or the calling
    /// fiber has a pending interrupt.
    pub fn size(&self, cx: &Cx) -> Result<isize, Interrupted> {
        cx.checkpoint()?;
        let state = self.core.state.lock();
        if state.shutdown {
            return Err(Interrupted::by(cx.fiber_id()));
        }
        #[allow(clippy::cast_possible_wrap)]
        let size = state.buffer.len() as isize - state.takers.len() as isize
            + state.strategy.surplus_size() as isize;
        Ok(size)
    }

    /// Offers one item.
    ///
    /// Returns `true` once the item is admitted, `false` if a dropping queue
    /// discarded it. On a full back-pressure queue this parks the calling
    /// fiber until space frees up.
    ///
    /// # Errors
    ///
    /// Fails with [`Interrupted`] if the queue has shut down or the fiber is
    /// interrupted while parked.
    pub fn offer(&self, cx: &Cx, item: A) -> Result<bool, Interrupted> {
        cx.checkpoint()?;
        let mut state = self.core.state.lock();
        if state.shutdown {
            return Err(Interrupted::by(cx.fiber_id()));
        }
        if state.buffer.is_empty() {
            if let Some(taker) = state.takers.pop_front() {
                // Complete under the state lock: an interrupted taker's
                // unwind re-locks before polling its cell, so it either
                // deregisters first (no hand-off) or sees the item.
                let _ = taker.succeed(item);
                return Ok(true);
            }
        }
        match state.buffer.enqueue(item) {
            Ok(()) => {
                Self::complete_takers(&mut state);
                Ok(true)
            }
            Err(item) => self.handle_surplus(cx, state, vec![item]),
        }
    }

    /// Offers every item in `items`, preserving their order.
    ///
    /// On a full back-pressure queue the calling fiber parks until the whole
    /// batch is admitted; the items that fit are buffered immediately.
    ///
    /// # Errors
    ///
    /// Fails with [`Interrupted`] if the queue has shut down or the fiber is
    /// interrupted while parked.
    pub fn offer_all(&self, cx: &Cx, items: Vec<A>) -> Result<bool, Interrupted> {
        cx.checkpoint()?;
        let mut remaining: VecDeque<A> = items.into();
        let mut state = self.core.state.lock();
        if state.shutdown {
            return Err(Interrupted::by(cx.fiber_id()));
        }
        // Hand leading items straight to parked takers.
        while !remaining.is_empty() && state.buffer.is_empty() && !state.takers.is_empty() {
            if let (Some(item), Some(taker)) = (remaining.pop_front(), state.takers.pop_front()) {
                let _ = taker.succeed(item);
            }
        }
        let mut surplus = Vec::new();
        while let Some(item) = remaining.pop_front() {
            if let Err(back) = state.buffer.enqueue(item) {
                surplus.push(back);
                surplus.extend(remaining.drain(..));
                break;
            }
        }
        Self::complete_takers(&mut state);
        if surplus.is_empty() {
            Ok(true)
        } else {
            self.handle_surplus(cx, state, surplus)
        }
    }

    /// Takes the oldest item, parking the calling fiber until one arrives.
    ///
    /// # Errors
    ///
    /// Fails with [`Interrupted`] if the queue has shut down or the fiber is
    /// interrupted while parked.
    pub fn take(&self, cx: &Cx) -> Result<A, Interrupted> {
        cx.checkpoint()?;
        let mut state = self.core.state.lock();
        if state.shutdown {
            return Err(Interrupted::by(cx.fiber_id()));
        }
        if let Some(item) = state.buffer.dequeue() {
            let QueueState {
                buffer, strategy, ..
            } = &mut *state;
            strategy.on_space(buffer);
            return Ok(item);
        }
        let taker: Future<A, Infallible> = Future::make(cx);
        state.takers.push_back(taker.clone());
        drop(state);

        match taker.wait(cx) {
            Ok(Exit::Success(item)) => Ok(item),
            Ok(Exit::Failure(cause)) => Err(Interrupted::by(
                cause
                    .interruptors()
                    .first()
                    .copied()
                    .unwrap_or_else(|| cx.fiber_id()),
            )),
            Err(interrupted) => {
                let mut state = self.core.state.lock();
                state.takers.retain(|t| !t.same_cell(&taker));
                drop(state);
                // An offer may have resolved the taker between the failed
                // checkpoint and the removal above; the item wins.
                if let Some(Exit::Success(item)) = taker.poll() {
                    return Ok(item);
                }
                Err(interrupted)
            }
        }
    }

    /// Takes every immediately available item, without parking.
    ///
    /// Returns an empty vector when the queue is empty.
    ///
    /// # Errors
    ///
    /// Fails with [`Interrupted`] if the queue has shut down or the calling
    /// fiber has a pending interrupt.
    pub fn take_all(&self, cx: &Cx) -> Result<Vec<A>, Interrupted> {
        self.take_up_to(cx, usize::MAX)
    }

    /// Takes up to `max` immediately available items, without parking.
    ///
    /// # Errors
    ///
    /// Fails with [`Interrupted`] if the queue has shut down or the calling
    /// fiber has a pending interrupt.
    pub fn take_up_to(&self, cx: &Cx, max: usize) -> Result<Vec<A>, Interrupted> {
        cx.checkpoint()?;
        let mut state = self.core.state.lock();
        if state.shutdown {
            return Err(Interrupted::by(cx.fiber_id()));
        }
        let mut out = Vec::new();
        while out.len() < max {
            match state.buffer.dequeue() {
                Some(item) => out.push(item),
                None => break,
            }
        }
        let QueueState {
            buffer, strategy, ..
        } = &mut *state;
        strategy.on_space(buffer);
        Ok(out)
    }

    /// Takes the oldest item if one is immediately available.
    ///
    /// # Errors
    ///
    /// Fails with [`Interrupted`] if the queue has shut down or the calling
    /// fiber has a pending interrupt.
    pub fn poll(&self, cx: &Cx) -> Result<Option<A>, Interrupted> {
        Ok(self.take_up_to(cx, 1)?.pop())
    }

    /// Shuts the queue down, interrupting every parked fiber.
    ///
    /// Buffered and parked items are discarded. Idempotent; later calls are
    /// no-ops.
    pub fn shutdown(&self, cx: &Cx) {
        let (takers, putters) = {
            let mut state = self.core.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            (
                std::mem::take(&mut state.takers),
                state.strategy.drain_putters(),
            )
        };
        trace!(
            takers = takers.len(),
            putters = putters.len(),
            "queue shutdown"
        );
        for taker in takers {
            let _ = taker.interrupt(cx);
        }
        for putter in putters {
            putter.interrupt(cx.fiber_id());
        }
        let _ = self.core.shutdown_hook.succeed(());
    }

    /// Parks the calling fiber until the queue shuts down.
    ///
    /// Returns immediately if it already has.
    ///
    /// # Errors
    ///
    /// Fails with [`Interrupted`] if the fiber is interrupted while parked.
    pub fn await_shutdown(&self, cx: &Cx) -> Result<(), Interrupted> {
        self.core.shutdown_hook.wait(cx).map(|_| ())
    }

    /// Resolves parked takers while items are available, either buffered or
    /// parked behind back-pressure.
    fn complete_takers(state: &mut QueueState<A>) {
        while !state.takers.is_empty() {
            if let Some(item) = state.buffer.dequeue() {
                if let Some(taker) = state.takers.pop_front() {
                    let _ = taker.succeed(item);
                }
                let QueueState {
                    buffer, strategy, ..
                } = &mut *state;
                strategy.on_space(buffer);
            } else if let Strategy::BackPressure { putters } = &mut state.strategy {
                // Empty buffer with parked putters: hand off directly.
                let Some(pending) = putters.pop_front() else {
                    return;
                };
                if let Some(taker) = state.takers.pop_front() {
                    let _ = taker.succeed(pending.item);
                }
                if pending.last_in_batch {
                    let _ = pending.notify.succeed(true);
                }
            } else {
                return;
            }
        }
    }

    /// Resolves items the buffer could not hold, per the queue's strategy.
    ///
    /// Takes the locked state by value so the back-pressure arm can release
    /// the lock before parking the calling fiber.
    fn handle_surplus(
        &self,
        cx: &Cx,
        mut state: parking_lot::MutexGuard<'_, QueueState<A>>,
        items: Vec<A>,
    ) -> Result<bool, Interrupted> {
        match &mut state.strategy {
            Strategy::Dropping => Ok(false),
            Strategy::Sliding => {
                for item in items {
                    Strategy::slide_into(&state.buffer, item);
                }
                Self::complete_takers(&mut state);
                Ok(true)
            }
            Strategy::BackPressure { .. } => {
                let notify: Future<bool, Infallible> = Future::make(cx);
                state.strategy.park_batch(items, &notify);
                Self::complete_takers(&mut state);
                drop(state);
                trace!(fiber = %cx.fiber_id(), "offer parked on full queue");

                match notify.wait(cx) {
                    Ok(Exit::Success(admitted)) => Ok(admitted),
                    Ok(Exit::Failure(cause)) => Err(Interrupted::by(
                        cause
                            .interruptors()
                            .first()
                            .copied()
                            .unwrap_or_else(|| cx.fiber_id()),
                    )),
                    Err(interrupted) => {
                        let mut state = self.core.state.lock();
                        state.strategy.unpark_batch(&notify);
                        drop(state);
                        if let Some(Exit::Success(admitted)) = notify.poll() {
                            return Ok(admitted);
                        }
                        Err(interrupted)
                    }
                }
            }
        }
    }
}
