//! Overflow policies for bounded queues.
//!
//! When an offer arrives and the buffer is full, the queue consults its
//! strategy: back-pressure parks the offering fiber until space frees up,
//! dropping discards the new item, sliding evicts the oldest buffered item.

use std::collections::VecDeque;
use std::convert::Infallible;

use crate::future::Future;
use crate::types::FiberId;

use super::buffer::MutableQueue;

/// An offer parked behind a full buffer under back-pressure.
///
/// A multi-item offer registers one entry per item, all sharing a single
/// `notify` cell; only the entry carrying the batch's last item resolves it,
/// so the offering fiber resumes exactly when its whole batch is admitted.
pub(crate) struct PendingOffer<A> {
    pub(crate) item: A,
    pub(crate) notify: Future<bool, Infallible>,
    pub(crate) last_in_batch: bool,
}

/// What a bounded queue does with surplus items.
pub(crate) enum Strategy<A> {
    /// Park offering fibers until buffer space frees up.
    BackPressure { putters: VecDeque<PendingOffer<A>> },
    /// Discard surplus items; the offer reports `false`.
    Dropping,
    /// Evict the oldest buffered items to admit the new ones.
    Sliding,
}

impl<A: Clone> Strategy<A> {
    pub(crate) fn back_pressure() -> Self {
        Self::BackPressure {
            putters: VecDeque::new(),
        }
    }

    /// Items handed to the strategy but not yet in the buffer.
    pub(crate) fn surplus_size(&self) -> usize {
        match self {
            Self::BackPressure { putters } => putters.len(),
            Self::Dropping | Self::Sliding => 0,
        }
    }

    /// Parks a batch of surplus items behind the buffer.
    ///
    /// Only meaningful for back-pressure; the caller resolves drop/slide
    /// surplus without parking.
    pub(crate) fn park_batch(&mut self, items: Vec<A>, notify: &Future<bool, Infallible>) {
        if let Self::BackPressure { putters } = self {
            let last = items.len().saturating_sub(1);
            for (index, item) in items.into_iter().enumerate() {
                putters.push_back(PendingOffer {
                    item,
                    notify: notify.clone(),
                    last_in_batch: index == last,
                });
            }
        }
    }

    /// Moves parked items into freed buffer space, oldest offer first.
    ///
    /// Resolves an offer's `notify` cell once its last item is admitted.
    pub(crate) fn on_space(&mut self, buffer: &MutableQueue<A>) {
        let Self::BackPressure { putters } = self else {
            return;
        };
        while let Some(pending) = putters.pop_front() {
            match buffer.enqueue(pending.item) {
                Ok(()) => {
                    if pending.last_in_batch {
                        let _ = pending.notify.succeed(true);
                    }
                }
                Err(item) => {
                    putters.push_front(PendingOffer {
                        item,
                        notify: pending.notify,
                        last_in_batch: pending.last_in_batch,
                    });
                    return;
                }
            }
        }
    }

    /// Admits `item` into a full buffer by evicting from the front.
    pub(crate) fn slide_into(buffer: &MutableQueue<A>, item: A) {
        let mut item = item;
        loop {
            match buffer.enqueue(item) {
                Ok(()) => return,
                Err(back) => {
                    if buffer.dequeue().is_none() {
                        return;
                    }
                    item = back;
                }
            }
        }
    }

    /// Removes every parked entry sharing `notify`'s cell.
    pub(crate) fn unpark_batch(&mut self, notify: &Future<bool, Infallible>) {
        if let Self::BackPressure { putters } = self {
            putters.retain(|pending| !pending.notify.same_cell(notify));
        }
    }

    /// Drains all parked offers, for queue shutdown.
    pub(crate) fn drain_putters(&mut self) -> VecDeque<PendingOffer<A>> {
        match self {
            Self::BackPressure { putters } => std::mem::take(putters),
            Self::Dropping | Self::Sliding => VecDeque::new(),
        }
    }
}

impl<A> PendingOffer<A> {
    pub(crate) fn interrupt(&self, by: FiberId) {
        let _ = self.notify.interrupt_as(by);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Exit;

    fn notify() -> Future<bool, Infallible> {
        Future::unsafe_make(FiberId::new_for_test(1))
    }

    #[test]
    fn park_batch_marks_only_the_last_item() {
        let mut strategy = Strategy::back_pressure();
        let cell = notify();
        strategy.park_batch(vec![1, 2, 3], &cell);

        let Strategy::BackPressure { putters } = &strategy else {
            panic!("expected back-pressure");
        };
        let flags: Vec<bool> = putters.iter().map(|p| p.last_in_batch).collect();
        assert_eq!(flags, vec![false, false, true]);
        assert_eq!(strategy.surplus_size(), 3);
    }

    #[test]
    fn on_space_promotes_in_offer_order_and_resolves_notify() {
        let buffer = MutableQueue::bounded(2);
        let mut strategy = Strategy::back_pressure();
        let cell = notify();
        strategy.park_batch(vec![10, 20], &cell);

        strategy.on_space(&buffer);
        assert_eq!(strategy.surplus_size(), 0);
        assert_eq!(buffer.dequeue(), Some(10));
        assert_eq!(buffer.dequeue(), Some(20));
        assert_eq!(cell.poll(), Some(Exit::Success(true)));
    }

    #[test]
    fn on_space_stops_when_the_buffer_refills() {
        let buffer = MutableQueue::bounded(1);
        let mut strategy = Strategy::back_pressure();
        let cell = notify();
        strategy.park_batch(vec![1, 2], &cell);

        strategy.on_space(&buffer);
        assert_eq!(strategy.surplus_size(), 1);
        assert!(cell.poll().is_none());

        assert_eq!(buffer.dequeue(), Some(1));
        strategy.on_space(&buffer);
        assert_eq!(strategy.surplus_size(), 0);
        assert_eq!(cell.poll(), Some(Exit::Success(true)));
    }

    #[test]
    fn slide_into_evicts_the_oldest() {
        let buffer = MutableQueue::bounded(2);
        assert!(buffer.enqueue(1).is_ok());
        assert!(buffer.enqueue(2).is_ok());

        Strategy::slide_into(&buffer, 3);
        assert_eq!(buffer.dequeue(), Some(2));
        assert_eq!(buffer.dequeue(), Some(3));
    }

    #[test]
    fn unpark_batch_removes_only_matching_entries() {
        let mut strategy = Strategy::back_pressure();
        let first = notify();
        let second = notify();
        strategy.park_batch(vec![1], &first);
        strategy.park_batch(vec![2], &second);

        strategy.unpark_batch(&first);
        let Strategy::BackPressure { putters } = &strategy else {
            panic!("expected back-pressure");
        };
        assert_eq!(putters.len(), 1);
        assert!(putters[0].notify.same_cell(&second));
    }
}
