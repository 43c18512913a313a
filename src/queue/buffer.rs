//! The non-blocking buffer underlying a [`Queue`](super::Queue).
//!
//! A thin facade over `crossbeam-queue`: a fixed-capacity ring for bounded
//! queues, a segmented list for unbounded ones. All fallible behavior is
//! non-blocking; fiber parking is layered on top by the owning queue.

use crossbeam_queue::{ArrayQueue, SegQueue};

/// A non-blocking FIFO buffer, bounded or unbounded.
#[derive(Debug)]
pub(crate) enum MutableQueue<A> {
    Bounded(ArrayQueue<A>),
    Unbounded(SegQueue<A>),
}

impl<A> MutableQueue<A> {
    /// Creates a fixed-capacity buffer.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub(crate) fn bounded(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be non-zero");
        Self::Bounded(ArrayQueue::new(capacity))
    }

    /// Creates an unbounded buffer.
    pub(crate) fn unbounded() -> Self {
        Self::Unbounded(SegQueue::new())
    }

    /// Appends an item, handing it back if the buffer is full.
    pub(crate) fn enqueue(&self, item: A) -> Result<(), A> {
        match self {
            Self::Bounded(ring) => ring.push(item),
            Self::Unbounded(seg) => {
                seg.push(item);
                Ok(())
            }
        }
    }

    /// Removes the oldest item, if any.
    pub(crate) fn dequeue(&self) -> Option<A> {
        match self {
            Self::Bounded(ring) => ring.pop(),
            Self::Unbounded(seg) => seg.pop(),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        match self {
            Self::Bounded(ring) => ring.capacity(),
            Self::Unbounded(_) => usize::MAX,
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Bounded(ring) => ring.len(),
            Self::Unbounded(seg) => seg.len(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        match self {
            Self::Bounded(ring) => ring.is_empty(),
            Self::Unbounded(seg) => seg.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_rejects_overflow_and_preserves_order() {
        let buf = MutableQueue::bounded(2);
        assert!(buf.enqueue(1).is_ok());
        assert!(buf.enqueue(2).is_ok());
        assert_eq!(buf.enqueue(3), Err(3));
        assert_eq!(buf.len(), 2);

        assert_eq!(buf.dequeue(), Some(1));
        assert_eq!(buf.dequeue(), Some(2));
        assert_eq!(buf.dequeue(), None);
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 2);
    }

    #[test]
    fn unbounded_never_fills() {
        let buf = MutableQueue::unbounded();
        for n in 0..100 {
            assert!(buf.enqueue(n).is_ok());
        }
        assert_eq!(buf.len(), 100);
        assert_eq!(buf.capacity(), usize::MAX);
        assert_eq!(buf.dequeue(), Some(0));
    }

    #[test]
    #[should_panic(expected = "queue capacity must be non-zero")]
    fn zero_capacity_is_rejected() {
        let _ = MutableQueue::<i32>::bounded(0);
    }
}
