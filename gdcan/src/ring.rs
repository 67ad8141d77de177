//! Single producer single consumer frame queues.
//!
//! One side of each queue lives in interrupt context, the other in thread
//! context, so the implementation never locks. Each side owns exactly one
//! index: the producer advances `head` after writing a slot, the consumer
//! advances `tail` after reading one. One slot is kept free to tell a full
//! queue from an empty one.

use core::sync::atomic::{AtomicUsize, Ordering};
use gdcan_core::Frame;
use vcell::VolatileCell;

/// Backing storage for one queue.
///
/// `N` must be zero or a power of two between 4 and 512. A zero capacity
/// queue accepts nothing, which the transmit path uses to run without
/// software buffering. Meant to be placed in a `static` and handed to the
/// driver by reference.
#[repr(C)]
pub struct QueueStorage<const N: usize> {
    slots: [VolatileCell<Frame>; N],
    head: AtomicUsize,
    tail: AtomicUsize,
}

// Shared between the interrupt handler and thread context. Soundness rests
// on the split into exactly one producer and one consumer handle, each of
// which writes only its own index.
unsafe impl<const N: usize> Sync for QueueStorage<N> {}

impl<const N: usize> QueueStorage<N> {
    /// Creates empty storage.
    pub const fn new() -> Self {
        Self {
            slots: [const { VolatileCell::new(Frame::empty()) }; N],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// Whether `N` is an acceptable queue capacity.
    pub const fn valid_capacity() -> bool {
        N == 0 || (N >= 4 && N <= 512 && N.is_power_of_two())
    }

    pub(crate) fn split(&mut self) -> (Producer<'_>, Consumer<'_>) {
        let ring = Ring {
            slots: &self.slots,
            head: &self.head,
            tail: &self.tail,
        };
        (Producer { ring }, Consumer { ring })
    }
}

impl<const N: usize> Default for QueueStorage<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Capacity erased view of a queue, shared by both handles.
#[derive(Copy, Clone)]
struct Ring<'a> {
    slots: &'a [VolatileCell<Frame>],
    head: &'a AtomicUsize,
    tail: &'a AtomicUsize,
}

impl Ring<'_> {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn count(&self) -> usize {
        let cap = self.capacity();
        if cap == 0 {
            return 0;
        }
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (head + cap - tail) % cap
    }

    fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }

    /// Slots still accepting frames. One slot stays reserved.
    fn free(&self) -> usize {
        let cap = self.capacity();
        if cap == 0 {
            0
        } else {
            cap - 1 - self.count()
        }
    }
}

/// Write end of a queue.
pub struct Producer<'a> {
    ring: Ring<'a>,
}

// The handles are meant to be moved into interrupt context. Each handle
// writes only its own index and touches only the slots that index grants
// it, so a cell is never accessed from both sides at the same time.
unsafe impl Send for Producer<'_> {}
unsafe impl Send for Consumer<'_> {}

impl Producer<'_> {
    /// Appends a frame. Returns `false` when the queue is full.
    pub fn push(&mut self, frame: Frame) -> bool {
        let cap = self.ring.capacity();
        if cap == 0 {
            return false;
        }
        let head = self.ring.head.load(Ordering::Relaxed);
        let next = (head + 1) % cap;
        if next == self.ring.tail.load(Ordering::Acquire) {
            return false;
        }
        self.ring.slots[head].set(frame);
        self.ring.head.store(next, Ordering::Release);
        true
    }

    /// Whether a push would currently fail.
    pub fn is_full(&self) -> bool {
        self.ring.free() == 0
    }

    pub(crate) fn free(&self) -> usize {
        self.ring.free()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

/// Read end of a queue.
pub struct Consumer<'a> {
    ring: Ring<'a>,
}

impl Consumer<'_> {
    /// Copies the oldest frame out without removing it.
    pub fn peek(&self) -> Option<Frame> {
        let tail = self.ring.tail.load(Ordering::Relaxed);
        if tail == self.ring.head.load(Ordering::Acquire) {
            return None;
        }
        Some(self.ring.slots[tail].get())
    }

    /// Removes the oldest frame.
    pub fn pop(&mut self) {
        let cap = self.ring.capacity();
        let tail = self.ring.tail.load(Ordering::Relaxed);
        if cap != 0 && tail != self.ring.head.load(Ordering::Acquire) {
            self.ring.tail.store((tail + 1) % cap, Ordering::Release);
        }
    }

    /// Removes and returns the oldest frame.
    pub fn read(&mut self) -> Option<Frame> {
        let frame = self.peek()?;
        self.pop();
        Some(frame)
    }

    /// Frames currently queued.
    pub fn count(&self) -> usize {
        self.ring.count()
    }

    /// Whether the queue holds no frames.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use embedded_can::StandardId;

    fn frame(tag: u8) -> Frame {
        Frame::new_data(StandardId::new(tag as u16).unwrap(), &[tag]).unwrap()
    }

    #[test]
    fn capacity_rules() {
        assert!(QueueStorage::<0>::valid_capacity());
        assert!(QueueStorage::<4>::valid_capacity());
        assert!(QueueStorage::<64>::valid_capacity());
        assert!(QueueStorage::<512>::valid_capacity());
        assert!(!QueueStorage::<2>::valid_capacity());
        assert!(!QueueStorage::<24>::valid_capacity());
        assert!(!QueueStorage::<1024>::valid_capacity());
    }

    #[test]
    fn holds_capacity_minus_one() {
        let mut storage = QueueStorage::<8>::new();
        let (mut producer, consumer) = storage.split();
        for tag in 0..7 {
            assert!(producer.push(frame(tag)));
        }
        assert!(producer.is_full());
        assert!(!producer.push(frame(7)));
        assert_eq!(consumer.count(), 7);
    }

    #[test]
    fn frames_come_out_in_order() {
        let mut storage = QueueStorage::<4>::new();
        let (mut producer, mut consumer) = storage.split();
        assert!(producer.push(frame(1)));
        assert!(producer.push(frame(2)));
        assert_eq!(consumer.read().unwrap().data(), &[1]);
        assert!(producer.push(frame(3)));
        assert_eq!(consumer.read().unwrap().data(), &[2]);
        assert_eq!(consumer.read().unwrap().data(), &[3]);
        assert!(consumer.read().is_none());
    }

    #[test]
    fn peek_does_not_consume() {
        let mut storage = QueueStorage::<4>::new();
        let (mut producer, mut consumer) = storage.split();
        producer.push(frame(9));
        assert_eq!(consumer.peek().unwrap().data(), &[9]);
        assert_eq!(consumer.peek().unwrap().data(), &[9]);
        assert_eq!(consumer.count(), 1);
        assert_eq!(consumer.read().unwrap().data(), &[9]);
        assert!(consumer.is_empty());
    }

    #[test]
    fn count_survives_wraparound() {
        let mut storage = QueueStorage::<4>::new();
        let (mut producer, mut consumer) = storage.split();
        for round in 0..10 {
            assert!(producer.push(frame(round)));
            assert!(producer.push(frame(round)));
            assert_eq!(consumer.count(), 2);
            consumer.pop();
            consumer.pop();
            assert_eq!(consumer.count(), 0);
        }
    }

    #[test]
    fn handles_can_move_into_interrupt_context() {
        fn assert_send<T: Send>() {}
        assert_send::<Producer<'static>>();
        assert_send::<Consumer<'static>>();
    }

    #[test]
    fn zero_capacity_accepts_nothing() {
        let mut storage = QueueStorage::<0>::new();
        let (mut producer, consumer) = storage.split();
        assert!(producer.is_full());
        assert!(!producer.push(frame(1)));
        assert!(consumer.is_empty());
        assert_eq!(consumer.count(), 0);
    }
}
