//! Lock-free ring buffer for single-producer, single-consumer scenarios.
//!
//! Generalizes the fixed-size, power-of-two interrupt-handler ring buffer
//! pattern to a runtime-sized queue: streaming configurations pick buffer
//! sizes at runtime (see [`crate::config::StreamingConfig`]), so capacity
//! cannot be a const generic here.

use std::sync::atomic::{AtomicUsize, Ordering};

/// A lock-free SPSC ring buffer holding up to `capacity - 1` elements.
///
/// One slot is always kept empty so that `head == tail` is an unambiguous
/// "empty" signal and `(tail + 1) % capacity == head` is an unambiguous
/// "full" signal; no separate "is full" flag or element count is needed.
///
/// # Safety
///
/// Safe for exactly one producer thread calling [`RingBuffer::push`] and one
/// consumer thread calling [`RingBuffer::pop`] concurrently. Using more than
/// one producer or consumer is undefined behavior.
pub struct RingBuffer<T> {
    buf: Box<[std::cell::UnsafeCell<T>]>,
    capacity: usize,
    head: AtomicUsize,
    tail: AtomicUsize,
}

unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T: Default + Clone> RingBuffer<T> {
    /// Creates a new ring buffer able to hold `capacity` elements.
    ///
    /// Internally allocates `capacity + 1` slots per the single-empty-slot
    /// invariant above.
    pub fn new(capacity: usize) -> Self {
        let storage_len = capacity + 1;
        let buf = (0..storage_len)
            .map(|_| std::cell::UnsafeCell::new(T::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { buf, capacity, head: AtomicUsize::new(0), tail: AtomicUsize::new(0) }
    }

    fn storage_len(&self) -> usize {
        self.capacity + 1
    }

    /// The number of elements this buffer can hold at once.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Pushes an element. Returns `false` without writing if the buffer is full.
    ///
    /// Call only from the producer thread.
    pub fn push(&self, value: T) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let next_tail = (tail + 1) % self.storage_len();
        if next_tail == self.head.load(Ordering::Acquire) {
            return false;
        }
        unsafe {
            *self.buf[tail].get() = value;
        }
        self.tail.store(next_tail, Ordering::Release);
        true
    }

    /// Pops the oldest element. Returns `None` if the buffer is empty.
    ///
    /// Call only from the consumer thread.
    pub fn pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        if head == self.tail.load(Ordering::Acquire) {
            return None;
        }
        let value = unsafe { (*self.buf[head].get()).clone() };
        let next_head = (head + 1) % self.storage_len();
        self.head.store(next_head, Ordering::Release);
        Some(value)
    }

    /// Number of elements currently queued for the consumer.
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        if tail >= head {
            tail - head
        } else {
            self.storage_len() - head + tail
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Free slots remaining before [`RingBuffer::push`] starts failing.
    pub fn available_space(&self) -> usize {
        self.capacity - self.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_preserves_order() {
        let rb: RingBuffer<f64> = RingBuffer::new(4);
        assert!(rb.push(1.0));
        assert!(rb.push(2.0));
        assert_eq!(rb.pop(), Some(1.0));
        assert_eq!(rb.pop(), Some(2.0));
        assert_eq!(rb.pop(), None);
    }

    #[test]
    fn rejects_push_when_full() {
        let rb: RingBuffer<f64> = RingBuffer::new(2);
        assert!(rb.push(1.0));
        assert!(rb.push(2.0));
        assert!(!rb.push(3.0));
        assert_eq!(rb.len(), 2);
        assert_eq!(rb.pop(), Some(1.0));
        assert!(rb.push(3.0));
    }

    #[test]
    fn capacity_is_usable_slots_not_storage_len() {
        let rb: RingBuffer<f64> = RingBuffer::new(3);
        assert!(rb.push(1.0));
        assert!(rb.push(2.0));
        assert!(rb.push(3.0));
        assert!(!rb.push(4.0));
        assert_eq!(rb.available_space(), 0);
    }
}
