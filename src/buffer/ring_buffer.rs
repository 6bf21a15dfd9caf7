//! Bounded lock-free MPMC ring buffer.
//!
//! Every slot carries a sequence number that tells producers and consumers
//! whose turn it is:
//! - `seq == pos`: the slot is free for the producer claiming `pos`
//! - `seq == pos + 1`: the slot holds the item for the consumer claiming `pos`
//!
//! A consumer hands the slot back to the producer one lap ahead by storing
//! `pos + capacity`. Cursors only ever grow; the slot index is `pos % capacity`
//! so any positive capacity works.
//!
//! When the buffer is full the incoming item is rejected (drop-newest) and
//! counted. Nothing here ever blocks or spins on a lock.

use crate::core::{PipelineError, Result};
use crossbeam::utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

struct Slot<T> {
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Fixed-capacity queue shared between many producers and the export worker.
pub struct RingBuffer<T> {
    slots: Box<[Slot<T>]>,
    capacity: usize,
    /// Next position to dequeue
    head: CachePadded<AtomicUsize>,
    /// Next position to enqueue
    tail: CachePadded<AtomicUsize>,
    added: AtomicU64,
    removed: AtomicU64,
    dropped: AtomicU64,
}

// SAFETY: a slot's value is only touched by the single thread that won the
// cursor CAS for its position, and the sequence number's release/acquire pair
// orders that access with the previous owner's.
unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    /// Create a buffer holding at most `capacity` items.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(PipelineError::config("ring buffer capacity must be greater than 0"));
        }

        let slots = (0..capacity)
            .map(|i| Slot {
                sequence: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            slots,
            capacity,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            added: AtomicU64::new(0),
            removed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        })
    }

    /// Enqueue without blocking. Returns false and counts a drop when full.
    #[inline]
    pub fn try_enqueue(&self, item: T) -> bool {
        let mut pos = self.tail.load(Ordering::Relaxed);

        loop {
            let slot = &self.slots[pos % self.capacity];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos) as isize;

            if diff == 0 {
                match self.tail.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: winning the CAS gives exclusive access to the slot
                        unsafe { (*slot.value.get()).write(item) };
                        slot.sequence.store(pos.wrapping_add(1), Ordering::Release);
                        self.added.fetch_add(1, Ordering::Relaxed);
                        return true;
                    },
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                // Slot still holds an item from the previous lap
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return false;
            } else {
                pos = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Dequeue the oldest available item without blocking.
    #[inline]
    pub fn try_dequeue(&self) -> Option<T> {
        let mut pos = self.head.load(Ordering::Relaxed);

        loop {
            let slot = &self.slots[pos % self.capacity];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos.wrapping_add(1)) as isize;

            if diff == 0 {
                match self.head.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: seq == pos + 1 means a producer finished writing
                        // this slot, and winning the CAS makes us its only reader
                        let item = unsafe { (*slot.value.get()).assume_init_read() };
                        slot.sequence
                            .store(pos.wrapping_add(self.capacity), Ordering::Release);
                        self.removed.fetch_add(1, Ordering::Relaxed);
                        return Some(item);
                    },
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return None;
            } else {
                pos = self.head.load(Ordering::Relaxed);
            }
        }
    }

    /// Dequeue up to `max` items, oldest first
    pub fn drain(&self, max: usize) -> Vec<T> {
        let mut items = Vec::with_capacity(max.min(self.len()));
        while items.len() < max {
            match self.try_dequeue() {
                Some(item) => items.push(item),
                None => break,
            }
        }
        items
    }

    /// Current occupancy. Eventually consistent while producers are active.
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        tail.wrapping_sub(head).min(self.capacity)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items successfully enqueued since creation
    pub fn added_count(&self) -> u64 {
        self.added.load(Ordering::Acquire)
    }

    /// Positions handed out to producers. Runs ahead of `added_count` by the
    /// enqueues that are still writing their item.
    pub fn claimed_count(&self) -> u64 {
        u64::try_from(self.tail.load(Ordering::Acquire)).unwrap_or(u64::MAX)
    }

    /// Items dequeued since creation
    pub fn removed_count(&self) -> u64 {
        self.removed.load(Ordering::Acquire)
    }

    /// Items rejected because the buffer was full
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<T> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        while self.try_dequeue().is_some() {}
    }
}

impl<T> std::fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("dropped", &self.dropped_count())
            .finish()
    }
}
