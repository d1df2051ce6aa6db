//! Bounded ring buffer for buffered subscription channels
//!
//! [`RingBuffer`] decouples a producer that must never block (inbound update
//! delivery) from a consumer that drains on its own schedule (the cyclic
//! owner). It holds `capacity` slots of which `capacity - 1` are usable:
//! `head == tail` means empty and `(head + 1) % capacity == tail` means full.
//!
//! When full, the incoming record is dropped (drop-newest), the overflow
//! counter is incremented and [`SyncError::Overflow`] is returned. Unread
//! records are never overwritten.
//!
//! # Concurrency
//!
//! The buffer supports exactly one producer and one consumer and does no
//! internal locking; all mutation goes through `&mut self`. Sharing one
//! buffer between several producers or consumers on different threads needs
//! an external mutex held by the caller.

use crate::error::{Result, SyncError};

/// Default slot count (19 usable records)
pub const DEFAULT_RING_CAPACITY: usize = 20;

/// Fixed-capacity circular buffer of records
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Box<[T]>,
    head: usize,
    tail: usize,
    overflow_count: u64,
}

impl<T: Default> RingBuffer<T> {
    /// Create a buffer with `capacity` slots (`capacity - 1` usable)
    ///
    /// Fails with a configuration error if `capacity < 2`, since such a
    /// buffer could never hold a record.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity < 2 {
            return Err(SyncError::Config(format!(
                "ring buffer capacity must be at least 2, got {}",
                capacity
            )));
        }

        let slots: Vec<T> = std::iter::repeat_with(T::default).take(capacity).collect();
        Ok(Self {
            slots: slots.into_boxed_slice(),
            head: 0,
            tail: 0,
            overflow_count: 0,
        })
    }

    /// Move the oldest record out of the buffer
    pub fn pop(&mut self) -> Result<T> {
        let mut dest = T::default();
        self.pop_into(&mut dest)?;
        Ok(dest)
    }
}

impl<T> RingBuffer<T> {
    /// Append a record
    ///
    /// Never blocks and never allocates. On a full buffer the record is
    /// dropped and the overflow counter incremented.
    pub fn push(&mut self, record: T) -> Result<()> {
        let next = (self.head + 1) % self.slots.len();
        if next == self.tail {
            self.overflow_count += 1;
            return Err(SyncError::Overflow {
                overflow_count: self.overflow_count,
            });
        }

        self.slots[self.head] = record;
        self.head = next;
        Ok(())
    }

    /// Move the oldest record into `dest`
    ///
    /// The previous contents of `dest` are left in the freed slot, so a
    /// consumer that reuses its destination keeps allocations stable.
    pub fn pop_into(&mut self, dest: &mut T) -> Result<()> {
        if self.head == self.tail {
            return Err(SyncError::Empty);
        }

        std::mem::swap(dest, &mut self.slots[self.tail]);
        self.tail = (self.tail + 1) % self.slots.len();
        Ok(())
    }

    /// Borrow the oldest record without consuming it
    pub fn peek(&self) -> Option<&T> {
        if self.head == self.tail {
            None
        } else {
            Some(&self.slots[self.tail])
        }
    }

    /// Number of unread records
    pub fn pending_count(&self) -> usize {
        if self.head >= self.tail {
            self.head - self.tail
        } else {
            self.slots.len() - (self.tail - self.head)
        }
    }

    /// Total slot count
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Maximum number of records held at once
    pub fn usable_capacity(&self) -> usize {
        self.slots.len() - 1
    }

    /// Number of records dropped because the buffer was full
    ///
    /// Monotonic for the lifetime of the buffer.
    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    /// True when nothing is pending
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// True when the next push would overflow
    pub fn is_full(&self) -> bool {
        (self.head + 1) % self.slots.len() == self.tail
    }

    /// Discard all pending records; the overflow counter is kept
    pub fn clear(&mut self) {
        self.tail = self.head;
    }
}
