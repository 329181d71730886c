//! Replacement queue: the order in which frames were mapped.
//!
//! The front is always the next eviction victim. Nothing about how recently a
//! page was used is recorded, so a page that is touched constantly is evicted
//! exactly as early as one that was touched once.

use super::error::VmError;
use alloc::{boxed::Box, vec::Vec};

pub struct FifoQueue {
    slots: Box<[usize]>,
    front: usize,
    len: usize,
}

impl FifoQueue {
    pub fn new(capacity: usize) -> Result<Self, VmError> {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| VmError::AllocationFailure)?;
        slots.resize(capacity, 0);

        Ok(Self {
            slots: slots.into_boxed_slice(),
            front: 0,
            len: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn physical(&self, logical: usize) -> usize {
        (self.front + logical) % self.slots.len()
    }

    /// Appends `frame` at the rear.
    ///
    /// A frame is enqueued once per mapping, and the queue is as large as the
    /// page table, so running out of room means the table is corrupt.
    pub fn enqueue(&mut self, frame: usize) {
        assert!(
            self.len < self.slots.len(),
            "replacement queue overflow enqueuing frame {frame}"
        );
        let rear = self.physical(self.len);
        self.slots[rear] = frame;
        self.len += 1;
    }

    /// Puts `frame` back at the front, ahead of everything queued.
    pub fn push_front(&mut self, frame: usize) {
        assert!(
            self.len < self.slots.len(),
            "replacement queue overflow enqueuing frame {frame}"
        );
        self.front = (self.front + self.slots.len() - 1) % self.slots.len();
        self.slots[self.front] = frame;
        self.len += 1;
    }

    /// Removes and returns the oldest frame.
    ///
    /// Callers must check [`FifoQueue::is_empty`] first.
    pub fn dequeue(&mut self) -> usize {
        assert!(self.len > 0, "dequeue from an empty replacement queue");
        let frame = self.slots[self.front];
        self.front = (self.front + 1) % self.slots.len();
        self.len -= 1;
        frame
    }

    /// Drops `frame` from wherever it sits, keeping everything else in order.
    pub fn remove(&mut self, frame: usize) -> bool {
        let Some(position) = self.iter().position(|queued| queued == frame) else {
            return false;
        };
        for logical in position..self.len - 1 {
            let to = self.physical(logical);
            let from = self.physical(logical + 1);
            self.slots[to] = self.slots[from];
        }
        self.len -= 1;
        true
    }

    /// Queued frames, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).map(|logical| self.slots[self.physical(logical)])
    }
}
