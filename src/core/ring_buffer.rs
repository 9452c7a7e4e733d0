//! Bounded Multi-Producer Multi-Consumer Ring Buffer
//!
//! Slot admission is governed by two counting resources:
//! - Producers wait on `free_slots` before entering the critical section
//! - Consumers wait on `filled_slots` before entering the critical section
//! - Waiting suspends on a condvar, never spins
//!
//! Producers admit through [`CircularBuffer::enqueue_next`]: the offset is
//! reserved, its byte read and the slot filled in one critical section, so
//! ring order equals `seq` order. Whoever holds the next seq to flush can
//! therefore always flush it, whatever the producer/consumer counts.
//! [`CircularBuffer::enqueue`] takes an explicit seq and makes no such
//! promise.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::trace;

use super::allocator::PositionAllocator;
use super::arbiter::{Arbiter, BlockGuard};
use crate::error::Result;

/// Nanoseconds since the epoch, for slot insertion stamps.
#[inline(always)]
fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Contents of one slot, as handed to a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Item {
    /// Encoded value.
    pub value: u8,
    pub seq: u64,
    /// Slot the item occupied, for diagnostics.
    pub local_index: usize,
    /// Insertion time, nanoseconds since the epoch.
    pub timestamp: i64,
}

/// Producer/consumer view of the shared ring.
#[derive(Debug, Clone)]
pub struct CircularBuffer {
    arbiter: Arc<Arbiter>,
}

impl CircularBuffer {
    pub fn new(arbiter: Arc<Arbiter>) -> Self {
        Self { arbiter }
    }

    /// Store `value` tagged with `offset`, suspending while the ring is full.
    ///
    /// Returns the slot index written.
    pub fn enqueue(&self, offset: u64, value: u8) -> Result<usize> {
        self.arbiter.free_slots().acquire()?;
        let index = Self::write_slot(self.arbiter.lock()?, offset, value);
        self.arbiter.filled_slots().release()?;
        Ok(index)
    }

    /// Admit the item at the next source offset.
    ///
    /// Waits for a free slot, then under the lock hands the next offset to
    /// `read`. `Some(encoded)` fills the slot at the write cursor and
    /// advances the offset counter; `None` (end of source) or an error
    /// leaves the counter alone and returns the slot permit. Returns the
    /// admitted `(seq, slot)`, or `None` at end of source.
    ///
    /// `read` runs inside the critical section and must be O(1).
    pub fn enqueue_next<F>(&self, read: F) -> Result<Option<(u64, usize)>>
    where
        F: FnOnce(u64) -> Result<Option<u8>>,
    {
        self.arbiter.free_slots().acquire()?;

        let admitted = {
            let mut block = self.arbiter.lock()?;
            let offset = block.header().next_source_offset as u64;
            match read(offset) {
                Ok(Some(value)) => {
                    PositionAllocator::advance(block.header_mut());
                    Ok(Some((offset, Self::write_slot(block, offset, value))))
                }
                Ok(None) => Ok(None),
                Err(e) => Err(e),
            }
        };

        match admitted {
            Ok(Some(admitted)) => {
                self.arbiter.filled_slots().release()?;
                Ok(Some(admitted))
            }
            Ok(None) => {
                self.arbiter.free_slots().release()?;
                Ok(None)
            }
            Err(e) => {
                // Permit goes back even if the block vanished meanwhile
                let _ = self.arbiter.free_slots().release();
                Err(e)
            }
        }
    }

    /// Like [`enqueue`](Self::enqueue) but returns `None` instead of waiting.
    pub fn try_enqueue(&self, offset: u64, value: u8) -> Result<Option<usize>> {
        if !self.arbiter.free_slots().try_acquire()? {
            return Ok(None);
        }
        let index = Self::write_slot(self.arbiter.lock()?, offset, value);
        self.arbiter.filled_slots().release()?;
        Ok(Some(index))
    }

    /// Take the item at the read cursor, suspending while the ring is empty.
    pub fn dequeue(&self) -> Result<Item> {
        self.arbiter.filled_slots().acquire()?;
        let item = Self::take_slot(self.arbiter.lock()?);
        self.arbiter.free_slots().release()?;
        Ok(item)
    }

    /// Like [`dequeue`](Self::dequeue) but returns `None` instead of waiting.
    pub fn try_dequeue(&self) -> Result<Option<Item>> {
        if !self.arbiter.filled_slots().try_acquire()? {
            return Ok(None);
        }
        let item = Self::take_slot(self.arbiter.lock()?);
        self.arbiter.free_slots().release()?;
        Ok(Some(item))
    }

    // Caller holds a free-slot permit, so the cursor slot is empty.
    fn write_slot(mut block: BlockGuard<'_>, offset: u64, value: u8) -> usize {
        let capacity = block.capacity();
        let (header, slots) = block.parts_mut();

        let index = header.write_cursor as usize;
        let slot = &mut slots[index];
        debug_assert!(!slot.is_occupied(), "slot {} overwritten while full", index);
        slot.fill(value, index as i32, now_ns(), offset as i64);

        header.write_cursor = ((index + 1) % capacity) as i32;
        header.filled_count += 1;
        header.total_produced += 1;

        trace!(slot = index, seq = offset, value, "slot filled");
        index
    }

    // Caller holds a filled-slot permit, so the cursor slot is occupied.
    fn take_slot(mut block: BlockGuard<'_>) -> Item {
        let capacity = block.capacity();
        let (header, slots) = block.parts_mut();

        let index = header.read_cursor as usize;
        let slot = &mut slots[index];
        debug_assert!(slot.is_occupied(), "slot {} read while empty", index);
        let item = Item {
            value: slot.value,
            seq: slot.seq as u64,
            local_index: slot.local_index as usize,
            timestamp: slot.timestamp,
        };
        slot.clear();

        header.read_cursor = ((index + 1) % capacity) as i32;
        header.filled_count -= 1;
        header.total_consumed += 1;

        trace!(slot = index, seq = item.seq, "slot drained");
        item
    }

    /// Occupied slots, as seen by the filled-slot resource.
    #[inline]
    pub fn len(&self) -> Result<usize> {
        self.arbiter.filled_slots().value()
    }

    #[inline]
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.arbiter.capacity()
    }
}
