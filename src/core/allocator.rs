//! Position Allocator
//!
//! Hands out source offsets `0, 1, 2, …` to any number of producers. Each
//! offset goes to exactly one caller; the counter lives in the control block
//! and only moves under the arbitration lock.
//!
//! Producers do not call this directly: the ring advances the counter in
//! the same critical section that fills the slot, see
//! [`CircularBuffer::enqueue_next`](super::CircularBuffer::enqueue_next).

use std::sync::Arc;

use super::arbiter::Arbiter;
use super::layout::ControlHeader;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct PositionAllocator {
    arbiter: Arc<Arbiter>,
}

impl PositionAllocator {
    pub fn new(arbiter: Arc<Arbiter>) -> Self {
        Self { arbiter }
    }

    /// Reserve the next unassigned offset.
    #[inline]
    pub fn reserve_next_offset(&self) -> Result<u64> {
        let mut block = self.arbiter.lock()?;
        Ok(Self::advance(block.header_mut()))
    }

    /// Take the next offset inside a critical section the caller already holds.
    #[inline(always)]
    pub(crate) fn advance(header: &mut ControlHeader) -> u64 {
        let offset = header.next_source_offset;
        header.next_source_offset += 1;
        offset as u64
    }

    /// Current value of the counter (diagnostics).
    pub fn peek(&self) -> Result<u64> {
        Ok(self.arbiter.lock()?.header().next_source_offset as u64)
    }
}
