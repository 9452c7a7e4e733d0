//! Shared Control Block layout
//!
//! Region layout (flat, `#[repr(C)]`, readable by other processes):
//! ┌─────────────────────────────────────────────────────┐
//! │ ControlHeader (128 bytes, fixed)                    │
//! ├─────────────────────────────────────────────────────┤
//! │ SlotRecord × capacity (32 bytes each)               │
//! └─────────────────────────────────────────────────────┘
//!
//! Field order follows the persisted control block: cursors and counters
//! first, then the ordering state, then the slots.

use std::mem;

/// Region validation magic ("SEQRING1")
pub const MAGIC: u64 = 0x5345_5152_494E_4731;
pub const VERSION: u32 = 1;
pub const HEADER_SIZE: usize = mem::size_of::<ControlHeader>();
pub const SLOT_SIZE: usize = mem::size_of::<SlotRecord>();

/// Header of the shared region.
///
/// Every field except `magic`, `version` and `capacity` is mutated only
/// while the arbitration lock is held.
#[repr(C, align(64))]
#[derive(Debug, Clone, Copy)]
pub struct ControlHeader {
    pub magic: u64,
    pub version: u32,
    /// Fixed slot count, written once at creation.
    pub capacity: i32,
    pub write_cursor: i32,
    pub read_cursor: i32,
    pub filled_count: i32,
    _reserved: i32,
    /// Next unassigned source offset.
    pub next_source_offset: i64,
    pub total_produced: i64,
    pub total_consumed: i64,
    pub producers_active: i32,
    pub consumers_active: i32,
    pub producers_ever: i32,
    pub consumers_ever: i32,
    /// Next seq allowed to reach the output.
    pub next_expected_seq: i64,
}

/// One cell of the circular buffer.
///
/// Fields keep the persisted order `value, local_index, timestamp,
/// occupied, seq`, padded explicitly so every integer stays aligned.
/// `occupied` is stored as a byte so a zeroed region is a valid empty ring.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotRecord {
    pub value: u8,
    _pad0: [u8; 3],
    pub local_index: i32,
    /// Insertion time in nanoseconds since the epoch.
    pub timestamp: i64,
    occupied: u8,
    _pad1: [u8; 7],
    pub seq: i64,
}

impl SlotRecord {
    #[inline(always)]
    pub fn is_occupied(&self) -> bool {
        self.occupied != 0
    }

    /// Fill the slot. `seq` is never rewritten until the slot is cleared.
    #[inline(always)]
    pub fn fill(&mut self, value: u8, local_index: i32, timestamp: i64, seq: i64) {
        self.value = value;
        self.local_index = local_index;
        self.timestamp = timestamp;
        self.seq = seq;
        self.occupied = 1;
    }

    #[inline(always)]
    pub fn clear(&mut self) {
        self.occupied = 0;
    }
}

/// A broken control block invariant, reported by [`ControlHeader::check_invariants`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    FilledOutOfRange { filled: i32, capacity: i32 },
    CursorOutOfRange { cursor: &'static str, value: i32 },
    FlushAheadOfProduction { next_expected: i64, produced: i64 },
    ConsumedAheadOfProduction { consumed: i64, produced: i64 },
    CursorsDisagree { write: i32, read: i32, filled: i32 },
}

impl ControlHeader {
    /// Zeroed header for a ring of `capacity` slots.
    pub fn new(capacity: i32) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            capacity,
            write_cursor: 0,
            read_cursor: 0,
            filled_count: 0,
            _reserved: 0,
            next_source_offset: 0,
            total_produced: 0,
            total_consumed: 0,
            producers_active: 0,
            consumers_active: 0,
            producers_ever: 0,
            consumers_ever: 0,
            next_expected_seq: 0,
        }
    }

    #[inline(always)]
    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC && self.version == VERSION && self.capacity > 0
    }

    /// Check the quiescent-state invariants of the control block.
    ///
    /// Only meaningful while no unit is inside a critical section.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let cap = self.capacity;
        if self.filled_count < 0 || self.filled_count > cap {
            return Err(InvariantViolation::FilledOutOfRange {
                filled: self.filled_count,
                capacity: cap,
            });
        }
        for (cursor, value) in [("write", self.write_cursor), ("read", self.read_cursor)] {
            if value < 0 || value >= cap {
                return Err(InvariantViolation::CursorOutOfRange { cursor, value });
            }
        }
        if self.next_expected_seq > self.total_produced {
            return Err(InvariantViolation::FlushAheadOfProduction {
                next_expected: self.next_expected_seq,
                produced: self.total_produced,
            });
        }
        if self.total_consumed > self.total_produced {
            return Err(InvariantViolation::ConsumedAheadOfProduction {
                consumed: self.total_consumed,
                produced: self.total_produced,
            });
        }
        if (self.read_cursor + self.filled_count) % cap != self.write_cursor {
            return Err(InvariantViolation::CursorsDisagree {
                write: self.write_cursor,
                read: self.read_cursor,
                filled: self.filled_count,
            });
        }
        Ok(())
    }
}

/// Total bytes occupied by a region of `capacity` slots.
#[inline(always)]
pub const fn region_size(capacity: usize) -> usize {
    HEADER_SIZE + capacity * SLOT_SIZE
}
