//! Core module: the shared control block and its synchronization protocol
//!
//! Design principles:
//! - One control block, one lock: every mutation happens in a short critical section
//! - No spinning: ring admission suspends on counting resources
//! - Output order is decided by `seq`, not by dequeue order
//! - Teardown is terminal: every later operation reports `ResourceGone`

mod allocator;
mod arbiter;
mod flush;
mod layout;
mod region;
mod ring_buffer;
mod semaphore;
mod teardown;

pub use allocator::PositionAllocator;
pub use arbiter::{Arbiter, BlockGuard, Role};
pub use flush::{FlushCoordinator, Flushed, DEFAULT_BACKOFF};
pub use layout::{
    region_size, ControlHeader, InvariantViolation, SlotRecord, HEADER_SIZE, SLOT_SIZE,
};
pub use region::Region;
pub use ring_buffer::{CircularBuffer, Item};
pub use semaphore::Semaphore;
pub use teardown::{
    ImmediateTrigger, OperatorTrigger, Summary, TeardownMonitor, TeardownState,
    DEFAULT_DRAIN_POLL,
};
