//! Arbitration primitive: one lock plus two counting resources
//!
//! - `lock()` guards every control block mutation
//! - `free_slots` starts at `capacity`, `filled_slots` at 0
//! - `destroy()` invalidates all three at once; every later or pending
//!   operation observes `ResourceGone`

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, info};

use super::region::Region;
use super::semaphore::Semaphore;
use crate::error::{RelayError, Result};

/// Exclusive access to the control block, held for O(1) field updates.
pub type BlockGuard<'a> = MappedMutexGuard<'a, Region>;

/// Which liveness counters a unit maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Producer,
    Consumer,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Producer => f.write_str("producer"),
            Role::Consumer => f.write_str("consumer"),
        }
    }
}

/// Shared control block plus the resources that arbitrate access to it.
///
/// Shared between units through `Arc<Arbiter>`.
#[derive(Debug)]
pub struct Arbiter {
    block: Mutex<Option<Region>>,
    free_slots: Semaphore,
    filled_slots: Semaphore,
    capacity: usize,
    source_descriptor: String,
}

impl Arbiter {
    /// Wrap a prepared region. Counting resources are derived from its
    /// current fill level, which is zero for a freshly created region.
    pub fn new(region: Region, source_descriptor: impl Into<String>) -> Self {
        let capacity = region.capacity();
        let filled = region.header().filled_count.clamp(0, capacity as i32) as usize;
        Self {
            block: Mutex::new(Some(region)),
            free_slots: Semaphore::new(capacity - filled),
            filled_slots: Semaphore::new(filled),
            capacity,
            source_descriptor: source_descriptor.into(),
        }
    }

    /// Enter the critical section.
    #[inline]
    pub fn lock(&self) -> Result<BlockGuard<'_>> {
        MutexGuard::try_map(self.block.lock(), |block| block.as_mut())
            .map_err(|_| RelayError::ResourceGone)
    }

    #[inline(always)]
    pub fn free_slots(&self) -> &Semaphore {
        &self.free_slots
    }

    #[inline(always)]
    pub fn filled_slots(&self) -> &Semaphore {
        &self.filled_slots
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Opaque handle of the input stream, fixed at creation.
    pub fn source_descriptor(&self) -> &str {
        &self.source_descriptor
    }

    pub fn is_destroyed(&self) -> bool {
        self.block.lock().is_none()
    }

    /// Count a unit in: bumps `*_active` and `*_ever`, returns the unit id.
    pub fn register(&self, role: Role) -> Result<u32> {
        let mut block = self.lock()?;
        let header = block.header_mut();
        let id = match role {
            Role::Producer => {
                header.producers_active += 1;
                header.producers_ever += 1;
                header.producers_ever
            }
            Role::Consumer => {
                header.consumers_active += 1;
                header.consumers_ever += 1;
                header.consumers_ever
            }
        };
        Ok(id as u32)
    }

    /// Best-effort `*_active` decrement. Returns false when the block is gone.
    pub fn retire(&self, role: Role) -> bool {
        let Ok(mut block) = self.lock() else {
            return false;
        };
        let header = block.header_mut();
        let active = match role {
            Role::Producer => &mut header.producers_active,
            Role::Consumer => &mut header.consumers_active,
        };
        if *active > 0 {
            *active -= 1;
        }
        true
    }

    /// Destroy the control block and all arbitration resources.
    ///
    /// Counting resources close first so blocked units wake up; units
    /// queued on the lock then find the block gone.
    pub fn destroy(&self) -> Result<usize> {
        self.free_slots.close();
        self.filled_slots.close();

        let region = self.block.lock().take().ok_or(RelayError::ResourceGone)?;
        let bytes = region.byte_len();
        if let Some(path) = region.path() {
            debug!(path = %path.display(), "removing region backing file");
        }
        region.release()?;
        info!(bytes, "shared resources released");
        Ok(bytes)
    }
}
