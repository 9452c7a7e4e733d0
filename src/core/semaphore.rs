//! Counting resource with close broadcast
//!
//! Waiters are parked on a condvar, never spinning. Closing the resource
//! wakes every waiter and turns all later operations into `ResourceGone`.

use parking_lot::{Condvar, Mutex};

use crate::error::{RelayError, Result};

#[derive(Debug)]
struct Permits {
    available: usize,
    closed: bool,
}

/// Blocking counting semaphore.
#[derive(Debug)]
pub struct Semaphore {
    permits: Mutex<Permits>,
    cond: Condvar,
}

impl Semaphore {
    pub fn new(initial: usize) -> Self {
        Self {
            permits: Mutex::new(Permits {
                available: initial,
                closed: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Take one permit, suspending until one exists or the resource closes.
    pub fn acquire(&self) -> Result<()> {
        let mut permits = self.permits.lock();
        loop {
            if permits.closed {
                return Err(RelayError::ResourceGone);
            }
            if permits.available > 0 {
                permits.available -= 1;
                return Ok(());
            }
            self.cond.wait(&mut permits);
        }
    }

    /// Take one permit only if one is available right now.
    pub fn try_acquire(&self) -> Result<bool> {
        let mut permits = self.permits.lock();
        if permits.closed {
            return Err(RelayError::ResourceGone);
        }
        if permits.available > 0 {
            permits.available -= 1;
            return Ok(true);
        }
        Ok(false)
    }

    /// Return one permit and wake one waiter.
    pub fn release(&self) -> Result<()> {
        let mut permits = self.permits.lock();
        if permits.closed {
            return Err(RelayError::ResourceGone);
        }
        permits.available += 1;
        drop(permits);
        self.cond.notify_one();
        Ok(())
    }

    /// Current permit count. Read-only: never waits, never signals.
    pub fn value(&self) -> Result<usize> {
        let permits = self.permits.lock();
        if permits.closed {
            return Err(RelayError::ResourceGone);
        }
        Ok(permits.available)
    }

    /// Destroy the resource. Idempotent.
    pub fn close(&self) {
        self.permits.lock().closed = true;
        self.cond.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.permits.lock().closed
    }
}
