//! Lifecycle/Teardown Monitor
//!
//! `WaitingForTrigger → DrainingBuffer → SnapshottingStats → ReleasingResources → Done`
//!
//! The drain check only samples the filled-slot resource; it does not stop
//! producers. Start teardown once producers are known to have stopped.

use std::fmt;
use std::io;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use super::arbiter::Arbiter;
use super::layout::ControlHeader;
use crate::error::{RelayError, Result};

/// Interval between drain samples.
pub const DEFAULT_DRAIN_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownState {
    WaitingForTrigger,
    DrainingBuffer,
    SnapshottingStats,
    ReleasingResources,
    Done,
}

/// Delivers the single operator event that starts teardown.
pub trait OperatorTrigger {
    fn wait(&mut self) -> io::Result<()>;
}

/// Fires at once; for callers that already know teardown may begin.
#[derive(Debug, Default)]
pub struct ImmediateTrigger;

impl OperatorTrigger for ImmediateTrigger {
    fn wait(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A message, or every sender dropping, fires the trigger.
impl OperatorTrigger for Receiver<()> {
    fn wait(&mut self) -> io::Result<()> {
        let _ = self.recv();
        Ok(())
    }
}

/// Best-effort statistics taken right before release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub capacity: usize,
    pub filled_count: usize,
    pub total_produced: u64,
    pub total_consumed: u64,
    pub producers_active: u32,
    pub consumers_active: u32,
    pub producers_ever: u32,
    pub consumers_ever: u32,
    /// Control block plus slots.
    pub region_bytes: usize,
    /// `region_bytes` rounded up to whole pages.
    pub mapped_bytes: usize,
}

impl Summary {
    pub fn from_header(header: &ControlHeader, region_bytes: usize) -> Self {
        let page = page_size();
        Self {
            capacity: header.capacity.max(0) as usize,
            filled_count: header.filled_count.max(0) as usize,
            total_produced: header.total_produced.max(0) as u64,
            total_consumed: header.total_consumed.max(0) as u64,
            producers_active: header.producers_active.max(0) as u32,
            consumers_active: header.consumers_active.max(0) as u32,
            producers_ever: header.producers_ever.max(0) as u32,
            consumers_ever: header.consumers_ever.max(0) as u32,
            region_bytes,
            mapped_bytes: (region_bytes + page - 1) / page * page,
        }
    }

    /// Items that made it through the ring.
    #[inline(always)]
    pub fn transferred(&self) -> u64 {
        self.total_produced.min(self.total_consumed)
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "========== FINAL SUMMARY ==========")?;
        writeln!(f, "- Bytes transferred:        {}", self.transferred())?;
        writeln!(f, "- Bytes still in the ring:  {}", self.filled_count)?;
        writeln!(
            f,
            "- Producers alive / total:  {} / {}",
            self.producers_active, self.producers_ever
        )?;
        writeln!(
            f,
            "- Consumers alive / total:  {} / {}",
            self.consumers_active, self.consumers_ever
        )?;
        writeln!(
            f,
            "- Shared memory used:       {} bytes ({} mapped)",
            self.region_bytes, self.mapped_bytes
        )?;
        write!(f, "===================================")
    }
}

#[cfg(unix)]
fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}

#[cfg(not(unix))]
fn page_size() -> usize {
    4096
}

/// Drives teardown one state at a time.
#[derive(Debug)]
pub struct TeardownMonitor {
    arbiter: Arc<Arbiter>,
    poll_interval: Duration,
    state: TeardownState,
    summary: Option<Summary>,
}

impl TeardownMonitor {
    pub fn new(arbiter: Arc<Arbiter>) -> Self {
        Self::with_poll_interval(arbiter, DEFAULT_DRAIN_POLL)
    }

    pub fn with_poll_interval(arbiter: Arc<Arbiter>, poll_interval: Duration) -> Self {
        Self {
            arbiter,
            poll_interval,
            state: TeardownState::WaitingForTrigger,
            summary: None,
        }
    }

    #[inline(always)]
    pub fn state(&self) -> TeardownState {
        self.state
    }

    pub fn summary(&self) -> Option<&Summary> {
        self.summary.as_ref()
    }

    /// The operator event arrived. Ignored outside `WaitingForTrigger`.
    pub fn trigger(&mut self) {
        if self.state == TeardownState::WaitingForTrigger {
            self.transition(TeardownState::DrainingBuffer);
        }
    }

    /// Perform the work of the current state once and return the new state.
    ///
    /// `DrainingBuffer` takes one sample per call and stays put while the
    /// ring holds anything.
    pub fn step(&mut self) -> Result<TeardownState> {
        match self.state {
            TeardownState::WaitingForTrigger | TeardownState::Done => {}
            TeardownState::DrainingBuffer => {
                let filled = self.arbiter.filled_slots().value()?;
                // A consumer may hold a filled permit without having taken
                // its slot yet; the header count covers that window.
                if filled == 0 && self.arbiter.lock()?.header().filled_count == 0 {
                    self.transition(TeardownState::SnapshottingStats);
                } else {
                    debug!(filled, "waiting for the ring to drain");
                }
            }
            TeardownState::SnapshottingStats => {
                let summary = {
                    let block = self.arbiter.lock()?;
                    Summary::from_header(block.header(), block.byte_len())
                };
                self.summary = Some(summary);
                self.transition(TeardownState::ReleasingResources);
            }
            TeardownState::ReleasingResources => {
                self.arbiter.destroy()?;
                self.transition(TeardownState::Done);
            }
        }
        Ok(self.state)
    }

    /// Whole protocol: wait for the operator, drain, snapshot, release.
    pub fn run<T: OperatorTrigger + ?Sized>(mut self, trigger: &mut T) -> Result<Summary> {
        trigger.wait()?;
        self.trigger();
        loop {
            match self.step()? {
                TeardownState::Done => break,
                TeardownState::DrainingBuffer => thread::sleep(self.poll_interval),
                _ => {}
            }
        }
        // Done is only reachable through SnapshottingStats
        self.summary.ok_or(RelayError::ResourceGone)
    }

    fn transition(&mut self, next: TeardownState) {
        info!(from = ?self.state, to = ?next, "teardown");
        self.state = next;
    }
}
