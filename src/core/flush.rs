//! Flush-Ordering Coordinator
//!
//! Consumers drain the ring in arbitrary relative order, but output must
//! follow `seq`. Each consumer polls the control block: when
//! `next_expected_seq` equals its own seq it appends and advances the
//! counter, otherwise it backs off and tries again.
//!
//! Polling (not a wait queue) because any waiting consumer may hold the
//! next seq. Output lags by at most one backoff interval.
//!
//! Liveness gap: if the consumer holding the next seq dies between dequeue
//! and flush, every consumer holding a later seq polls forever.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{trace, warn};

use super::arbiter::Arbiter;
use crate::error::{RelayError, Result};
use crate::unit::OutputSink;

/// Backoff between turn checks.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(50);

/// Outcome of a successful flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flushed {
    pub seq: u64,
    /// Turn checks taken, including the winning one.
    pub attempts: u32,
    /// False when the sink rejected the byte; the turn still advanced.
    pub written: bool,
}

#[derive(Debug, Clone)]
pub struct FlushCoordinator {
    arbiter: Arc<Arbiter>,
    backoff: Duration,
}

impl FlushCoordinator {
    pub fn new(arbiter: Arc<Arbiter>) -> Self {
        Self::with_backoff(arbiter, DEFAULT_BACKOFF)
    }

    pub fn with_backoff(arbiter: Arc<Arbiter>, backoff: Duration) -> Self {
        Self { arbiter, backoff }
    }

    /// Append `value` to `sink` once every smaller seq has been flushed.
    ///
    /// A sink failure is logged and the turn still advances, so one bad
    /// write never stalls the other consumers.
    pub fn flush<S: OutputSink + ?Sized>(
        &self,
        seq: u64,
        value: u8,
        sink: &mut S,
    ) -> Result<Flushed> {
        let mut attempts = 0u32;
        loop {
            attempts = attempts.saturating_add(1);
            {
                let mut block = self.arbiter.lock()?;
                let header = block.header_mut();
                let next_expected = header.next_expected_seq as u64;

                if next_expected == seq {
                    let written = match sink.append(value) {
                        Ok(()) => true,
                        Err(e) => {
                            let err = RelayError::OutputWriteFailure(e);
                            warn!(seq, error = %err, "output append failed, skipping byte");
                            false
                        }
                    };
                    header.next_expected_seq += 1;
                    return Ok(Flushed {
                        seq,
                        attempts,
                        written,
                    });
                }
                if next_expected > seq {
                    return Err(RelayError::AlreadyFlushed { seq, next_expected });
                }
                trace!(seq, next_expected, "not our turn yet");
            }
            thread::sleep(self.backoff);
        }
    }

    /// The seq the output is waiting for.
    pub fn next_expected(&self) -> Result<u64> {
        Ok(self.arbiter.lock()?.header().next_expected_seq as u64)
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }
}
