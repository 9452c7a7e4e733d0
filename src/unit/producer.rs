//! Producer unit
//!
//! Loop: wait for a free slot → reserve offset, read, encode and fill the
//! slot in one critical section → pause. Stops on source exhaustion or when
//! the shared resources disappear; any other failure is fatal for this unit
//! only.

use std::sync::Arc;

use tracing::{debug, error, info, info_span};

use super::pacing::Pacing;
use super::source::ByteSource;
use crate::core::{Arbiter, CircularBuffer, Role, Semaphore};
use crate::error::{RelayError, Result};
use crate::protocol::XorCodec;

/// Why a unit loop ended normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitExit {
    SourceExhausted,
    ResourceGone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerReport {
    /// 1-based registration order; 0 if the unit never registered.
    pub id: u32,
    pub produced: u64,
    pub exit: UnitExit,
}

pub struct Producer<S> {
    arbiter: Arc<Arbiter>,
    ring: CircularBuffer,
    codec: XorCodec,
    source: S,
    pacing: Pacing,
    steps: Option<Arc<Semaphore>>,
}

impl<S: ByteSource> Producer<S> {
    pub fn new(arbiter: Arc<Arbiter>, source: S, codec: XorCodec) -> Self {
        Self {
            ring: CircularBuffer::new(Arc::clone(&arbiter)),
            arbiter,
            codec,
            source,
            pacing: Pacing::Immediate,
            steps: None,
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Step permits for manual pacing.
    pub fn with_steps(mut self, steps: Arc<Semaphore>) -> Self {
        self.steps = Some(steps);
        self
    }

    /// Run until the source is exhausted or the ring is destroyed.
    pub fn run(mut self) -> Result<ProducerReport> {
        let mut report = ProducerReport {
            id: 0,
            produced: 0,
            exit: UnitExit::ResourceGone,
        };
        report.id = match self.arbiter.register(Role::Producer) {
            Ok(id) => id,
            Err(e) if e.is_resource_gone() => {
                info!("shared resources already released, producer not started");
                return Ok(report);
            }
            Err(e) => return Err(e),
        };

        let span = info_span!("producer", id = report.id);
        let _enter = span.enter();
        info!(
            source = self.arbiter.source_descriptor(),
            len = ?self.source.len(),
            "producer started"
        );

        let outcome = self.produce(&mut report.produced);
        let retired = self.arbiter.retire(Role::Producer);

        match outcome {
            Ok(exit) => report.exit = exit,
            Err(e) if e.is_resource_gone() => {
                info!("shared resources released, producer stopping");
                report.exit = UnitExit::ResourceGone;
            }
            Err(e) => {
                error!(error = %e, "producer failed");
                return Err(e);
            }
        }
        info!(produced = report.produced, exit = ?report.exit, retired, "producer finished");
        Ok(report)
    }

    fn produce(&mut self, produced: &mut u64) -> Result<UnitExit> {
        let codec = self.codec;
        loop {
            let src = &mut self.source;
            let admitted = self.ring.enqueue_next(|offset| {
                let byte = src
                    .read_at(offset)
                    .map_err(|source| RelayError::SourceRead { offset, source })?;
                Ok(byte.map(|b| codec.encode(b)))
            })?;
            let Some((seq, slot)) = admitted else {
                return Ok(UnitExit::SourceExhausted);
            };
            *produced += 1;
            debug!(slot, seq, "inserted");

            self.pacing.pause(self.steps.as_deref())?;
        }
    }
}
