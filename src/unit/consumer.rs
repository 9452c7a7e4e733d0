//! Consumer unit
//!
//! Loop: dequeue → decode → wait for the item's turn → append to output.
//! Runs until the shared resources are released.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, info_span};

use super::pacing::Pacing;
use super::producer::UnitExit;
use super::sink::OutputSink;
use crate::core::{Arbiter, CircularBuffer, FlushCoordinator, Role, Semaphore, DEFAULT_BACKOFF};
use crate::error::Result;
use crate::protocol::XorCodec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerReport {
    /// 1-based registration order; 0 if the unit never registered.
    pub id: u32,
    pub consumed: u64,
    pub flushed: u64,
    /// Items whose turn passed but whose byte the sink rejected.
    pub write_failures: u64,
    pub exit: UnitExit,
}

pub struct Consumer<W> {
    arbiter: Arc<Arbiter>,
    ring: CircularBuffer,
    coordinator: FlushCoordinator,
    codec: XorCodec,
    sink: W,
    pacing: Pacing,
    steps: Option<Arc<Semaphore>>,
}

/// Printable form of a decoded byte for log lines.
fn printable(byte: u8) -> char {
    if (32..=126).contains(&byte) {
        byte as char
    } else {
        '?'
    }
}

impl<W: OutputSink> Consumer<W> {
    pub fn new(arbiter: Arc<Arbiter>, sink: W, codec: XorCodec) -> Self {
        Self {
            ring: CircularBuffer::new(Arc::clone(&arbiter)),
            coordinator: FlushCoordinator::with_backoff(Arc::clone(&arbiter), DEFAULT_BACKOFF),
            arbiter,
            codec,
            sink,
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

    /// Interval between turn checks while waiting to flush.
    pub fn with_flush_backoff(mut self, backoff: Duration) -> Self {
        self.coordinator = FlushCoordinator::with_backoff(Arc::clone(&self.arbiter), backoff);
        self
    }

    /// Run until the ring is destroyed.
    pub fn run(mut self) -> Result<ConsumerReport> {
        let mut report = ConsumerReport {
            id: 0,
            consumed: 0,
            flushed: 0,
            write_failures: 0,
            exit: UnitExit::ResourceGone,
        };
        report.id = match self.arbiter.register(Role::Consumer) {
            Ok(id) => id,
            Err(e) if e.is_resource_gone() => {
                info!("shared resources already released, consumer not started");
                return Ok(report);
            }
            Err(e) => return Err(e),
        };

        let span = info_span!("consumer", id = report.id);
        let _enter = span.enter();
        info!("consumer started");

        let outcome = self.consume(&mut report);
        let retired = self.arbiter.retire(Role::Consumer);

        match outcome {
            Err(e) if e.is_resource_gone() => {
                info!("shared resources released, consumer stopping");
            }
            Err(e) => {
                error!(error = %e, "consumer failed");
                return Err(e);
            }
            Ok(()) => {}
        }
        info!(
            consumed = report.consumed,
            flushed = report.flushed,
            retired,
            "consumer finished"
        );
        Ok(report)
    }

    fn consume(&mut self, report: &mut ConsumerReport) -> Result<()> {
        loop {
            let item = self.ring.dequeue()?;
            report.consumed += 1;

            let byte = self.codec.decode(item.value);
            debug!(
                slot = item.local_index,
                seq = item.seq,
                byte = %printable(byte),
                inserted_ns = item.timestamp,
                "removed"
            );

            let flushed = self.coordinator.flush(item.seq, byte, &mut self.sink)?;
            if flushed.written {
                report.flushed += 1;
            } else {
                report.write_failures += 1;
            }

            self.pacing.pause(self.steps.as_deref())?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Region;
    use crate::unit::MemorySink;
    use std::thread;

    fn arbiter(capacity: usize) -> Arc<Arbiter> {
        Arc::new(Arbiter::new(
            Region::create_anon(capacity).unwrap(),
            "mem://consumer",
        ))
    }

    #[test]
    fn test_printable() {
        assert_eq!(printable(b'a'), 'a');
        assert_eq!(printable(b'\n'), '?');
    }

    #[test]
    fn test_consumer_decodes_in_seq_order_until_destroy() {
        let arb = arbiter(4);
        let codec = XorCodec::new(0x2A);
        let ring = CircularBuffer::new(Arc::clone(&arb));
        // Admitted out of source order
        for (seq, b) in [(1u64, b'b'), (0, b'a'), (2, b'c')] {
            ring.enqueue(seq, codec.encode(b)).unwrap();
        }

        let sink = MemorySink::new();
        let consumers: Vec<_> = (0..2)
            .map(|_| {
                let consumer = Consumer::new(Arc::clone(&arb), sink.clone(), codec)
                    .with_flush_backoff(Duration::from_millis(1));
                thread::spawn(move || consumer.run())
            })
            .collect();

        while sink.contents().len() < 3 {
            thread::sleep(Duration::from_millis(2));
        }
        arb.destroy().unwrap();

        let mut consumed = 0;
        for c in consumers {
            let report = c.join().unwrap().unwrap();
            assert_eq!(report.exit, UnitExit::ResourceGone);
            consumed += report.consumed;
        }
        assert_eq!(consumed, 3);
        assert_eq!(sink.contents(), b"abc");
    }
}
