//! Session: setup, unit threads, and teardown wired together
//!
//! A session owns the shared control block. Units run on named threads
//! and only ever see the block through the arbiter; teardown is the one
//! place the block is released.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::core::{
    Arbiter, ImmediateTrigger, OperatorTrigger, Region, Semaphore, Summary, TeardownMonitor,
    DEFAULT_BACKOFF, DEFAULT_DRAIN_POLL,
};
use crate::error::Result;
use crate::protocol::XorCodec;
use crate::unit::{
    ByteSource, Consumer, ConsumerReport, FileSink, FileSource, OperatorConsole, OutputSink,
    Pacing, Producer, ProducerReport,
};

pub type ProducerHandle = JoinHandle<Result<ProducerReport>>;
pub type ConsumerHandle = JoinHandle<Result<ConsumerReport>>;

pub struct Session {
    arbiter: Arc<Arbiter>,
    codec: XorCodec,
    flush_backoff: Duration,
    drain_poll: Duration,
    steps: Option<Arc<Semaphore>>,
    spawned: AtomicU32,
    consumers_spawned: AtomicU32,
}

impl Session {
    /// Create a fresh zeroed block. With `region` the block lives in a file
    /// other processes can attach to; otherwise it is anonymous.
    pub fn create(capacity: usize, source_descriptor: &str, region: Option<&Path>) -> Result<Self> {
        let region = match region {
            Some(path) => Region::create_file(path, capacity)?,
            None => Region::create_anon(capacity)?,
        };
        info!(?region, source = source_descriptor, "session created");

        Ok(Self {
            arbiter: Arc::new(Arbiter::new(region, source_descriptor)),
            codec: XorCodec::default(),
            flush_backoff: DEFAULT_BACKOFF,
            drain_poll: DEFAULT_DRAIN_POLL,
            steps: None,
            spawned: AtomicU32::new(0),
            consumers_spawned: AtomicU32::new(0),
        })
    }

    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        let session = Self::create(
            config.capacity,
            &config.source.display().to_string(),
            config.region.as_deref(),
        )?;
        Ok(session
            .with_codec(XorCodec::new(config.key))
            .with_flush_backoff(config.flush_backoff)
            .with_drain_poll(config.drain_poll))
    }

    pub fn with_codec(mut self, codec: XorCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_flush_backoff(mut self, backoff: Duration) -> Self {
        self.flush_backoff = backoff;
        self
    }

    pub fn with_drain_poll(mut self, poll: Duration) -> Self {
        self.drain_poll = poll;
        self
    }

    /// Step permits handed to every unit spawned afterwards. They are
    /// closed when the block is released.
    pub fn with_steps(mut self, steps: Arc<Semaphore>) -> Self {
        self.steps = Some(steps);
        self
    }

    #[inline]
    pub fn arbiter(&self) -> &Arc<Arbiter> {
        &self.arbiter
    }

    #[inline]
    pub fn codec(&self) -> XorCodec {
        self.codec
    }

    fn thread_name(&self, role: &str) -> String {
        let n = self.spawned.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", role, n)
    }

    pub fn spawn_producer<S>(&self, source: S, pacing: Pacing) -> Result<ProducerHandle>
    where
        S: ByteSource + 'static,
    {
        let mut producer =
            Producer::new(Arc::clone(&self.arbiter), source, self.codec).with_pacing(pacing);
        if let Some(steps) = &self.steps {
            producer = producer.with_steps(Arc::clone(steps));
        }
        let handle = thread::Builder::new()
            .name(self.thread_name("producer"))
            .spawn(move || producer.run())?;
        Ok(handle)
    }

    pub fn spawn_consumer<W>(&self, sink: W, pacing: Pacing) -> Result<ConsumerHandle>
    where
        W: OutputSink + 'static,
    {
        let mut consumer = Consumer::new(Arc::clone(&self.arbiter), sink, self.codec)
            .with_pacing(pacing)
            .with_flush_backoff(self.flush_backoff);
        if let Some(steps) = &self.steps {
            consumer = consumer.with_steps(Arc::clone(steps));
        }
        let handle = thread::Builder::new()
            .name(self.thread_name("consumer"))
            .spawn(move || consumer.run())?;
        self.consumers_spawned.fetch_add(1, Ordering::Release);
        Ok(handle)
    }

    /// Block until every produced item has reached the output.
    ///
    /// Returns `false` once every spawned consumer has come and gone while
    /// items are still pending: nothing is left to drain them. Only
    /// meaningful once producers have stopped; with live producers this
    /// returns at the first moment the pipeline happens to be empty.
    pub fn wait_flushed(&self) -> Result<bool> {
        loop {
            let spawned = self.consumers_spawned.load(Ordering::Acquire) as i32;
            {
                let block = self.arbiter.lock()?;
                let header = block.header();
                if header.filled_count == 0 && header.next_expected_seq == header.total_produced {
                    debug!(flushed = header.next_expected_seq, "pipeline empty");
                    return Ok(true);
                }
                if header.consumers_ever >= spawned && header.consumers_active == 0 {
                    warn!(
                        filled = header.filled_count,
                        unflushed = header.total_produced - header.next_expected_seq,
                        "no consumer left to drain the ring"
                    );
                    return Ok(false);
                }
            }
            thread::sleep(self.drain_poll);
        }
    }

    /// Wait for `trigger`, drain, snapshot, and release the block.
    pub fn teardown<T: OperatorTrigger + ?Sized>(&self, trigger: &mut T) -> Result<Summary> {
        let monitor =
            TeardownMonitor::with_poll_interval(Arc::clone(&self.arbiter), self.drain_poll);
        let summary = monitor.run(trigger);
        self.close_steps();
        summary
    }

    /// Snapshot and release without draining, for a ring nobody can empty.
    pub fn abandon(&self) -> Result<Summary> {
        let summary = {
            let block = self.arbiter.lock()?;
            Summary::from_header(block.header(), block.byte_len())
        };
        let released = self.arbiter.destroy();
        self.close_steps();
        released?;
        warn!(left = summary.filled_count, "block released with items in the ring");
        Ok(summary)
    }

    fn close_steps(&self) {
        if let Some(steps) = &self.steps {
            steps.close();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close_steps();
        if self.arbiter.is_destroyed() {
            return;
        }
        // Units still blocked on the ring wake with ResourceGone
        match self.arbiter.destroy() {
            Ok(bytes) => debug!(bytes, "session dropped without teardown, block released"),
            Err(e) => warn!(error = %e, "release on drop failed"),
        }
    }
}

/// Everything a finished session run reports.
#[derive(Debug)]
pub struct SessionReport {
    pub summary: Summary,
    pub producers: Vec<ProducerReport>,
    pub consumers: Vec<ConsumerReport>,
    /// Units that ended with a fatal error or panicked.
    pub failed_units: usize,
}

fn join_units<T>(handles: Vec<JoinHandle<Result<T>>>, role: &str) -> (Vec<T>, usize) {
    let mut reports = Vec::with_capacity(handles.len());
    let mut failed = 0;
    for handle in handles {
        match handle.join() {
            Ok(Ok(report)) => reports.push(report),
            Ok(Err(e)) => {
                error!(role, error = %e, "unit failed");
                failed += 1;
            }
            Err(_) => {
                error!(role, "unit panicked");
                failed += 1;
            }
        }
    }
    (reports, failed)
}

/// Run one whole relay session from a config.
///
/// The output file is truncated first so it holds exactly this session's
/// bytes. Without `auto_teardown`, or with manual pacing, an operator
/// console reads stdin: ENTER steps manual units, and teardown starts on
/// ENTER (or `q` under manual pacing).
pub fn run(config: &SessionConfig) -> Result<SessionReport> {
    config.validate()?;

    // Open every collaborator before any thread starts, so a bad path
    // cannot leave half a session running.
    File::create(&config.output)?;
    let mut sources = Vec::with_capacity(config.producers);
    for _ in 0..config.producers {
        sources.push(FileSource::open(&config.source)?);
    }
    let mut sinks = Vec::with_capacity(config.consumers);
    for _ in 0..config.consumers {
        sinks.push(FileSink::open(&config.output)?);
    }

    let manual =
        config.producer_pacing == Pacing::Manual || config.consumer_pacing == Pacing::Manual;
    let mut console = if manual || !config.auto_teardown {
        let lines = BufReader::new(io::stdin()).lines();
        Some(OperatorConsole::spawn(lines, manual)?)
    } else {
        None
    };

    let mut session = Session::from_config(config)?;
    if let Some(console) = &console {
        session = session.with_steps(console.steps());
    }
    info!(
        producers = config.producers,
        consumers = config.consumers,
        capacity = config.capacity,
        key = config.key,
        "starting units"
    );

    let mut producer_handles = Vec::with_capacity(config.producers);
    for source in sources {
        producer_handles.push(session.spawn_producer(source, config.producer_pacing)?);
    }
    let mut consumer_handles = Vec::with_capacity(config.consumers);
    for sink in sinks {
        consumer_handles.push(session.spawn_consumer(sink, config.consumer_pacing)?);
    }

    let (summary, producers, producer_failures) = if config.auto_teardown {
        let (producers, failed) = join_units(producer_handles, "producer");
        if failed > 0 {
            warn!(failed, "producer failed, relaying what was admitted");
        }
        let summary = if session.wait_flushed()? {
            session.teardown(&mut ImmediateTrigger)?
        } else {
            session.abandon()?
        };
        (summary, producers, failed)
    } else {
        let summary = match console.as_mut() {
            Some(console) => session.teardown(console)?,
            None => session.teardown(&mut ImmediateTrigger)?,
        };
        let (producers, failed) = join_units(producer_handles, "producer");
        (summary, producers, failed)
    };
    let (consumers, consumer_failures) = join_units(consumer_handles, "consumer");

    Ok(SessionReport {
        summary,
        producers,
        consumers,
        failed_units: producer_failures + consumer_failures,
    })
}
