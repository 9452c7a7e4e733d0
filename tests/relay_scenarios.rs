//! End-to-end relay scenarios
//!
//! Run with: cargo test --test relay_scenarios

use std::collections::BTreeSet;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use seqring::core::{
    Arbiter, CircularBuffer, FlushCoordinator, ImmediateTrigger, Region, Role, TeardownMonitor,
};
use seqring::protocol::XorCodec;
use seqring::unit::{Consumer, FileSink, MemorySink, MemorySource, Pacing, UnitExit};
use seqring::{RelayError, Session};

const TICK: Duration = Duration::from_millis(1);

fn fast_session(capacity: usize, key: u8) -> Session {
    Session::create(capacity, "mem://scenario", None)
        .unwrap()
        .with_codec(XorCodec::new(key))
        .with_flush_backoff(TICK)
        .with_drain_poll(TICK)
}

fn arbiter(capacity: usize) -> Arc<Arbiter> {
    Arc::new(Arbiter::new(
        Region::create_anon(capacity).unwrap(),
        "mem://scenario",
    ))
}

#[test]
fn test_fifth_insert_blocks_on_four_slots() {
    let arb = arbiter(4);
    let ring = CircularBuffer::new(Arc::clone(&arb));
    let codec = XorCodec::new(0x2A);
    for (seq, &b) in b"AB C".iter().enumerate() {
        ring.enqueue(seq as u64, codec.encode(b)).unwrap();
    }

    let inserted = Arc::new(AtomicBool::new(false));
    let fifth = {
        let ring = ring.clone();
        let inserted = Arc::clone(&inserted);
        thread::spawn(move || {
            ring.enqueue(4, codec.encode(b'D')).unwrap();
            inserted.store(true, Ordering::SeqCst);
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!inserted.load(Ordering::SeqCst), "fifth insert must wait");

    let first = ring.dequeue().unwrap();
    assert_eq!((first.seq, codec.decode(first.value)), (0, b'A'));
    fifth.join().unwrap();
    assert!(inserted.load(Ordering::SeqCst));
    assert_eq!(ring.len().unwrap(), 4);
}

#[test]
fn test_single_pair_relays_source_exactly() {
    let session = fast_session(4, 0x2A);
    let sink = MemorySink::new();

    let producer = session
        .spawn_producer(MemorySource::new(&b"AB CD"[..]), Pacing::Immediate)
        .unwrap();
    let consumer = session
        .spawn_consumer(sink.clone(), Pacing::Immediate)
        .unwrap();

    let report = producer.join().unwrap().unwrap();
    assert_eq!(report.produced, 5);
    assert_eq!(report.exit, UnitExit::SourceExhausted);

    assert!(session.wait_flushed().unwrap());
    let summary = session.teardown(&mut ImmediateTrigger).unwrap();
    let consumed = consumer.join().unwrap().unwrap();

    assert_eq!(sink.contents(), b"AB CD");
    assert_eq!(consumed.flushed, 5);
    assert_eq!(summary.transferred(), 5);
    assert_eq!(summary.capacity, 4);
}

#[test]
fn test_two_producers_split_offsets_without_repeats() {
    let session = fast_session(16, 0x2A);
    let source = MemorySource::new(&b"0123456789"[..]);

    let producers: Vec<_> = (0..2)
        .map(|_| {
            session
                .spawn_producer(source.clone(), Pacing::Immediate)
                .unwrap()
        })
        .collect();
    let produced: u64 = producers
        .into_iter()
        .map(|p| p.join().unwrap().unwrap().produced)
        .sum();
    assert_eq!(produced, 10);

    let block = session.arbiter().lock().unwrap();
    assert_eq!(block.header().next_source_offset, 10);
    assert_eq!(block.header().filled_count, 10);

    let seqs: Vec<i64> = block
        .slots()
        .iter()
        .filter(|s| s.is_occupied())
        .map(|s| s.seq)
        .collect();
    let unique: BTreeSet<i64> = seqs.iter().copied().collect();
    assert_eq!(seqs.len(), 10);
    assert_eq!(unique, (0..10).collect());

    let codec = session.codec();
    for slot in block.slots().iter().filter(|s| s.is_occupied()) {
        assert_eq!(codec.decode(slot.value), b'0' + slot.seq as u8);
    }
}

#[test]
fn test_later_seq_waits_for_earlier_one() {
    let arb = arbiter(8);
    let ring = CircularBuffer::new(Arc::clone(&arb));
    let codec = XorCodec::new(0x2A);

    for (seq, &b) in b"abcde".iter().enumerate() {
        ring.enqueue(seq as u64, codec.encode(b)).unwrap();
    }
    // seq 7 sits ahead of 6, which sits ahead of 5
    for (seq, b) in [(7, b'h'), (6, b'g'), (5, b'f')] {
        ring.enqueue(seq, codec.encode(b)).unwrap();
    }

    let sink = MemorySink::new();
    let consumers: Vec<_> = (0..3)
        .map(|_| {
            let consumer =
                Consumer::new(Arc::clone(&arb), sink.clone(), codec).with_flush_backoff(TICK);
            thread::spawn(move || consumer.run())
        })
        .collect();

    let deadline = Instant::now() + Duration::from_secs(5);
    while sink.contents().len() < 8 {
        assert!(Instant::now() < deadline, "consumers stalled at {:?}", sink.contents());
        thread::sleep(TICK);
    }
    arb.destroy().unwrap();

    let consumed: u64 = consumers
        .into_iter()
        .map(|c| {
            let report = c.join().unwrap().unwrap();
            assert_eq!(report.exit, UnitExit::ResourceGone);
            report.flushed
        })
        .sum();
    assert_eq!(sink.contents(), b"abcdefgh");
    assert_eq!(consumed, 8);
}

/// Relay `len` bytes through `producers`/`consumers` units sharing a ring of
/// `capacity` slots. Panics if the session does not finish within 10 s.
fn relay_with_watchdog(producers: usize, consumers: usize, capacity: usize, len: usize) {
    let text: Vec<u8> = (0..len).map(|i| (i * 7 % 251) as u8).collect();
    let expected = text.clone();
    let (done_tx, done_rx) = mpsc::channel();

    thread::spawn(move || {
        let session = fast_session(capacity, 0x2A);
        let sink = MemorySink::new();
        let producer_handles: Vec<_> = (0..producers)
            .map(|_| {
                session
                    .spawn_producer(MemorySource::new(text.clone()), Pacing::Immediate)
                    .unwrap()
            })
            .collect();
        let consumer_handles: Vec<_> = (0..consumers)
            .map(|_| session.spawn_consumer(sink.clone(), Pacing::Immediate).unwrap())
            .collect();

        for p in producer_handles {
            p.join().unwrap().unwrap();
        }
        assert!(session.wait_flushed().unwrap());
        let summary = session.teardown(&mut ImmediateTrigger).unwrap();
        for c in consumer_handles {
            c.join().unwrap().unwrap();
        }
        let _ = done_tx.send((sink.contents(), summary.transferred()));
    });

    let (output, transferred) = match done_rx.recv_timeout(Duration::from_secs(10)) {
        Ok(done) => done,
        Err(mpsc::RecvTimeoutError::Timeout) => panic!(
            "relay stalled: producers={} consumers={} capacity={}",
            producers, consumers, capacity
        ),
        Err(mpsc::RecvTimeoutError::Disconnected) => panic!("relay thread failed"),
    };
    assert_eq!(output, expected);
    assert_eq!(transferred, len as u64);
}

#[test]
fn test_more_producers_than_consumers_never_stall() {
    relay_with_watchdog(3, 1, 2, 4096);
}

#[test]
fn test_mixed_unit_counts_relay_in_order() {
    for (producers, consumers, capacity) in [(2, 2, 4), (2, 1, 16), (4, 3, 5)] {
        relay_with_watchdog(producers, consumers, capacity, 2048);
    }
}

#[test]
fn test_flushed_seq_cannot_repeat() {
    let arb = arbiter(2);
    let coordinator = FlushCoordinator::with_backoff(Arc::clone(&arb), TICK);
    let mut sink = MemorySink::new();
    coordinator.flush(0, b'x', &mut sink).unwrap();

    let err = coordinator.flush(0, b'x', &mut sink).unwrap_err();
    assert!(matches!(
        err,
        RelayError::AlreadyFlushed {
            seq: 0,
            next_expected: 1
        }
    ));
    assert_eq!(sink.contents(), b"x");
}

#[test]
fn test_many_units_preserve_order_over_file_region() {
    let dir = tempfile::tempdir().unwrap();
    let region_path = dir.path().join("ring.shm");
    let output_path = dir.path().join("output.txt");

    let text: Vec<u8> = (0..2048u32).map(|i| b'a' + (i % 26) as u8).collect();
    let session = Session::create(5, "mem://alphabet", Some(region_path.as_path()))
        .unwrap()
        .with_flush_backoff(TICK)
        .with_drain_poll(TICK);

    let producers: Vec<_> = (0..4)
        .map(|_| {
            session
                .spawn_producer(MemorySource::new(text.clone()), Pacing::Immediate)
                .unwrap()
        })
        .collect();
    let consumers: Vec<_> = (0..3)
        .map(|_| {
            session
                .spawn_consumer(FileSink::open(&output_path).unwrap(), Pacing::Immediate)
                .unwrap()
        })
        .collect();

    // An observer can join the live block by path
    let observer = Region::attach(&region_path).unwrap();
    assert_eq!(observer.capacity(), 5);
    assert!(observer.snapshot().is_valid());
    observer.release().unwrap();

    for p in producers {
        assert_eq!(p.join().unwrap().unwrap().exit, UnitExit::SourceExhausted);
    }
    assert!(session.wait_flushed().unwrap());
    let summary = session.teardown(&mut ImmediateTrigger).unwrap();
    for c in consumers {
        assert_eq!(c.join().unwrap().unwrap().exit, UnitExit::ResourceGone);
    }

    assert_eq!(fs::read(&output_path).unwrap(), text);
    assert_eq!(summary.total_produced, text.len() as u64);
    assert_eq!(summary.producers_ever, 4);
    assert!(!region_path.exists(), "owned region is removed on release");
    assert!(matches!(
        Region::attach(&region_path),
        Err(RelayError::AttachFailure { .. })
    ));
}

#[test]
fn test_destroy_wakes_every_blocked_unit() {
    let session = fast_session(2, 0x2A);

    // Producer blocks on a full ring
    let producer = session
        .spawn_producer(MemorySource::new(&b"abcdef"[..]), Pacing::Immediate)
        .unwrap();

    // A consumer waits for seq 9, which never comes
    let stuck_flush = {
        let coordinator = FlushCoordinator::with_backoff(Arc::clone(session.arbiter()), TICK);
        thread::spawn(move || coordinator.flush(9, b'z', &mut MemorySink::new()))
    };

    // A bare ring consumer on an empty ring of its own
    let empty = arbiter(1);
    let waiting_dequeue = {
        let ring = CircularBuffer::new(Arc::clone(&empty));
        thread::spawn(move || ring.dequeue())
    };

    thread::sleep(Duration::from_millis(30));
    session.arbiter().destroy().unwrap();
    empty.destroy().unwrap();

    assert_eq!(
        producer.join().unwrap().unwrap().exit,
        UnitExit::ResourceGone
    );
    assert!(stuck_flush.join().unwrap().unwrap_err().is_resource_gone());
    assert!(waiting_dequeue.join().unwrap().unwrap_err().is_resource_gone());

    assert!(matches!(
        session.arbiter().register(Role::Consumer),
        Err(RelayError::ResourceGone)
    ));
    assert!(matches!(
        session.arbiter().destroy(),
        Err(RelayError::ResourceGone)
    ));
}

#[test]
fn test_teardown_drains_before_release() {
    let arb = arbiter(4);
    let ring = CircularBuffer::new(Arc::clone(&arb));
    for seq in 0..3 {
        ring.enqueue(seq, b'q').unwrap();
    }

    let (tx, mut rx) = mpsc::channel::<()>();
    let monitor = {
        let arb = Arc::clone(&arb);
        thread::spawn(move || TeardownMonitor::with_poll_interval(arb, TICK).run(&mut rx))
    };
    tx.send(()).unwrap();

    thread::sleep(Duration::from_millis(30));
    assert!(!arb.is_destroyed(), "teardown must wait for the ring to empty");

    for _ in 0..3 {
        ring.dequeue().unwrap();
    }
    let summary = monitor.join().unwrap().unwrap();

    assert!(arb.is_destroyed());
    assert_eq!(summary.filled_count, 0);
    assert_eq!(summary.total_consumed, 3);
    assert_eq!(summary.transferred(), 3);
    assert!(summary.mapped_bytes >= summary.region_bytes);
    assert!(summary.to_string().contains("FINAL SUMMARY"));
}
