use std::any::TypeId;
use std::mem::{align_of, size_of};

use itertools::assert_equal;

use crate::consumer::{Consumer, Next};
use crate::producer::Producer;
use crate::queue::{Error, Queue, MAX_VALUE_COUNT};
use crate::seq::{mod_le, mod_lt, Seq, SeqCell};
use crate::sync::{Arc, AtomicUsize, Ordering};
use crate::value::ValueType;

use super::common::{drain, produce, Record, RecordType};

#[test]
fn capacity_rounding() {
    let queue = Queue::new("cap", RecordType, 1000).unwrap();
    assert_eq!(queue.size(), 1024);

    let queue = Queue::new("cap", RecordType, 1).unwrap();
    assert_eq!(queue.size(), 2);

    let queue = Queue::new("cap", RecordType, 0).unwrap();
    assert_eq!(queue.size(), 2);

    assert!(matches!(
        Queue::new("cap", RecordType, MAX_VALUE_COUNT + 1),
        Err(Error::CapacityTooLarge { .. })
    ));
}

#[test]
fn value_type_identity() {
    let queue = Queue::new("ident", RecordType, 2).unwrap();
    assert_eq!(queue.value_type().type_id(), TypeId::of::<Record>());
}

#[test]
fn modular_comparison() {
    assert!(mod_lt(0, 1));
    assert!(!mod_lt(1, 1));
    assert!(!mod_lt(1, 0));
    assert!(mod_le(1, 1));
    assert!(mod_lt(-1, 0));

    // across the wrap: MAX - 2 precedes MIN + 5 on the ring
    assert!(mod_lt(Seq::MAX, Seq::MAX.wrapping_add(1)));
    assert!(mod_lt(Seq::MAX - 2, Seq::MIN + 5));
    assert!(!mod_lt(Seq::MIN + 5, Seq::MAX - 2));
    assert!(mod_le(Seq::MAX, Seq::MAX));
}

#[test]
fn cell_layout() {
    assert_eq!(align_of::<SeqCell>(), 64);
    assert_eq!(size_of::<SeqCell>(), 64);
}

#[test]
fn slot_lifecycle() {
    struct CountedType {
        live: Arc<AtomicUsize>,
    }
    struct Counted {
        live: Arc<AtomicUsize>,
    }
    impl Drop for Counted {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::Relaxed);
        }
    }
    impl ValueType for CountedType {
        type Value = Counted;

        fn allocate(&self) -> Counted {
            self.live.fetch_add(1, Ordering::Relaxed);
            Counted {
                live: self.live.clone(),
            }
        }
    }

    let live = Arc::new(AtomicUsize::new(0));
    {
        let _queue = Queue::new("life", CountedType { live: live.clone() }, 10).unwrap();
        // 10 rounds up to 16; every slot allocated exactly once
        assert_eq!(live.load(Ordering::Relaxed), 16);
    }
    assert_eq!(live.load(Ordering::Relaxed), 0);
}

#[test]
fn start_validation() {
    let queue = Queue::new("no-producers", RecordType, 4).unwrap();
    assert!(matches!(queue.start(), Err(Error::NoProducers(_))));

    let queue = Queue::new("no-consumers", RecordType, 4).unwrap();
    let _producer = Producer::new("p", 0, &queue);
    assert!(matches!(queue.start(), Err(Error::NoConsumers(_))));

    let queue = Queue::new("cycle", RecordType, 4).unwrap();
    let _producer = Producer::new("p", 0, &queue);
    let mut c1 = Consumer::new("c1", &queue);
    let mut c2 = Consumer::new("c2", &queue);
    c1.add_dependency(&c2);
    c2.add_dependency(&c1);
    assert!(matches!(queue.start(), Err(Error::DependencyCycle(_))));

    let queue = Queue::new("ok", RecordType, 4).unwrap();
    let _producer = Producer::new("p", 0, &queue);
    let c1 = Consumer::new("c1", &queue);
    let mut c2 = Consumer::new("c2", &queue);
    c2.add_dependency(&c1);
    queue.start().unwrap();
    // idempotent once frozen
    queue.start().unwrap();
}

#[test]
#[should_panic(expected = "after the topology was frozen")]
fn attach_after_freeze() {
    let queue = Queue::new("frozen", RecordType, 4).unwrap();
    let _producer = Producer::new("p", 0, &queue);
    let _consumer = Consumer::new("c", &queue);
    queue.start().unwrap();
    let _late = Consumer::new("late", &queue);
}

#[test]
#[should_panic(expected = "drains a different queue")]
fn cross_queue_dependency() {
    let queue_a = Queue::new("a", RecordType, 4).unwrap();
    let queue_b = Queue::new("b", RecordType, 4).unwrap();
    let mut consumer_a = Consumer::new("ca", &queue_a);
    let consumer_b = Consumer::new("cb", &queue_b);
    consumer_a.add_dependency(&consumer_b);
}

#[test]
fn spsc_minimal() {
    // smallest possible configuration: one slot pair, batch 1
    let queue = Queue::new("minimal", RecordType, 2).unwrap();
    let mut producer = Producer::new("p", 1, &queue);
    let mut consumer = Consumer::new("c", &queue);

    for n in 0..10 {
        let record = producer.claim();
        record.tag = 0;
        record.n = n;
        producer.publish();

        match consumer.next() {
            Next::Value(record) => assert_eq!(record.n, n),
            _ => panic!("expected a value"),
        }
    }
    producer.eof();
    assert!(matches!(consumer.next(), Next::Eof));
    // 10 values plus the EOF marker
    assert_eq!(queue.cursor(), 10);
}

#[test]
fn skip_is_invisible() {
    let queue = Queue::new("holes", RecordType, 8).unwrap();
    let mut producer = Producer::new("p", 1, &queue);
    let mut consumer = Consumer::new("c", &queue);

    let mut delivered = 0;
    for n in 0..30 {
        let record = producer.claim();
        record.tag = 0;
        record.n = n;
        if n % 3 == 2 {
            producer.skip();
        } else {
            producer.publish();
            assert_eq!(consumer.next().value().unwrap().n, n);
            delivered += 1;
        }
    }
    producer.eof();
    assert_eq!(delivered, 20);
    assert!(matches!(consumer.next(), Next::Eof));
    // holes still advanced the published cursor: 30 slots + EOF
    assert_eq!(queue.cursor(), 30);
}

#[test]
fn flush_midstream() {
    let queue = Queue::new("flush", RecordType, 16).unwrap();
    let mut producer = Producer::new("p", 1, &queue);
    let mut consumer = Consumer::new("c", &queue);

    produce(&mut producer, 0, 3);
    producer.flush();
    for n in 3..6 {
        let record = producer.claim();
        record.tag = 0;
        record.n = n;
        producer.publish();
    }
    producer.eof();

    let mut events = Vec::new();
    loop {
        match consumer.next() {
            Next::Value(record) => events.push(Some(record.n)),
            Next::Flush => events.push(None),
            Next::Eof => break,
        }
    }
    assert_equal(
        events,
        (0..3).map(Some).chain([None]).chain((3..6).map(Some)),
    );
}

#[test]
fn two_producers_interleaved() {
    let queue = Queue::new("pair", RecordType, 16).unwrap();
    let mut p1 = Producer::new("p1", 1, &queue);
    let mut p2 = Producer::new("p2", 1, &queue);
    let mut consumer = Consumer::new("c", &queue);

    for n in 0..5 {
        let record = p1.claim();
        record.tag = 1;
        record.n = n;
        p1.publish();

        let record = p2.claim();
        record.tag = 2;
        record.n = n;
        p2.publish();
    }
    p1.eof();
    p2.eof();

    let (values, flushes) = drain(&mut consumer);
    assert_eq!(flushes, 0);
    assert_equal(values, (0..5).flat_map(|n| [(1, n), (2, n)]));
    // 10 values and two EOF markers, no gaps
    assert_eq!(queue.cursor(), 11);
}

#[test]
fn wraparound() {
    // seed the cursors a few IDs before the integer wrap
    let initial = Seq::MAX - 7;
    let queue = Queue::with_initial("wrap", RecordType, 4, initial).unwrap();
    let mut producer = Producer::new("p", 1, &queue);
    let mut consumer = Consumer::new("c", &queue);

    for n in 0..32 {
        let record = producer.claim();
        record.tag = 0;
        record.n = n;
        producer.publish();
        assert_eq!(consumer.next().value().unwrap().n, n);
    }
    producer.eof();
    assert!(matches!(consumer.next(), Next::Eof));
    assert_eq!(queue.cursor(), initial.wrapping_add(33));
    assert!(mod_lt(initial, queue.cursor()));
}

#[cfg(feature = "stats")]
#[test]
fn stats_counters() {
    let queue = Queue::new("stats", RecordType, 8).unwrap();
    let mut producer = Producer::new("p", 2, &queue);
    let mut consumer = Consumer::new("c", &queue);

    produce(&mut producer, 0, 6);
    producer.eof();

    let (values, _) = drain(&mut consumer);
    assert_eq!(values.len(), 6);
    // three value batches plus the EOF claim
    assert_eq!(producer.batch_count(), 4);
    assert!(consumer.batch_count() >= 1);
    producer.report();
    consumer.report();
}
