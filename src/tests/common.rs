use crate::consumer::{Consumer, Next};
use crate::producer::Producer;
use crate::value::ValueType;

pub(crate) struct RecordType;

pub(crate) struct Record {
    pub(crate) tag: usize,
    pub(crate) n: usize,
}

impl ValueType for RecordType {
    type Value = Record;

    fn allocate(&self) -> Record {
        Record { tag: 0, n: 0 }
    }
}

/// Publishes `count` records tagged `tag`, numbered from 0.
pub(crate) fn produce(producer: &mut Producer<RecordType>, tag: usize, count: usize) {
    for n in 0..count {
        let record = producer.claim();
        record.tag = tag;
        record.n = n;
        producer.publish();
    }
}

/// Drains until EOF; returns the delivered `(tag, n)` pairs and the number
/// of flush signals seen on the way.
pub(crate) fn drain(consumer: &mut Consumer<RecordType>) -> (Vec<(usize, usize)>, usize) {
    let mut values = Vec::new();
    let mut flushes = 0;
    loop {
        match consumer.next() {
            Next::Value(record) => values.push((record.tag, record.n)),
            Next::Flush => flushes += 1,
            Next::Eof => return (values, flushes),
        }
    }
}
