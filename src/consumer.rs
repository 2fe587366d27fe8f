//! Consumers drain values in ID order, gated on the published cursor and on
//! any upstream consumers they declare.

use crate::queue::{Frozen, Queue};
use crate::seq::{mod_le, mod_lt, Seq, SeqCell};
use crate::sync::Arc;
use crate::value::{Special, ValueType};
use crate::yield_strategy::{Threaded, YieldStrategy};

/// Outcome of [`Consumer::next`]: a value, or one of the two stream signals.
/// Neither signal is an error.
#[derive(Debug)]
pub enum Next<'a, V> {
    Value(&'a V),
    Flush,
    Eof,
}

impl<'a, V> Next<'a, V> {
    pub fn value(self) -> Option<&'a V> {
        match self {
            Next::Value(value) => Some(value),
            _ => None,
        }
    }
}

/// Drains one queue. `next` delivers values strictly in ID order and never
/// reports "empty": it backs off through the yield strategy until something
/// is available. The borrow it returns is valid until the following `next`.
///
/// Dependencies ([`add_dependency`](Consumer::add_dependency)) make this
/// consumer trail the named upstream consumers: it will not see an ID until
/// every upstream cursor has passed it.
///
/// Keep the consumer alive until it has seen EOF: dropping it mid-stream
/// leaves its cursor frozen in the registry and eventually stalls producers.
pub struct Consumer<T: ValueType> {
    queue: Arc<Queue<T>>,
    index: usize,
    name: String,
    /// Shared with producers through the registry; release-stored at batch
    /// boundaries, not per value.
    cursor: Arc<SeqCell>,
    /// Cached availability horizon; lets a batch drain without barriers.
    last_available: Seq,
    /// ID currently delivered to the caller.
    current: Seq,
    eof_count: usize,
    dependencies: Vec<Arc<SeqCell>>,
    frozen: Option<Arc<Frozen>>,
    yield_strategy: Box<dyn YieldStrategy>,
    done: bool,
    #[cfg(feature = "stats")]
    batch_count: u64,
    #[cfg(feature = "stats")]
    yield_count: u64,
}

impl<T: ValueType> Consumer<T> {
    /// Attaches a consumer to `queue`.
    pub fn new(name: &str, queue: &Arc<Queue<T>>) -> Self {
        let cursor = Arc::new(SeqCell::new(queue.initial()));
        let index = queue.attach_consumer(name, cursor.clone());
        Self {
            queue: queue.clone(),
            index,
            name: name.to_owned(),
            cursor,
            last_available: queue.initial(),
            current: queue.initial(),
            eof_count: 0,
            dependencies: Vec::new(),
            frozen: None,
            yield_strategy: Box::new(Threaded::new()),
            done: false,
            #[cfg(feature = "stats")]
            batch_count: 0,
            #[cfg(feature = "stats")]
            yield_count: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_yield_strategy(&mut self, strategy: Box<dyn YieldStrategy>) {
        self.yield_strategy = strategy;
    }

    /// Declares that this consumer must trail `upstream`. Call before the
    /// first `next` anywhere on the queue; cycles are rejected at freeze.
    pub fn add_dependency(&mut self, upstream: &Consumer<T>) {
        assert!(
            Arc::ptr_eq(&self.queue, &upstream.queue),
            "consumer `{}`: dependency `{}` drains a different queue",
            self.name,
            upstream.name
        );
        self.queue.add_dependency(self.index, upstream.index);
        self.dependencies.push(upstream.cursor.clone());
    }

    /// ID of the last value this consumer has released. Acquire load; call
    /// sparingly.
    pub fn cursor(&self) -> Seq {
        self.cursor.get()
    }

    /// Delivers the next value, or a stream signal.
    ///
    /// Holes are passed over silently. A flush marker surfaces immediately.
    /// An EOF marker counts against the number of attached producers; once
    /// all of them have signaled, `next` returns [`Next::Eof`] and the
    /// consumer is done; calling `next` again is a contract violation.
    pub fn next(&mut self) -> Next<'_, T::Value> {
        debug_assert!(!self.done, "consumer `{}`: next after eof", self.name);
        loop {
            let id = self.current.wrapping_add(1);
            if mod_lt(self.last_available, id) {
                self.wait_for(id);
            }
            self.current = id;

            // Published means the claiming producer's writes are visible
            // (acquire on the cursor loads in `wait_for`).
            let slot = unsafe { &*self.queue.slot(id) };
            debug_assert_eq!(slot.id, id, "consumer `{}`: slot overwritten", self.name);

            match slot.special {
                Special::None => return Next::Value(&slot.value),
                Special::Hole => {
                    self.cursor.set(id);
                }
                Special::Flush => {
                    self.cursor.set(id);
                    return Next::Flush;
                }
                Special::Eof => {
                    self.eof_count += 1;
                    self.cursor.set(id);
                    if self.eof_count == self.producer_count() {
                        self.done = true;
                        return Next::Eof;
                    }
                }
            }
        }
    }

    /// Slow path: the cached horizon ran out. Publish our own progress so
    /// producers can reclaim the batch we just finished, then wait until
    /// both the queue and every dependency have passed `id`.
    fn wait_for(&mut self, id: Seq) {
        self.cursor.set(self.current);
        self.ensure_frozen();

        let mut first = true;
        loop {
            let mut available = self.queue.cursor();
            for dependency in &self.dependencies {
                let seq = dependency.get();
                if mod_lt(seq, available) {
                    available = seq;
                }
            }
            if mod_le(id, available) {
                self.last_available = available;
                #[cfg(feature = "stats")]
                {
                    self.batch_count += 1;
                }
                return;
            }
            self.yield_strategy
                .wait(first, self.queue.name(), &self.name);
            #[cfg(feature = "stats")]
            {
                self.yield_count += 1;
            }
            first = false;
        }
    }

    fn producer_count(&self) -> usize {
        self.frozen
            .as_ref()
            .expect("frozen before first slot read")
            .producer_count
    }

    fn ensure_frozen(&mut self) {
        if self.frozen.is_none() {
            let frozen = self
                .queue
                .freeze()
                .unwrap_or_else(|err| panic!("queue `{}`: {}", self.queue.name(), err));
            self.frozen = Some(frozen);
        }
    }

    #[cfg(test)]
    pub(crate) fn cursor_cell(&self) -> Arc<SeqCell> {
        self.cursor.clone()
    }
}

#[cfg(feature = "stats")]
impl<T: ValueType> Consumer<T> {
    /// Availability refreshes performed so far.
    pub fn batch_count(&self) -> u64 {
        self.batch_count
    }

    /// Yield-strategy invocations so far.
    pub fn yield_count(&self) -> u64 {
        self.yield_count
    }

    pub fn report(&self) {
        log::info!(
            "consumer `{}`: {} batches, {} yields",
            self.name,
            self.batch_count,
            self.yield_count
        );
    }
}
