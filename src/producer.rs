//! Producers claim contiguous batches of slot IDs, fill the slots in place
//! and publish them in order.

use log::trace;

use crate::queue::{Frozen, Queue};
use crate::seq::{mod_le, mod_lt, Seq};
use crate::sync::{hint, Arc};
use crate::value::{Slot, Special, ValueType};
use crate::yield_strategy::{Threaded, YieldStrategy};

/// Claim/publish variant, resolved at topology freeze. A lone producer never
/// has to arbitrate, so it skips the claim CAS and the publish handover wait.
#[derive(Copy, Clone, Eq, PartialEq)]
enum ClaimMode {
    Single,
    Multi,
}

/// Feeds one queue. Claim a value, fill it in, publish it:
///
/// ```ignore
/// let value = producer.claim();
/// value.payload = 42;
/// producer.publish();
/// ```
///
/// A claimed value is writable until `publish`/`skip`; after that the queue
/// may hand the slot to consumers and eventually reuse it. Claiming after
/// [`eof`](Producer::eof) is a contract violation.
pub struct Producer<T: ValueType> {
    queue: Arc<Queue<T>>,
    #[allow(dead_code)]
    index: usize,
    name: String,
    /// IDs reserved per claim round-trip.
    batch_size: Seq,
    /// Last ID handed to the caller.
    last_produced: Seq,
    /// Upper end of the currently reserved batch.
    last_claimed: Seq,
    mode: Option<ClaimMode>,
    frozen: Option<Arc<Frozen>>,
    yield_strategy: Box<dyn YieldStrategy>,
    eof_sent: bool,
    #[cfg(feature = "stats")]
    batch_count: u64,
    #[cfg(feature = "stats")]
    yield_count: u64,
}

impl<T: ValueType> Producer<T> {
    /// Attaches a producer to `queue`. `batch_size` 0 selects a default of
    /// a quarter of the ring; anything larger than the ring is clamped.
    pub fn new(name: &str, batch_size: usize, queue: &Arc<Queue<T>>) -> Self {
        let index = queue.attach_producer(name);
        let batch_size = if batch_size == 0 {
            (queue.size() / 4).max(1)
        } else {
            batch_size.min(queue.size())
        };
        Self {
            queue: queue.clone(),
            index,
            name: name.to_owned(),
            batch_size: batch_size as Seq,
            last_produced: queue.initial(),
            last_claimed: queue.initial(),
            mode: None,
            frozen: None,
            yield_strategy: Box::new(Threaded::new()),
            eof_sent: false,
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

    /// Claims the next slot and returns its value for mutation. Spins (via
    /// the yield strategy) while the ring is full. The borrow ends at the
    /// matching [`publish`](Producer::publish) or [`skip`](Producer::skip).
    pub fn claim(&mut self) -> &mut T::Value {
        debug_assert!(!self.eof_sent, "producer `{}`: claim after eof", self.name);
        if !mod_lt(self.last_produced, self.last_claimed) {
            self.claim_batch(self.batch_size);
        }
        self.last_produced = self.last_produced.wrapping_add(1);
        let slot = self.stamp(Special::None);
        &mut slot.value
    }

    /// Publishes the most recently claimed value, making it visible to
    /// consumers. The published cursor moves through every ID in order, so
    /// with multiple producers this waits for the predecessor's publish.
    pub fn publish(&mut self) {
        match self.mode.expect("publish before claim") {
            ClaimMode::Single => self.queue.set_cursor(self.last_produced),
            ClaimMode::Multi => {
                let predecessor = self.last_produced.wrapping_sub(1);
                let mut first = true;
                while self.queue.cursor() != predecessor {
                    self.yield_strategy
                        .wait(first, self.queue.name(), &self.name);
                    #[cfg(feature = "stats")]
                    {
                        self.yield_count += 1;
                    }
                    first = false;
                }
                self.queue.set_cursor(self.last_produced);
            }
        }
    }

    /// Marks the currently claimed value as a hole and publishes it.
    /// Consumers pass over holes without delivering them.
    pub fn skip(&mut self) {
        self.stamp(Special::Hole);
        self.publish();
    }

    /// Publishes an end-of-stream marker. The producer is done afterwards;
    /// further claims are a contract violation.
    pub fn eof(&mut self) {
        self.publish_special(Special::Eof);
        self.eof_sent = true;
        trace!("producer `{}`: eof at {}", self.name, self.last_produced);
    }

    /// Publishes a flush marker. Consumers surface it as soon as they reach
    /// it, regardless of batching.
    pub fn flush(&mut self) {
        self.publish_special(Special::Flush);
        trace!("producer `{}`: flush at {}", self.name, self.last_produced);
    }

    /// Claims the next ID (a single one if the current batch is exhausted:
    /// a full batch here would strand unpublished IDs in front of other
    /// producers), stamps it, publishes it.
    fn publish_special(&mut self, special: Special) {
        debug_assert!(!self.eof_sent, "producer `{}`: {:?} after eof", self.name, special);
        if !mod_lt(self.last_produced, self.last_claimed) {
            self.claim_batch(1);
        }
        self.last_produced = self.last_produced.wrapping_add(1);
        self.stamp(special);
        self.publish();
    }

    /// Reserves `count` IDs ending at a new `last_claimed`, then waits until
    /// every slot in the reservation has been released by all consumers.
    fn claim_batch(&mut self, count: Seq) {
        let frozen = self.ensure_frozen();
        match self.mode.expect("mode resolved in ensure_frozen") {
            ClaimMode::Single => {
                let upper = self.last_claimed.wrapping_add(count);
                self.wait_for_reuse(upper, &frozen);
                self.last_claimed = upper;
            }
            ClaimMode::Multi => {
                let upper = loop {
                    let current = self.queue.claimed_cursor();
                    let upper = current.wrapping_add(count);
                    if self.queue.try_claim_up_to(current, upper) {
                        // IDs in (current, upper] now belong to this producer;
                        // other producers took everything in between.
                        self.last_produced = current;
                        break upper;
                    }
                    hint::spin_loop();
                };
                self.wait_for_reuse(upper, &frozen);
                self.last_claimed = upper;
            }
        }
        #[cfg(feature = "stats")]
        {
            self.batch_count += 1;
        }
    }

    /// A slot may be rewritten only once every consumer's cursor has passed
    /// `id - size`: the minimum cursor, in modular order, bounds what is
    /// still live.
    fn wait_for_reuse(&mut self, upper: Seq, frozen: &Frozen) {
        let reuse_horizon = upper.wrapping_sub(self.queue.size() as Seq);
        let mut first = true;
        loop {
            let cursors = &frozen.consumer_cursors;
            let mut min = cursors[0].get();
            for cursor in &cursors[1..] {
                let seq = cursor.get();
                if mod_lt(seq, min) {
                    min = seq;
                }
            }
            if mod_le(reuse_horizon, min) {
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

    fn stamp(&mut self, special: Special) -> &mut Slot<T::Value> {
        // Sole writer: `last_produced` sits inside this producer's claimed
        // batch, and `wait_for_reuse` saw every consumer past `id - size`.
        let slot = unsafe { &mut *self.queue.slot(self.last_produced) };
        slot.id = self.last_produced;
        slot.special = special;
        slot
    }

    fn ensure_frozen(&mut self) -> Arc<Frozen> {
        if self.frozen.is_none() {
            let frozen = self
                .queue
                .freeze()
                .unwrap_or_else(|err| panic!("queue `{}`: {}", self.queue.name(), err));
            self.mode = Some(if frozen.producer_count == 1 {
                ClaimMode::Single
            } else {
                ClaimMode::Multi
            });
            self.frozen = Some(frozen);
        }
        self.frozen.as_ref().unwrap().clone()
    }
}

#[cfg(feature = "stats")]
impl<T: ValueType> Producer<T> {
    /// Claim round-trips performed so far.
    pub fn batch_count(&self) -> u64 {
        self.batch_count
    }

    /// Yield-strategy invocations so far.
    pub fn yield_count(&self) -> u64 {
        self.yield_count
    }

    pub fn report(&self) {
        log::info!(
            "producer `{}`: {} batches, {} yields",
            self.name,
            self.batch_count,
            self.yield_count
        );
    }
}
