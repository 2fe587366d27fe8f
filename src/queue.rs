//! The ring buffer: a power-of-two array of preallocated value slots, the
//! published and claim-arbitration cursors, and the producer/consumer
//! registry that freezes at first use.

use std::cell::UnsafeCell;

use log::debug;
use thiserror::Error as ThisError;

use crate::seq::{Seq, SeqCell, SEQ_NONE};
use crate::sync::{Arc, Mutex};
use crate::value::{Slot, Special, ValueType};

/// Upper bound on the slot count. Far below the ID-range halving constraint,
/// and past it a ring stops fitting in memory anyway.
pub const MAX_VALUE_COUNT: usize = 1 << 30;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("requested capacity {requested} exceeds the maximum of {max}")]
    CapacityTooLarge { requested: usize, max: usize },

    #[error("queue `{0}` started with no producers attached")]
    NoProducers(String),

    #[error("queue `{0}` started with no consumers attached")]
    NoConsumers(String),

    #[error("dependency cycle among the consumers of queue `{0}`")]
    DependencyCycle(String),
}

/// Topology snapshot taken when the queue freezes. Producers and consumers
/// each cache one of these on their first hot-path call.
pub(crate) struct Frozen {
    pub(crate) producer_count: usize,
    pub(crate) consumer_cursors: Box<[Arc<SeqCell>]>,
}

struct Registry {
    producer_count: usize,
    consumer_cursors: Vec<Arc<SeqCell>>,
    /// Consumer index -> indices of its upstream consumers.
    dependencies: Vec<Vec<usize>>,
    frozen: Option<Arc<Frozen>>,
}

/// A fixed-capacity FIFO of reusable value slots.
///
/// The queue owns every slot for its whole lifetime; [`Producer::claim`] and
/// [`Consumer::next`] hand out borrows into them. Attach all producers and
/// consumers before the first claim or next; the topology freezes at first
/// use.
///
/// [`Producer::claim`]: crate::producer::Producer::claim
/// [`Consumer::next`]: crate::consumer::Consumer::next
pub struct Queue<T: ValueType> {
    name: String,
    value_type: T,
    values: Box<[UnsafeCell<Slot<T::Value>>]>,
    mask: usize,
    /// ID of the most recently published value.
    cursor: SeqCell,
    /// Claim arbitration; touched only when more than one producer attached.
    claimed: SeqCell,
    initial: Seq,
    registry: Mutex<Registry>,
}

// Slot access is arbitrated by sequence IDs: only the producer that claimed
// ID k writes slot `k & mask`, and consumers read it only once the published
// cursor has passed k. `T::Value: Send` is required by `ValueType`.
unsafe impl<T: ValueType> Send for Queue<T> {}
unsafe impl<T: ValueType> Sync for Queue<T> {}

impl<T: ValueType> Queue<T> {
    /// Creates a queue holding `value_count` slots, rounded up to a power of
    /// two (minimum 2), each preallocated through `value_type`.
    pub fn new(name: &str, value_type: T, value_count: usize) -> Result<Arc<Self>, Error> {
        Self::with_initial(name, value_type, value_count, SEQ_NONE)
    }

    pub(crate) fn with_initial(
        name: &str,
        value_type: T,
        value_count: usize,
        initial: Seq,
    ) -> Result<Arc<Self>, Error> {
        if value_count > MAX_VALUE_COUNT {
            return Err(Error::CapacityTooLarge {
                requested: value_count,
                max: MAX_VALUE_COUNT,
            });
        }
        let size = value_count.next_power_of_two().max(2);

        let values: Box<[_]> = (0..size)
            .map(|_| {
                UnsafeCell::new(Slot {
                    id: initial,
                    special: Special::None,
                    value: value_type.allocate(),
                })
            })
            .collect();

        debug!(
            "queue `{}`: {} slots preallocated, value type {:?}",
            name,
            size,
            value_type.type_id()
        );

        Ok(Arc::new(Self {
            name: name.to_owned(),
            value_type,
            values,
            mask: size - 1,
            cursor: SeqCell::new(initial),
            claimed: SeqCell::new(initial),
            initial,
            registry: Mutex::new(Registry {
                producer_count: 0,
                consumer_cursors: Vec::new(),
                dependencies: Vec::new(),
                frozen: None,
            }),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_type(&self) -> &T {
        &self.value_type
    }

    /// Number of slots in the ring.
    pub fn size(&self) -> usize {
        self.mask + 1
    }

    /// ID of the most recently published value. Acquire load; call sparingly.
    pub fn cursor(&self) -> Seq {
        self.cursor.get()
    }

    /// Freezes the topology, validating it first. Also happens implicitly at
    /// the first claim or next, where a misconfiguration panics instead.
    pub fn start(&self) -> Result<(), Error> {
        self.freeze().map(|_| ())
    }

    #[inline]
    pub(crate) fn set_cursor(&self, value: Seq) {
        self.cursor.set(value)
    }

    #[inline]
    pub(crate) fn claimed_cursor(&self) -> Seq {
        self.claimed.get()
    }

    #[inline]
    pub(crate) fn try_claim_up_to(&self, current: Seq, upper: Seq) -> bool {
        self.claimed.compare_and_set(current, upper)
    }

    pub(crate) fn initial(&self) -> Seq {
        self.initial
    }

    /// Raw slot access; `id as usize & mask` also holds for negative IDs in
    /// two's complement.
    #[inline]
    pub(crate) fn slot(&self, id: Seq) -> *mut Slot<T::Value> {
        self.values[(id as usize) & self.mask].get()
    }

    pub(crate) fn attach_producer(&self, name: &str) -> usize {
        let mut registry = self.registry.lock();
        assert!(
            registry.frozen.is_none(),
            "queue `{}`: producer `{}` attached after the topology was frozen",
            self.name,
            name
        );
        let index = registry.producer_count;
        registry.producer_count += 1;
        debug!("queue `{}`: producer `{}` attached as #{}", self.name, name, index);
        index
    }

    pub(crate) fn attach_consumer(&self, name: &str, cursor: Arc<SeqCell>) -> usize {
        let mut registry = self.registry.lock();
        assert!(
            registry.frozen.is_none(),
            "queue `{}`: consumer `{}` attached after the topology was frozen",
            self.name,
            name
        );
        let index = registry.consumer_cursors.len();
        registry.consumer_cursors.push(cursor);
        registry.dependencies.push(Vec::new());
        debug!("queue `{}`: consumer `{}` attached as #{}", self.name, name, index);
        index
    }

    pub(crate) fn add_dependency(&self, downstream: usize, upstream: usize) {
        let mut registry = self.registry.lock();
        assert!(
            registry.frozen.is_none(),
            "queue `{}`: dependency added after the topology was frozen",
            self.name
        );
        registry.dependencies[downstream].push(upstream);
    }

    pub(crate) fn freeze(&self) -> Result<Arc<Frozen>, Error> {
        let mut registry = self.registry.lock();
        if let Some(frozen) = &registry.frozen {
            return Ok(frozen.clone());
        }

        if registry.producer_count == 0 {
            return Err(Error::NoProducers(self.name.clone()));
        }
        if registry.consumer_cursors.is_empty() {
            return Err(Error::NoConsumers(self.name.clone()));
        }
        if has_cycle(&registry.dependencies) {
            return Err(Error::DependencyCycle(self.name.clone()));
        }

        let frozen = Arc::new(Frozen {
            producer_count: registry.producer_count,
            consumer_cursors: registry.consumer_cursors.clone().into_boxed_slice(),
        });
        debug!(
            "queue `{}`: frozen with {} producers, {} consumers",
            self.name,
            frozen.producer_count,
            frozen.consumer_cursors.len()
        );
        registry.frozen = Some(frozen.clone());
        Ok(frozen)
    }
}

/// DFS over the dependency adjacency list. Consumer counts are small; this
/// runs once, at freeze.
fn has_cycle(dependencies: &[Vec<usize>]) -> bool {
    #[derive(Copy, Clone, PartialEq)]
    enum Mark {
        White,
        Grey,
        Black,
    }

    fn visit(node: usize, dependencies: &[Vec<usize>], marks: &mut [Mark]) -> bool {
        marks[node] = Mark::Grey;
        for &upstream in &dependencies[node] {
            match marks[upstream] {
                Mark::Grey => return true,
                Mark::White => {
                    if visit(upstream, dependencies, marks) {
                        return true;
                    }
                }
                Mark::Black => {}
            }
        }
        marks[node] = Mark::Black;
        false
    }

    let mut marks = vec![Mark::White; dependencies.len()];
    (0..dependencies.len()).any(|node| marks[node] == Mark::White && visit(node, dependencies, &mut marks))
}
