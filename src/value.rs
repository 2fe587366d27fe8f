//! Value slots and the preallocation capability.

use std::any::TypeId;

use crate::seq::Seq;

/// Out-of-band marker stamped on a slot by the producer that claimed it.
///
/// `Eof` and `Flush` are stream signals surfaced by [`Consumer::next`];
/// `Hole` slots are consumed silently and never delivered.
///
/// [`Consumer::next`]: crate::consumer::Consumer::next
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Special {
    None,
    Eof,
    Hole,
    Flush,
}

/// Capability used by a queue to preallocate one value per slot.
///
/// `allocate` runs exactly once per slot at queue construction and never on
/// the hot path; teardown drops every value in place. The same value object
/// is reused for every sequence ID that maps to its slot.
pub trait ValueType: Send + Sync + 'static {
    type Value: Send + 'static;

    /// Identifier for diagnostics and sanity logging.
    fn type_id(&self) -> TypeId {
        TypeId::of::<Self::Value>()
    }

    fn allocate(&self) -> Self::Value;
}

/// One ring entry: the caller's value plus the bookkeeping the queue stamps
/// on claim. Written only by the producer holding `id`, read only by
/// consumers the published cursor has passed.
pub(crate) struct Slot<V> {
    pub(crate) id: Seq,
    pub(crate) special: Special,
    pub(crate) value: V,
}
