//! Sequence IDs and the padded atomic cursor cell.
//!
//! Every cursor comparison goes through [`mod_lt`]/[`mod_le`]. A raw `<` on
//! two sequence IDs breaks once the stream wraps the integer range.

use crate::sync::{AtomicI64, Ordering};

/// A sequence ID: a signed integer naming a logical position in the stream.
/// Monotonically increasing over a queue's lifetime, modulo wraparound.
pub type Seq = i64;

/// The cursor value whose successor is the first valid ID (0).
/// All cursors, and every slot's ID field, start here.
pub const SEQ_NONE: Seq = -1;

/// `a < b` on the modular-arithmetic ring of [`Seq`].
///
/// Correct as long as the distance between any two live cursors stays below
/// half the ID range, which the ring capacity bound guarantees.
#[inline(always)]
pub fn mod_lt(a: Seq, b: Seq) -> bool {
    b.wrapping_sub(a) > 0
}

/// `a <= b` on the modular-arithmetic ring of [`Seq`].
#[inline(always)]
pub fn mod_le(a: Seq, b: Seq) -> bool {
    b.wrapping_sub(a) >= 0
}

/// A cache-line padded atomic sequence cell.
///
/// Cursors written by one thread and read by others each own a full cache
/// line, so neighboring cursors never false-share. This is the only
/// synchronization primitive on the hot path.
#[repr(align(64))]
pub(crate) struct SeqCell {
    value: AtomicI64,
}

// Fatter loom atomics break the size half of this.
#[cfg(not(loom))]
const _: () = assert!(
    std::mem::size_of::<SeqCell>() == 64 && std::mem::align_of::<SeqCell>() == 64
);

impl SeqCell {
    pub(crate) fn new(value: Seq) -> Self {
        Self {
            value: AtomicI64::new(value),
        }
    }

    /// Acquire load: pairs with [`SeqCell::set`] so a reader that observes a
    /// cursor at `k` also observes every write made before it was set.
    #[inline]
    pub(crate) fn get(&self) -> Seq {
        self.value.load(Ordering::Acquire)
    }

    /// Release store.
    #[inline]
    pub(crate) fn set(&self, value: Seq) {
        self.value.store(value, Ordering::Release)
    }

    /// Acquire on success, relaxed on failure.
    #[inline]
    pub(crate) fn compare_and_set(&self, current: Seq, new: Seq) -> bool {
        self.value
            .compare_exchange(current, new, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }
}

impl std::fmt::Debug for SeqCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SeqCell").field(&self.get()).finish()
    }
}
