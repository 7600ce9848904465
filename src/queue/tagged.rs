//! Tagged indices
//!
//! A [`TaggedIndex`] names a slot in the node table together with a tag minted
//! from a monotonic counter. The pair packs into a single `u64`, so one native
//! compare-and-swap covers both halves:
//!
//! ```text
//!  63                 32 31                  0
//! +---------------------+---------------------+
//! |         tag         |     slot index      |
//! +---------------------+---------------------+
//! ```
//!
//! Two tagged indices are equal only when both halves match. A slot that is
//! recycled for a new node is always referenced under a fresh tag, so a thread
//! holding a snapshot of the old occupant can never win a CAS against the new one.

use core::fmt;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Slot index reserved for "no node"
pub(crate) const NULL_INDEX: u32 = u32::MAX;

/// A `(slot index, tag)` pair compared and swapped as one unit
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TaggedIndex {
    index: u32,
    tag: u32,
}

impl TaggedIndex {
    #[inline]
    pub(crate) const fn new(index: u32, tag: u32) -> Self {
        Self { index, tag }
    }

    /// A null link carrying `tag`
    #[inline]
    pub(crate) const fn null(tag: u32) -> Self {
        Self::new(NULL_INDEX, tag)
    }

    #[inline]
    pub(crate) const fn is_null(self) -> bool {
        self.index == NULL_INDEX
    }

    #[inline]
    pub(crate) const fn index(self) -> u32 {
        self.index
    }

    #[inline]
    pub(crate) const fn tag(self) -> u32 {
        self.tag
    }

    /// Compares the slot only, ignoring the tag.
    ///
    /// `head` and `tail` are assigned from different `next` snapshots, so the
    /// dequeue path asks whether they name the same node, not whether they are
    /// the same tagged value.
    #[inline]
    pub(crate) const fn same_node(self, other: TaggedIndex) -> bool {
        self.index == other.index
    }

    #[inline]
    const fn pack(self) -> u64 {
        ((self.tag as u64) << 32) | self.index as u64
    }

    #[inline]
    const fn unpack(word: u64) -> Self {
        Self {
            index: word as u32,
            tag: (word >> 32) as u32,
        }
    }
}

impl fmt::Debug for TaggedIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "null#{}", self.tag)
        } else {
            write!(f, "{}#{}", self.index, self.tag)
        }
    }
}

/// An atomically updatable [`TaggedIndex`]
pub(crate) struct AtomicTaggedIndex {
    word: AtomicU64,
}

impl AtomicTaggedIndex {
    #[inline]
    pub(crate) const fn new(value: TaggedIndex) -> Self {
        Self {
            word: AtomicU64::new(value.pack()),
        }
    }

    /// Both halves always come from the same write.
    #[inline]
    pub(crate) fn load(&self, order: Ordering) -> TaggedIndex {
        TaggedIndex::unpack(self.word.load(order))
    }

    #[inline]
    pub(crate) fn store(&self, value: TaggedIndex, order: Ordering) {
        self.word.store(value.pack(), order);
    }

    /// Replaces the stored value with `desired` if it equals `expected`, index and tag.
    ///
    /// Uses `AcqRel` on success so the winner both publishes whatever it wrote
    /// before the swap and observes what the previous writer published.
    #[inline]
    pub(crate) fn compare_and_swap(&self, expected: TaggedIndex, desired: TaggedIndex) -> bool {
        self.word
            .compare_exchange(
                expected.pack(),
                desired.pack(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Exclusive access, used on teardown.
    #[inline]
    pub(crate) fn load_exclusive(&mut self) -> TaggedIndex {
        TaggedIndex::unpack(*self.word.get_mut())
    }
}

impl fmt::Debug for AtomicTaggedIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.load(Ordering::Relaxed), f)
    }
}

/// Monotonic source of tags, shared by every link of one queue
#[derive(Debug, Default)]
pub(crate) struct TagSource {
    next: AtomicU32,
}

impl TagSource {
    pub(crate) const fn new() -> Self {
        Self {
            next: AtomicU32::new(0),
        }
    }

    /// Returns a tag no earlier call returned, until the counter wraps at 2^32.
    ///
    /// Wrapping cannot revive a stale snapshot: a slot index is only recycled once
    /// every thread that could hold a snapshot of it has left its critical section.
    #[inline]
    pub(crate) fn mint(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn tagged(&self, index: u32) -> TaggedIndex {
        TaggedIndex::new(index, self.mint())
    }
}
