//! Node table and reclamation
//!
//! Queue nodes live in a segmented table of slots instead of individual heap
//! boxes. Segment `k` holds `32 << k` slots and is installed lazily by whichever
//! thread first needs it, so the table grows without ever moving a slot:
//!
//! ```text
//! segment 0: [ 0 .. 32)        32 slots
//! segment 1: [32 .. 96)        64 slots
//! segment 2: [96 .. 224)      128 slots
//! ...
//! segment 26                  2^31 slots
//! ```
//!
//! Slot memory is only freed when the whole table is dropped. A thread that reads
//! through a stale index therefore always reads valid memory; whether what it read
//! is still current is decided by the tag in the CAS that follows.
//!
//! ## Reclamation
//!
//! A node retired by `dequeue` may still be read by threads that loaded its index
//! earlier: its `next` link by any operation, and its value by the consumer whose
//! head CAS advanced onto it. Retired slots are handed to `crossbeam-epoch`, which
//! runs the deferred recycle only after every thread pinned at retirement time has
//! unpinned. Only then does the slot go back on the free list, where a producer
//! may overwrite it.
//!
//! The free list is a Treiber stack whose head is itself a tagged index, so the
//! pop/push/pop interleaving that breaks an untagged free list fails its CAS here.

use super::tagged::{AtomicTaggedIndex, TagSource, TaggedIndex, NULL_INDEX};
use crate::util::CachePadded;
use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, Ordering};
use crossbeam_epoch::Guard;
use std::alloc::{handle_alloc_error, Layout};
use std::sync::Arc;

const FIRST_SEGMENT_SHIFT: u32 = 5;
const FIRST_SEGMENT_LEN: usize = 1 << FIRST_SEGMENT_SHIFT;
const SEGMENT_COUNT: usize = 27;

/// Slots addressable by the table: `2^32 - 32`, all below [`NULL_INDEX`]
const TABLE_SLOTS: u64 = (FIRST_SEGMENT_LEN as u64) * ((1u64 << SEGMENT_COUNT) - 1);

/// Largest number of slots the node table can address on this target
pub const MAX_SLOTS: usize = if TABLE_SLOTS > usize::MAX as u64 {
    usize::MAX
} else {
    TABLE_SLOTS as usize
};

#[inline]
const fn segment_len(segment: usize) -> usize {
    FIRST_SEGMENT_LEN << segment
}

/// Maps a slot index to `(segment, offset)`.
#[inline]
const fn locate(index: u32) -> (usize, usize) {
    let biased = index as u64 + FIRST_SEGMENT_LEN as u64;
    let segment = (63 - biased.leading_zeros()) - FIRST_SEGMENT_SHIFT;
    let offset = biased - ((FIRST_SEGMENT_LEN as u64) << segment);
    (segment as usize, offset as usize)
}

/// One node of the chain
#[repr(align(64))]
pub(crate) struct Slot<T> {
    /// Link to the successor, null while the node is the last in the chain
    next: AtomicTaggedIndex,
    /// Link to the next free slot while this slot sits on the free list
    free_next: AtomicU32,
    /// Initialized from enqueue until the value is taken; never for a dummy
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    fn vacant() -> Self {
        Self {
            next: AtomicTaggedIndex::new(TaggedIndex::null(0)),
            free_next: AtomicU32::new(NULL_INDEX),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

/// Segmented, append-only table of node slots with a lock-free free list
pub(crate) struct NodeArena<T> {
    segments: [AtomicPtr<Slot<T>>; SEGMENT_COUNT],
    /// Next never-used slot index
    fresh: CachePadded<AtomicU64>,
    /// Head of the free list
    free: CachePadded<AtomicTaggedIndex>,
    tags: TagSource,
    _marker: PhantomData<Slot<T>>,
}

// Slots are only written by the thread that claimed them, and values are moved
// out by exactly one consumer, so sharing the table only requires `T: Send`.
unsafe impl<T: Send> Send for NodeArena<T> {}
unsafe impl<T: Send> Sync for NodeArena<T> {}

impl<T> NodeArena<T> {
    pub(crate) fn new() -> Self {
        Self {
            segments: [(); SEGMENT_COUNT].map(|_| AtomicPtr::new(ptr::null_mut())),
            fresh: CachePadded::new(AtomicU64::new(0)),
            free: CachePadded::new(AtomicTaggedIndex::new(TaggedIndex::null(0))),
            tags: TagSource::new(),
            _marker: PhantomData,
        }
    }

    /// Mints a fresh tagged reference to `index`.
    #[inline]
    pub(crate) fn tagged(&self, index: u32) -> TaggedIndex {
        self.tags.tagged(index)
    }

    /// Installs the segments covering the first `slots` slots.
    pub(crate) fn reserve(&self, slots: usize) {
        let slots = slots.min(MAX_SLOTS);
        if slots == 0 {
            return;
        }
        let (last, _) = locate((slots - 1) as u32);
        for segment in 0..=last {
            self.ensure_segment(segment);
        }
    }

    /// Number of segments currently installed.
    pub(crate) fn installed_segments(&self) -> usize {
        self.segments
            .iter()
            .filter(|segment| !segment.load(Ordering::Acquire).is_null())
            .count()
    }

    /// Claims a slot for a dummy node, with no value and a fresh null link.
    pub(crate) fn alloc_dummy(&self) -> TaggedIndex {
        let index = self.claim();
        self.slot(index)
            .next
            .store(TaggedIndex::null(self.tags.mint()), Ordering::Relaxed);
        self.tagged(index)
    }

    /// Claims a slot, moves `value` into it and returns a fresh tagged reference.
    ///
    /// The slot becomes visible to other threads only through the `Release` CAS
    /// that links it into the chain.
    pub(crate) fn alloc(&self, value: T) -> TaggedIndex {
        let index = self.claim();
        let slot = self.slot(index);
        // SAFETY: the slot came off the free list or was never used. Either way no
        // other thread can reach it until it is linked.
        unsafe {
            (*slot.value.get()).write(value);
        }
        slot.next
            .store(TaggedIndex::null(self.tags.mint()), Ordering::Relaxed);
        self.tagged(index)
    }

    /// The `next` link of `node`.
    #[inline]
    pub(crate) fn next(&self, node: TaggedIndex) -> &AtomicTaggedIndex {
        &self.slot(node.index()).next
    }

    /// Moves the value out of `node`.
    ///
    /// # Safety
    ///
    /// `node` must hold a value, and the caller must be the only thread ever taking
    /// it. In the queue this is the consumer whose head CAS advanced onto `node`.
    #[inline]
    pub(crate) unsafe fn take(&self, node: TaggedIndex) -> T {
        (*self.slot(node.index()).value.get()).assume_init_read()
    }

    /// Drops the value held by `node` in place.
    ///
    /// # Safety
    ///
    /// Same contract as [`take`](Self::take).
    pub(crate) unsafe fn drop_value(&self, node: TaggedIndex) {
        (*self.slot(node.index()).value.get()).assume_init_drop();
    }

    /// Hands a node that is no longer reachable from `head` to the epoch collector.
    ///
    /// The slot returns to the free list once every thread that was pinned when
    /// this was called has unpinned. The deferred closure owns a reference to the
    /// table, so it stays valid even if the queue is dropped first.
    pub(crate) fn retire(self: &Arc<Self>, node: TaggedIndex, guard: &Guard) {
        let arena = Arc::clone(self);
        let index = node.index();
        // SAFETY: the closure only touches the slot's free-list link and the free
        // list head, never the value, which was already moved out or never set.
        unsafe {
            guard.defer_unchecked(move || arena.release(index));
        }
    }

    fn claim(&self) -> u32 {
        match self.pop_free() {
            Some(index) => index,
            None => self.claim_fresh(),
        }
    }

    fn claim_fresh(&self) -> u32 {
        let index = self.fresh.fetch_add(1, Ordering::Relaxed);
        if index >= TABLE_SLOTS {
            handle_alloc_error(Layout::new::<Slot<T>>());
        }
        let index = index as u32;
        self.ensure_segment(locate(index).0);
        index
    }

    fn pop_free(&self) -> Option<u32> {
        loop {
            let head = self.free.load(Ordering::Acquire);
            if head.is_null() {
                return None;
            }
            // May be stale if another thread popped `head` meanwhile; the tag then
            // fails the CAS below.
            let below = self.slot(head.index()).free_next.load(Ordering::Relaxed);
            if self.free.compare_and_swap(head, self.tagged(below)) {
                return Some(head.index());
            }
        }
    }

    fn release(&self, index: u32) {
        let slot = self.slot(index);
        loop {
            let head = self.free.load(Ordering::Acquire);
            slot.free_next.store(head.index(), Ordering::Relaxed);
            if self.free.compare_and_swap(head, self.tagged(index)) {
                return;
            }
        }
    }

    fn ensure_segment(&self, segment: usize) -> *mut Slot<T> {
        let current = self.segments[segment].load(Ordering::Acquire);
        if !current.is_null() {
            return current;
        }

        let fresh = Self::allocate_segment(segment);
        match self.segments[segment].compare_exchange(
            ptr::null_mut(),
            fresh,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                trace_event!(
                    debug,
                    segment,
                    slots = segment_len(segment),
                    "installed node table segment"
                );
                fresh
            }
            Err(installed) => {
                // SAFETY: `fresh` was never published.
                unsafe { Self::free_segment(fresh, segment) };
                installed
            }
        }
    }

    fn allocate_segment(segment: usize) -> *mut Slot<T> {
        let slots: Box<[Slot<T>]> = (0..segment_len(segment)).map(|_| Slot::vacant()).collect();
        Box::into_raw(slots) as *mut Slot<T>
    }

    /// # Safety
    ///
    /// `base` must come from `allocate_segment(segment)` and be unreachable.
    unsafe fn free_segment(base: *mut Slot<T>, segment: usize) {
        drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
            base,
            segment_len(segment),
        )));
    }

    #[inline]
    fn slot(&self, index: u32) -> &Slot<T> {
        debug_assert_ne!(index, NULL_INDEX, "dereferenced a null link");
        let (segment, offset) = locate(index);
        let base = self.segments[segment].load(Ordering::Acquire);
        debug_assert!(!base.is_null(), "slot {} has no installed segment", index);
        // SAFETY: an index is handed out only after its segment is installed, and
        // segments stay allocated until the table is dropped.
        unsafe { &*base.add(offset) }
    }
}

impl<T> Drop for NodeArena<T> {
    fn drop(&mut self) {
        for (segment, base) in self.segments.iter_mut().enumerate() {
            let base = *base.get_mut();
            if !base.is_null() {
                // SAFETY: exclusive access; values were already dropped or taken
                // by the queue, and `MaybeUninit` never drops them again.
                unsafe { Self::free_segment(base, segment) };
            }
        }
    }
}

impl<T> fmt::Debug for NodeArena<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeArena")
            .field("segments", &self.installed_segments())
            .field("fresh", &self.fresh.load(Ordering::Relaxed))
            .field("free", &self.free.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_epoch as epoch;

    #[test]
    fn test_locate_segment_boundaries() {
        assert_eq!(locate(0), (0, 0));
        assert_eq!(locate(31), (0, 31));
        assert_eq!(locate(32), (1, 0));
        assert_eq!(locate(95), (1, 63));
        assert_eq!(locate(96), (2, 0));
        let last = (TABLE_SLOTS - 1) as u32;
        assert_eq!(locate(last), (SEGMENT_COUNT - 1, segment_len(SEGMENT_COUNT - 1) - 1));
        assert!(TABLE_SLOTS < NULL_INDEX as u64);
    }

    #[test]
    fn test_alloc_take_round_trip() {
        let arena = NodeArena::new();
        let a = arena.alloc(String::from("a"));
        let b = arena.alloc(String::from("b"));
        assert_ne!(a.index(), b.index());
        assert!(arena.next(a).load(Ordering::Relaxed).is_null());

        unsafe {
            assert_eq!(arena.take(b), "b");
            assert_eq!(arena.take(a), "a");
        }
    }

    #[test]
    fn test_growth_installs_segments_lazily() {
        let arena: NodeArena<u64> = NodeArena::new();
        assert_eq!(arena.installed_segments(), 0);
        for i in 0..100 {
            let node = arena.alloc(i);
            unsafe { arena.drop_value(node) };
        }
        // 100 slots span segments 0, 1 and 2
        assert_eq!(arena.installed_segments(), 3);
    }

    #[test]
    fn test_reserve() {
        let arena: NodeArena<u8> = NodeArena::new();
        arena.reserve(0);
        assert_eq!(arena.installed_segments(), 0);
        arena.reserve(33);
        assert_eq!(arena.installed_segments(), 2);
        arena.reserve(32);
        assert_eq!(arena.installed_segments(), 2);
    }

    #[test]
    fn test_released_slot_is_reused_with_new_tag() {
        let arena: NodeArena<u32> = NodeArena::new();
        let first = arena.alloc(1);
        unsafe { arena.drop_value(first) };
        arena.release(first.index());

        let second = arena.alloc(2);
        assert_eq!(second.index(), first.index());
        assert_ne!(second, first);
        unsafe { assert_eq!(arena.take(second), 2) };
    }

    #[test]
    fn test_free_list_is_lifo() {
        let arena: NodeArena<u32> = NodeArena::new();
        let nodes: Vec<_> = (0..4).map(|_| arena.alloc_dummy()).collect();
        for node in &nodes {
            arena.release(node.index());
        }
        for node in nodes.iter().rev() {
            assert_eq!(arena.claim(), node.index());
        }
        // Free list drained, next claim is fresh
        assert_eq!(arena.claim(), 4);
    }

    #[test]
    fn test_retire_defers_release() {
        let arena = Arc::new(NodeArena::<u32>::new());
        let node = arena.alloc_dummy();
        {
            let guard = epoch::pin();
            arena.retire(node, &guard);
            // Still pinned: the slot cannot be back on the free list yet
            assert!(arena.free.load(Ordering::Acquire).is_null());
        }
        // Drive the collector until the deferred release has run
        for _ in 0..100_000 {
            if !arena.free.load(Ordering::Acquire).is_null() {
                break;
            }
            epoch::pin().flush();
            std::thread::yield_now();
        }
        assert_eq!(arena.free.load(Ordering::Acquire).index(), node.index());
    }

    #[test]
    fn test_concurrent_claims_are_distinct() {
        use std::collections::HashSet;
        use std::thread;

        let arena = Arc::new(NodeArena::<usize>::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let arena = Arc::clone(&arena);
                thread::spawn(move || {
                    (0..500)
                        .map(|i| {
                            let node = arena.alloc(t * 500 + i);
                            node.index()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for index in handle.join().unwrap() {
                assert!(seen.insert(index), "slot {} claimed twice", index);
                unsafe { arena.drop_value(arena.tagged(index)) };
            }
        }
        assert_eq!(seen.len(), 2000);
    }
}
