//! Multi-Producer, Multi-Consumer (MPMC) Queue
//!
//! An unbounded Michael-Scott queue over the tagged node table.
//!
//! ## Algorithm
//!
//! The chain always starts with a dummy node. `head` names the dummy, and the
//! front value lives in the dummy's successor. `tail` names the last node, or the
//! node just before it while an enqueue is between its two CASes:
//!
//! ```text
//!  head                     tail
//!   |                        |
//!   v                        v
//! [dummy] -> [ a ] -> [ b ] -> [ c ] -> null
//! ```
//!
//! - **enqueue** links the new node behind the last node with a CAS on its `next`
//!   link (the linearization point), then tries once to swing `tail` to it.
//! - **dequeue** swings `head` from the dummy to its successor (the linearization
//!   point). The successor becomes the new dummy and its value is moved out; the
//!   old dummy is retired.
//! - A thread that finds `tail` one node behind fixes it up before retrying, so an
//!   enqueue stalled between its CASes never blocks anyone else.
//!
//! ## Memory Ordering
//!
//! ```text
//! Producer (enqueue)                 Consumer (dequeue)
//! -----------------                  ------------------
//! Write value, fresh null link
//! CAS tail.next   (AcqRel) ---->     Load head.next (Acquire)
//!                                    CAS head       (AcqRel)
//!                                    Read value
//! ```
//!
//! Every load of `head`, `tail` or a `next` link is `Acquire`, and every successful
//! CAS is `AcqRel`, so whoever observes a link also observes the node behind it.
//!
//! ## ABA Prevention
//!
//! Every reference to a node, and every fresh null link, carries a newly minted
//! tag. A CAS built from a stale snapshot fails even when the slot it names has
//! been recycled for a new node. Recycling itself waits for `crossbeam-epoch`, so
//! the tags are a second line of defence rather than the only one.

use super::arena::NodeArena;
use super::config::QueueConfig;
use super::ledger::TagLedger;
use super::tagged::{AtomicTaggedIndex, TaggedIndex};
use crate::metrics::{AtomicMetrics, MetricsCollector, QueueMetrics};
use crate::util::CachePadded;
use crate::Result;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use crossbeam_epoch as epoch;
use std::sync::Arc;

/// A lock-free, multi-producer, multi-consumer unbounded FIFO queue
///
/// Values come out in the order their enqueues linked them into the chain.
/// `enqueue` never fails and `dequeue` never waits: on an empty queue it returns
/// `None` immediately.
///
/// # Memory Ordering
///
/// - `enqueue`: links the node with an `AcqRel` CAS so its value is visible to
///   whichever consumer later observes the link
/// - `dequeue`: `Acquire` loads of `head`, `tail` and `head.next`, `AcqRel` CAS on
///   `head`
/// - `len`: `Relaxed`, the count is an estimate
///
/// # Memory Reclamation
///
/// Nodes are recycled through epoch-based reclamation (`crossbeam-epoch`). A node
/// retired by one consumer is reused only after every thread that might still be
/// reading it has finished its current operation.
///
/// # Examples
///
/// ```rust
/// use tagqueue::ConcurrentQueue;
/// use std::sync::Arc;
/// use std::thread;
///
/// let queue = Arc::new(ConcurrentQueue::new());
///
/// let producer = thread::spawn({
///     let queue = Arc::clone(&queue);
///     move || {
///         for i in 0..1000 {
///             queue.enqueue(i);
///         }
///     }
/// });
///
/// let consumer = thread::spawn({
///     let queue = Arc::clone(&queue);
///     move || {
///         let mut sum = 0;
///         let mut received = 0;
///         while received < 1000 {
///             if let Some(value) = queue.dequeue() {
///                 sum += value;
///                 received += 1;
///             }
///         }
///         sum
///     }
/// });
///
/// producer.join().unwrap();
/// assert_eq!(consumer.join().unwrap(), 499500);
/// ```
pub struct ConcurrentQueue<T> {
    /// The dummy node; its successor holds the front value
    head: CachePadded<AtomicTaggedIndex>,

    /// The last node, or the one before it while an enqueue is in flight
    tail: CachePadded<AtomicTaggedIndex>,

    /// Node storage, shared with deferred reclamation closures
    arena: Arc<NodeArena<T>>,

    /// Approximate number of queued values
    size: CachePadded<AtomicUsize>,

    metrics: AtomicMetrics,
    metrics_enabled: AtomicBool,
    ledger: Option<TagLedger>,
    config: QueueConfig,
}

impl<T> ConcurrentQueue<T> {
    /// Create a new empty queue with the default configuration
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tagqueue::ConcurrentQueue;
    ///
    /// let queue: ConcurrentQueue<i32> = ConcurrentQueue::new();
    /// assert!(queue.is_empty());
    /// ```
    pub fn new() -> Self {
        Self::build(QueueConfig::default())
    }

    /// Create a new empty queue from a validated configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`](crate::Error::CapacityExceeded) when the
    /// configuration asks to reserve more slots than the node table can address.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tagqueue::{ConcurrentQueue, MetricsCollector, QueueConfig};
    ///
    /// let queue = ConcurrentQueue::with_config(QueueConfig::new().metrics(true))?;
    /// queue.enqueue("job");
    /// assert_eq!(queue.metrics().enqueues, 1);
    /// # Ok::<(), tagqueue::Error>(())
    /// ```
    pub fn with_config(config: QueueConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: QueueConfig) -> Self {
        let arena = Arc::new(NodeArena::new());
        arena.reserve(config.reserve);

        let dummy = arena.alloc_dummy();
        let ledger = config.validate_tags.then(TagLedger::new);
        if let Some(ledger) = &ledger {
            ledger.check(dummy);
        }

        trace_event!(
            debug,
            reserve = config.reserve,
            metrics = config.metrics,
            validate_tags = config.validate_tags,
            "created concurrent queue"
        );

        Self {
            head: CachePadded::new(AtomicTaggedIndex::new(dummy)),
            tail: CachePadded::new(AtomicTaggedIndex::new(dummy)),
            arena,
            size: CachePadded::new(AtomicUsize::new(0)),
            metrics: AtomicMetrics::default(),
            metrics_enabled: AtomicBool::new(config.metrics),
            ledger,
            config,
        }
    }

    /// Append `value` to the back of the queue
    ///
    /// Lock-free and always succeeds. Running out of memory for a new node is
    /// fatal, as it is for any other allocation.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tagqueue::ConcurrentQueue;
    ///
    /// let queue = ConcurrentQueue::new();
    /// queue.enqueue(1);
    /// queue.enqueue(2);
    /// assert_eq!(queue.len(), 2);
    /// ```
    pub fn enqueue(&self, value: T) {
        let guard = epoch::pin();
        let node = self.arena.alloc(value);
        self.audit(node);

        // Counted before linking so a consumer can never decrement first.
        self.size.fetch_add(1, Ordering::Relaxed);

        let mut retries = 0;
        let mut fixups = 0;
        let tail = loop {
            let tail = self.tail.load(Ordering::Acquire);
            let link = self.arena.next(tail);
            let next = link.load(Ordering::Acquire);

            if tail != self.tail.load(Ordering::Acquire) {
                retries += 1;
                continue;
            }

            if !next.is_null() {
                // Another enqueue linked its node but has not moved `tail` yet.
                if self.advance_tail(tail, next) {
                    fixups += 1;
                }
                retries += 1;
                continue;
            }

            if link.compare_and_swap(next, node) {
                break tail;
            }
            retries += 1;
        };

        // Fails harmlessly if another thread already fixed `tail` up.
        self.advance_tail(tail, node);
        drop(guard);

        if self.metrics_enabled.load(Ordering::Relaxed) {
            self.metrics.record_enqueue(retries, fixups);
        }
    }

    /// Remove and return the value at the front of the queue
    ///
    /// Returns `None` if the queue held no value when it was checked. A dequeue
    /// racing an enqueue either sees the new value or reports empty.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tagqueue::ConcurrentQueue;
    ///
    /// let queue = ConcurrentQueue::new();
    /// queue.enqueue(42);
    /// assert_eq!(queue.dequeue(), Some(42));
    /// assert_eq!(queue.dequeue(), None);
    /// ```
    pub fn dequeue(&self) -> Option<T> {
        let guard = epoch::pin();
        let mut retries = 0;
        let mut fixups = 0;

        let value = loop {
            let head = self.head.load(Ordering::Acquire);
            let tail = self.tail.load(Ordering::Acquire);
            let next = self.arena.next(head).load(Ordering::Acquire);

            if head != self.head.load(Ordering::Acquire) {
                retries += 1;
                continue;
            }

            // Node identity only: `tail` may name the dummy under a different tag.
            if head.same_node(tail) {
                if next.is_null() {
                    break None;
                }
                if self.advance_tail(tail, next) {
                    fixups += 1;
                }
                retries += 1;
                continue;
            }

            if next.is_null() {
                // `head` was validated but `next` belongs to an older snapshot.
                retries += 1;
                continue;
            }

            if self.head.compare_and_swap(head, next) {
                self.audit(next);
                // SAFETY: this thread won the only CAS that moves `head` onto
                // `next`, so it alone takes the value. The slot cannot be recycled
                // before `guard` is dropped.
                let value = unsafe { self.arena.take(next) };
                self.arena.retire(head, &guard);
                break Some(value);
            }
            retries += 1;
        };
        drop(guard);

        match value {
            Some(_) => {
                self.size.fetch_sub(1, Ordering::Relaxed);
                if self.metrics_enabled.load(Ordering::Relaxed) {
                    self.metrics.record_dequeue(retries, fixups);
                }
            }
            None => {
                if self.metrics_enabled.load(Ordering::Relaxed) {
                    self.metrics.record_empty(retries, fixups);
                }
            }
        }
        value
    }

    /// Alias for [`enqueue`](Self::enqueue)
    #[inline]
    pub fn push(&self, value: T) {
        self.enqueue(value)
    }

    /// Alias for [`dequeue`](Self::dequeue)
    #[inline]
    pub fn pop(&self) -> Option<T> {
        self.dequeue()
    }

    /// Get the approximate number of values in the queue
    ///
    /// Exact when no other thread is operating on the queue; may be stale under
    /// contention.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tagqueue::ConcurrentQueue;
    ///
    /// let queue = ConcurrentQueue::new();
    /// assert_eq!(queue.len(), 0);
    /// queue.enqueue('x');
    /// assert_eq!(queue.len(), 1);
    /// ```
    #[inline]
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Check if the queue appears to be empty
    ///
    /// Same staleness caveat as [`len`](Self::len).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The configuration this queue was built with
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// CAS `tail` from `expected` to `desired`, tracing the lagging case.
    #[inline]
    fn advance_tail(&self, expected: TaggedIndex, desired: TaggedIndex) -> bool {
        let advanced = self.tail.compare_and_swap(expected, desired);
        if advanced {
            self.audit(desired);
            trace_event!(trace, from = ?expected, to = ?desired, "advanced tail");
        }
        advanced
    }

    #[inline]
    fn audit(&self, value: TaggedIndex) {
        if let Some(ledger) = &self.ledger {
            ledger.check(value);
        }
    }

    #[cfg(test)]
    pub(crate) fn arena(&self) -> &NodeArena<T> {
        &self.arena
    }

    #[cfg(test)]
    pub(crate) fn ledger_len(&self) -> usize {
        self.ledger.as_ref().map_or(0, TagLedger::len)
    }
}

impl<T> Default for ConcurrentQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MetricsCollector for ConcurrentQueue<T> {
    fn metrics(&self) -> QueueMetrics {
        self.metrics.snapshot()
    }

    fn reset_metrics(&self) {
        self.metrics.reset();
    }

    fn set_metrics_enabled(&self, enabled: bool) {
        self.metrics_enabled.store(enabled, Ordering::Relaxed);
    }

    fn is_metrics_enabled(&self) -> bool {
        self.metrics_enabled.load(Ordering::Relaxed)
    }
}

impl<T> Drop for ConcurrentQueue<T> {
    fn drop(&mut self) {
        // No other thread can reach the chain any more. The dummy holds no value;
        // every node after it holds exactly one.
        let head = self.head.load_exclusive();
        let mut next = self.arena.next(head).load(Ordering::Relaxed);
        while !next.is_null() {
            // SAFETY: `next` is past the dummy and was never dequeued.
            unsafe { self.arena.drop_value(next) };
            next = self.arena.next(next).load(Ordering::Relaxed);
        }
    }
}

impl<T> fmt::Debug for ConcurrentQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentQueue")
            .field("len", &self.len())
            .field("head", &*self.head)
            .field("tail", &*self.tail)
            .field("arena", &*self.arena)
            .field("config", &self.config)
            .finish()
    }
}
