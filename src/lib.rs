//! # tagqueue
//!
//! A lock-free, multi-producer multi-consumer, unbounded FIFO queue.
//!
//! ## Features
//!
//! - **Lock-free MPMC**: `enqueue` and `dequeue` never take a lock; a retry only
//!   happens because another thread made progress
//! - **ABA-proof links**: `head`, `tail` and every `next` link are tagged indices
//!   swapped as one 64-bit word
//! - **Safe reclamation**: retired nodes are recycled through `crossbeam-epoch`, never
//!   while another thread may still read them
//! - **Optional diagnostics**: metrics counters, a tag ledger and `tracing` events
//!
//! ## Quick Start
//!
//! ```rust
//! use tagqueue::ConcurrentQueue;
//!
//! let queue = ConcurrentQueue::new();
//! queue.enqueue(42);
//! assert_eq!(queue.dequeue(), Some(42));
//! assert_eq!(queue.dequeue(), None);
//! ```
//!
//! ## Thread Safety
//!
//! [`ConcurrentQueue`] is `Send + Sync` whenever the element type is `Send`, and can
//! be shared across threads behind an `Arc` without additional synchronization.
//!
//! ## Memory Layout
//!
//! Nodes live in a segmented node table rather than in individual heap boxes. A
//! link is a `(slot index, tag)` pair packed into one `u64`, which gives a
//! pointer-plus-counter compare-and-swap on every target with 64-bit atomics.

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

/// Emits a `tracing` event when the `tracing` feature is enabled, and nothing otherwise.
macro_rules! trace_event {
    ($level:ident, $($arg:tt)+) => {
        #[cfg(feature = "tracing")]
        {
            tracing::$level!($($arg)+);
        }
    };
}

pub mod metrics;
pub mod queue;

pub use crate::metrics::{MetricsCollector, QueueMetrics};
pub use crate::queue::{ConcurrentQueue, QueueConfig};

/// Common utilities and helper types
pub mod util {
    use core::ops::{Deref, DerefMut};

    /// Cache line size for alignment purposes
    pub const CACHE_LINE_SIZE: usize = 64;

    /// Pads and aligns a value to the cache line size so hot atomics do not share a line
    #[repr(align(64))]
    #[derive(Default)]
    pub struct CachePadded<T> {
        value: T,
    }

    impl<T> CachePadded<T> {
        /// Create a new cache-padded value
        #[inline]
        pub const fn new(value: T) -> Self {
            Self { value }
        }

        /// Get a reference to the inner value
        #[inline]
        pub const fn get(&self) -> &T {
            &self.value
        }

        /// Get a mutable reference to the inner value
        #[inline]
        pub fn get_mut(&mut self) -> &mut T {
            &mut self.value
        }

        /// Get the inner value
        #[inline]
        pub fn into_inner(self) -> T {
            self.value
        }
    }

    impl<T> Deref for CachePadded<T> {
        type Target = T;

        #[inline]
        fn deref(&self) -> &T {
            &self.value
        }
    }

    impl<T> DerefMut for CachePadded<T> {
        #[inline]
        fn deref_mut(&mut self) -> &mut T {
            &mut self.value
        }
    }

    impl<T: Clone> Clone for CachePadded<T> {
        fn clone(&self) -> Self {
            Self::new(self.value.clone())
        }
    }

    impl<T: Copy> Copy for CachePadded<T> {}

    impl<T: core::fmt::Debug> core::fmt::Debug for CachePadded<T> {
        fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
            core::fmt::Debug::fmt(&self.value, f)
        }
    }
}

/// Error types for tagqueue configuration
///
/// Queue operations themselves never fail: a failed compare-and-swap is retried and
/// an empty queue is reported as `None`. Errors only come from validating a
/// [`QueueConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// More node slots were requested than the node table can address
    CapacityExceeded {
        /// Number of slots requested
        requested: usize,
        /// Maximum number of slots the node table can address
        max: usize,
    },
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::CapacityExceeded { requested, max } => write!(
                f,
                "Requested {} node slots but the node table holds at most {}",
                requested, max
            ),
        }
    }
}

impl std::error::Error for Error {}

/// Result type for tagqueue operations
pub type Result<T> = core::result::Result<T, Error>;
