//! Queue implementation
//!
//! This module provides the lock-free unbounded FIFO queue and its building blocks.
//!
//! ## Layout
//!
//! - [`ConcurrentQueue`]: the Michael-Scott queue itself
//! - [`QueueConfig`]: construction-time options
//! - `tagged`: `(slot index, tag)` references packed into one atomic word
//! - `arena`: the segmented node table, its free list and epoch-deferred recycling
//! - `ledger`: optional record of minted tags for debugging runs
//!
//! ## Guarantees
//!
//! - **Lock-free**: every retry loop only repeats because another thread's CAS
//!   succeeded
//! - **FIFO**: values leave in the order their enqueues linked them
//! - **ABA prevention**: tags on every reference plus epoch-based recycling
//! - **Cache optimization**: `head`, `tail` and the length counter sit on their own
//!   cache lines
//!
//! ## Examples
//!
//! ```rust
//! use tagqueue::queue::{ConcurrentQueue, QueueConfig};
//!
//! let queue = ConcurrentQueue::with_config(QueueConfig::new().reserve(64))?;
//! queue.enqueue("hello");
//! queue.enqueue("world");
//! assert_eq!(queue.dequeue(), Some("hello"));
//! # Ok::<(), tagqueue::Error>(())
//! ```
mod arena;
mod config;
mod ledger;
pub mod mpmc;
mod tagged;

pub use arena::MAX_SLOTS;
pub use config::QueueConfig;
pub use mpmc::ConcurrentQueue;


#[cfg(test)]
mod proptests;
