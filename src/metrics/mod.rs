//! Performance Metrics Module
//!
//! Optional counters describing how a queue behaves under load: how often
//! operations had to retry a compare-and-swap, how often a lagging `tail` was
//! fixed up, and how many dequeues found the queue empty.
//!
//! Recording is off by default and is switched at runtime through
//! [`MetricsCollector::set_metrics_enabled`]. All counters use `Relaxed` ordering:
//! they are statistics, not synchronization.

use core::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of a queue's counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueueMetrics {
    /// Completed enqueues
    pub enqueues: u64,
    /// Dequeues that returned a value
    pub dequeues: u64,
    /// Dequeues that found the queue empty
    pub empty_dequeues: u64,
    /// Failed compare-and-swap attempts that forced a retry
    pub cas_retries: u64,
    /// Times a thread advanced a lagging `tail` on behalf of another enqueue
    pub tail_fixups: u64,
}

impl QueueMetrics {
    /// Total number of completed operations
    pub fn total_operations(&self) -> u64 {
        self.enqueues + self.dequeues + self.empty_dequeues
    }

    /// Retries per completed operation, as a percentage
    pub fn contention_rate(&self) -> f64 {
        let total = self.total_operations();
        if total == 0 {
            0.0
        } else {
            (self.cas_retries as f64 / total as f64) * 100.0
        }
    }

    /// Share of dequeues that found the queue empty, as a percentage
    pub fn empty_rate(&self) -> f64 {
        let attempts = self.dequeues + self.empty_dequeues;
        if attempts == 0 {
            0.0
        } else {
            (self.empty_dequeues as f64 / attempts as f64) * 100.0
        }
    }
}

/// Internal atomic metrics collection
#[derive(Debug, Default)]
pub(crate) struct AtomicMetrics {
    enqueues: AtomicU64,
    dequeues: AtomicU64,
    empty_dequeues: AtomicU64,
    cas_retries: AtomicU64,
    tail_fixups: AtomicU64,
}

impl AtomicMetrics {
    /// Record a completed enqueue with the retries and fix-ups it needed
    pub(crate) fn record_enqueue(&self, retries: u64, fixups: u64) {
        self.enqueues.fetch_add(1, Ordering::Relaxed);
        self.record_contention(retries, fixups);
    }

    /// Record a dequeue that returned a value
    pub(crate) fn record_dequeue(&self, retries: u64, fixups: u64) {
        self.dequeues.fetch_add(1, Ordering::Relaxed);
        self.record_contention(retries, fixups);
    }

    /// Record a dequeue that found the queue empty
    pub(crate) fn record_empty(&self, retries: u64, fixups: u64) {
        self.empty_dequeues.fetch_add(1, Ordering::Relaxed);
        self.record_contention(retries, fixups);
    }

    fn record_contention(&self, retries: u64, fixups: u64) {
        if retries > 0 {
            self.cas_retries.fetch_add(retries, Ordering::Relaxed);
        }
        if fixups > 0 {
            self.tail_fixups.fetch_add(fixups, Ordering::Relaxed);
        }
    }

    /// Get current metrics snapshot
    pub(crate) fn snapshot(&self) -> QueueMetrics {
        QueueMetrics {
            enqueues: self.enqueues.load(Ordering::Relaxed),
            dequeues: self.dequeues.load(Ordering::Relaxed),
            empty_dequeues: self.empty_dequeues.load(Ordering::Relaxed),
            cas_retries: self.cas_retries.load(Ordering::Relaxed),
            tail_fixups: self.tail_fixups.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics
    pub(crate) fn reset(&self) {
        self.enqueues.store(0, Ordering::Relaxed);
        self.dequeues.store(0, Ordering::Relaxed);
        self.empty_dequeues.store(0, Ordering::Relaxed);
        self.cas_retries.store(0, Ordering::Relaxed);
        self.tail_fixups.store(0, Ordering::Relaxed);
    }
}

/// Trait for data structures that support performance metrics
pub trait MetricsCollector {
    /// Get current performance metrics
    fn metrics(&self) -> QueueMetrics;

    /// Reset all metrics
    fn reset_metrics(&self);

    /// Enable or disable metrics collection
    fn set_metrics_enabled(&self, enabled: bool);

    /// Check if metrics collection is enabled
    fn is_metrics_enabled(&self) -> bool;
}
