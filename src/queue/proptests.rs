//! Property-based tests for the concurrent queue using proptest
//!
//! Single-threaded properties compare the queue against a `VecDeque` model;
//! concurrent properties check that nothing is lost or duplicated.

use crate::queue::{ConcurrentQueue, QueueConfig};
use proptest::prelude::*;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

#[derive(Debug, Clone)]
enum Op {
    Enqueue(i32),
    Dequeue,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        7 => any::<i32>().prop_map(Op::Enqueue),
        3 => Just(Op::Dequeue),
    ]
}

/// Property: the queue behaves like a `VecDeque` used as a FIFO
mod model_properties {
    use super::*;

    proptest! {
        #[test]
        fn test_matches_vecdeque_model(
            ops in prop::collection::vec(op_strategy(), 1..300),
            reserve in 0usize..128
        ) {
            let queue = ConcurrentQueue::with_config(QueueConfig::new().reserve(reserve)).unwrap();
            let mut model = VecDeque::new();

            for op in ops {
                match op {
                    Op::Enqueue(value) => {
                        queue.enqueue(value);
                        model.push_back(value);
                    }
                    Op::Dequeue => {
                        prop_assert_eq!(queue.dequeue(), model.pop_front());
                    }
                }
                // Exact with a single thread
                prop_assert_eq!(queue.len(), model.len());
                prop_assert_eq!(queue.is_empty(), model.is_empty());
            }

            while let Some(expected) = model.pop_front() {
                prop_assert_eq!(queue.dequeue(), Some(expected));
            }
            prop_assert_eq!(queue.dequeue(), None);
        }

        #[test]
        fn test_fifo_ordering_in_batches(
            batches in prop::collection::vec(
                prop::collection::vec(any::<u64>(), 0..20),
                1..10
            )
        ) {
            let queue = ConcurrentQueue::new();
            let mut expected = Vec::new();

            // Interleave full batches with a partial drain
            for batch in &batches {
                for &value in batch {
                    queue.enqueue(value);
                    expected.push(value);
                }
                let drain = batch.len() / 2;
                for value in expected.drain(..drain.min(expected.len())) {
                    prop_assert_eq!(queue.dequeue(), Some(value));
                }
            }

            for value in expected {
                prop_assert_eq!(queue.dequeue(), Some(value));
            }
            prop_assert!(queue.is_empty());
        }

        #[test]
        fn test_no_memory_leaks(
            values in prop::collection::vec(any::<i32>(), 1..100),
            dequeues in 0usize..100
        ) {
            #[derive(Debug)]
            struct DropTracker {
                drops: Arc<AtomicUsize>,
            }

            impl Drop for DropTracker {
                fn drop(&mut self) {
                    self.drops.fetch_add(1, Ordering::Relaxed);
                }
            }

            let drops = Arc::new(AtomicUsize::new(0));
            let queue = ConcurrentQueue::new();
            for _ in &values {
                queue.enqueue(DropTracker { drops: Arc::clone(&drops) });
            }

            let taken = dequeues.min(values.len());
            for _ in 0..taken {
                prop_assert!(queue.dequeue().is_some());
            }
            prop_assert_eq!(drops.load(Ordering::Relaxed), taken);

            // Each value is dropped exactly once, whether dequeued or left queued
            drop(queue);
            prop_assert_eq!(drops.load(Ordering::Relaxed), values.len());
        }

        #[test]
        fn test_empty_queue_operations(attempts in 0usize..20) {
            let queue: ConcurrentQueue<i32> = ConcurrentQueue::new();
            for _ in 0..attempts {
                prop_assert_eq!(queue.dequeue(), None);
            }
            prop_assert!(queue.is_empty());
            prop_assert_eq!(queue.len(), 0);
        }

        #[test]
        fn test_fill_and_drain_rounds(
            batch in 1usize..64,
            rounds in 1usize..20
        ) {
            let queue = ConcurrentQueue::new();
            for round in 0..rounds {
                for i in 0..batch {
                    queue.enqueue(round * batch + i);
                }
                prop_assert_eq!(queue.len(), batch);
                for i in 0..batch {
                    prop_assert_eq!(queue.dequeue(), Some(round * batch + i));
                }
                prop_assert!(queue.is_empty());
            }
        }
    }
}

/// Property: concurrent operations lose and duplicate nothing
mod concurrent_properties {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn test_concurrent_queue(
            num_producers in 1usize..5,
            num_consumers in 1usize..5,
            operations_per_thread in 10usize..200
        ) {
            let queue = Arc::new(ConcurrentQueue::<usize>::new());
            let total = num_producers * operations_per_thread;
            let received = Arc::new(AtomicUsize::new(0));

            let producers: Vec<_> = (0..num_producers)
                .map(|thread_id| {
                    let queue = Arc::clone(&queue);
                    thread::spawn(move || {
                        for i in 0..operations_per_thread {
                            queue.enqueue(thread_id * operations_per_thread + i);
                        }
                    })
                })
                .collect();

            let consumers: Vec<_> = (0..num_consumers)
                .map(|_| {
                    let queue = Arc::clone(&queue);
                    let received = Arc::clone(&received);
                    thread::spawn(move || {
                        let mut taken = Vec::new();
                        while received.load(Ordering::Relaxed) < total {
                            if let Some(value) = queue.dequeue() {
                                received.fetch_add(1, Ordering::Relaxed);
                                taken.push(value);
                            } else {
                                thread::yield_now();
                            }
                        }
                        taken
                    })
                })
                .collect();

            for handle in producers {
                handle.join().unwrap();
            }
            let mut all_received = Vec::new();
            for handle in consumers {
                all_received.extend(handle.join().unwrap());
            }

            prop_assert_eq!(all_received.len(), total);

            // Verify all values are unique and in range
            let mut sorted = all_received.clone();
            sorted.sort_unstable();
            sorted.dedup();
            prop_assert_eq!(sorted.len(), total);
            prop_assert!(sorted.iter().all(|&value| value < total));
            prop_assert_eq!(queue.dequeue(), None);
        }
    }
}
