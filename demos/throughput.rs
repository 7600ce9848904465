//! Throughput demo for tagqueue
//!
//! Pairs of writer and reader threads push a fixed number of values through a
//! mutex-guarded `VecDeque` and then through `ConcurrentQueue`, and print the time
//! each run took.
//!
//! ```text
//! cargo run --release --example throughput
//! RUST_LOG=tagqueue=debug cargo run --release --example throughput --features tracing
//! ```

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tagqueue::{ConcurrentQueue, MetricsCollector, QueueConfig};
use tracing_subscriber::EnvFilter;

const LOOP_TIMES: usize = 100_000;
const THREAD_PAIRS: usize = 2;

fn run_pairs<W, R>(writer: W, reader: R) -> Duration
where
    W: Fn() + Send + Sync + 'static,
    R: Fn() + Send + Sync + 'static,
{
    let writer = Arc::new(writer);
    let reader = Arc::new(reader);
    let start_time = Instant::now();

    let mut workers = Vec::with_capacity(THREAD_PAIRS * 2);
    for _ in 0..THREAD_PAIRS {
        let writer = Arc::clone(&writer);
        let reader = Arc::clone(&reader);
        workers.push(thread::spawn(move || writer()));
        workers.push(thread::spawn(move || reader()));
    }
    for worker in workers {
        worker.join().expect("worker thread panicked");
    }

    start_time.elapsed()
}

fn test_mutex() -> Duration {
    let queue = Arc::new(Mutex::new(VecDeque::new()));

    let writer = {
        let queue = Arc::clone(&queue);
        move || {
            for i in 0..LOOP_TIMES {
                queue.lock().push_back(i);
            }
        }
    };
    let reader = move || {
        for _ in 0..LOOP_TIMES {
            while queue.lock().pop_front().is_none() {}
        }
    };

    run_pairs(writer, reader)
}

fn test_cas(queue: Arc<ConcurrentQueue<usize>>) -> Duration {
    let writer = {
        let queue = Arc::clone(&queue);
        move || {
            for i in 0..LOOP_TIMES {
                queue.enqueue(i);
            }
        }
    };
    let reader = move || {
        for _ in 0..LOOP_TIMES {
            while queue.dequeue().is_none() {}
        }
    };

    run_pairs(writer, reader)
}

fn report(name: &str, elapsed: Duration) {
    let operations = (LOOP_TIMES * THREAD_PAIRS * 2) as f64;
    println!("  {:<12} {:>12?}  {:>14.2} ops/sec", name, elapsed, operations / elapsed.as_secs_f64());
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("tagqueue Throughput Demo");
    println!("========================");
    println!("Configuration:");
    println!("  Writer/reader pairs: {}", THREAD_PAIRS);
    println!("  Values per writer: {}", LOOP_TIMES);

    println!("\nResults:");
    report("testMutex", test_mutex());

    let queue = Arc::new(ConcurrentQueue::with_config(
        QueueConfig::new().reserve(4096).metrics(true),
    )?);
    report("testCAS", test_cas(Arc::clone(&queue)));

    let metrics = queue.metrics();
    println!("\nQueue Metrics:");
    println!("  Enqueues: {}", metrics.enqueues);
    println!("  Dequeues: {}", metrics.dequeues);
    println!("  Empty dequeues: {}", metrics.empty_dequeues);
    println!("  Tail fix-ups: {}", metrics.tail_fixups);
    println!("  Contention rate: {:.2}%", metrics.contention_rate());

    Ok(())
}
