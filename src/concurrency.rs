//! Bounded worker dispatch (spec §5 "Scheduling model").
//!
//! The spec names an exact back-pressure contract — a semaphore of
//! capacity `max_workers` that dispatch blocks on once exhausted — not
//! a general-purpose thread pool API, so this is a small hand-rolled
//! primitive rather than a `rayon`/`threadpool` dependency. `max_workers`
//! is `1` in low-resource mode, else `2 × cpu_count` (spec §5, mirrored
//! in [`crate::config::StoreConfig::worker_count`]).

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

struct Inner {
    available: Mutex<usize>,
    cond: Condvar,
}

/// A counting semaphore gating how many worker threads may run at once.
#[derive(Clone)]
pub struct Semaphore {
    inner: Arc<Inner>,
}

impl Semaphore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                available: Mutex::new(capacity.max(1)),
                cond: Condvar::new(),
            }),
        }
    }

    /// Block until a permit is available, then hold it until the
    /// returned guard drops.
    pub fn acquire(&self) -> SemaphoreGuard {
        let mut available = self.inner.available.lock().unwrap();
        while *available == 0 {
            available = self.inner.cond.wait(available).unwrap();
        }
        *available -= 1;
        SemaphoreGuard {
            inner: self.inner.clone(),
        }
    }
}

pub struct SemaphoreGuard {
    inner: Arc<Inner>,
}

impl Drop for SemaphoreGuard {
    fn drop(&mut self) {
        let mut available = self.inner.available.lock().unwrap();
        *available += 1;
        self.inner.cond.notify_one();
    }
}

/// Run `tasks` across at most `capacity` OS threads at a time, collecting
/// results in submission order. Used by ingest's chunk-write fan-out and
/// the optional parallel partition indexer (spec §4.7 steps 3-4).
pub fn run_bounded<T, F>(capacity: usize, tasks: Vec<F>) -> Vec<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let sem = Semaphore::new(capacity);
    let handles: Vec<JoinHandle<T>> = tasks
        .into_iter()
        .map(|task| {
            let sem = sem.clone();
            std::thread::spawn(move || {
                let _permit = sem.acquire();
                task()
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().expect("worker thread panicked")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn semaphore_limits_concurrent_holders() {
        let sem = Semaphore::new(2);
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let sem = sem.clone();
            let concurrent = concurrent.clone();
            let max_seen = max_seen.clone();
            handles.push(std::thread::spawn(move || {
                let _permit = sem.acquire();
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(5));
                concurrent.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn run_bounded_collects_all_results_in_order() {
        let tasks: Vec<Box<dyn FnOnce() -> usize + Send>> = (0..10usize)
            .map(|i| Box::new(move || i * i) as Box<dyn FnOnce() -> usize + Send>)
            .collect();
        let results = run_bounded(3, tasks);
        assert_eq!(results, (0..10).map(|i| i * i).collect::<Vec<_>>());
    }
}
