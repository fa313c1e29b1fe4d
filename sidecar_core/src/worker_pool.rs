//! Bounded worker pool for blocking inference calls (spec.md §5: "a
//! fixed-size worker pool for blocking inference calls" off the cooperative
//! scheduler; §9: "the source pattern...maps to: one cooperative scheduler
//! for wire and orchestration, a **bounded** worker pool for blocking
//! inference").
//!
//! `tokio::task::spawn_blocking` alone is not enough: its own thread pool
//! grows effectively unbounded, which would let as many ONNX `Session::run`
//! calls execute concurrently as there are in-flight requests - exactly the
//! unbounded-VRAM failure mode spec.md §4.2/§5 calls out ("each in-flight
//! inference holds VRAM proportional to its batch"). `WorkerPool` wraps
//! `spawn_blocking` with a semaphore capping concurrent blocking calls to
//! `workers`, plus a queue-depth limit on how many additional callers may
//! wait for a permit before new callers are rejected outright - the two
//! numbers CTranslate2 names as `inter_threads`/`max_queued_batches` in
//! `ctranslate2_engine.py::load_model`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;

/// Matches `inter_threads=4` in the original engine's translator config.
pub const DEFAULT_WORKERS: usize = 4;
/// Matches `max_queued_batches=2`.
pub const DEFAULT_QUEUE_DEPTH: usize = 2;

#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    #[error("worker pool saturated: {waiting} callers already queued (max {max})")]
    Saturated { waiting: usize, max: usize },
    #[error("blocking task panicked: {0}")]
    Panicked(String),
}

/// A handle to a bounded pool of blocking-inference slots. Cheap to clone;
/// every clone shares the same semaphore and queue-depth counter.
#[derive(Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    waiting: Arc<AtomicUsize>,
    max_queued: usize,
}

impl WorkerPool {
    /// `workers` bounds concurrent blocking calls; `max_queued` bounds how
    /// many additional callers may wait for a free worker once all
    /// `workers` are busy before a new caller is turned away with
    /// `WorkerPoolError::Saturated`.
    pub fn new(workers: usize, max_queued: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(workers.max(1))),
            waiting: Arc::new(AtomicUsize::new(0)),
            max_queued,
        }
    }

    /// Run `f` on the blocking thread pool, holding one of this pool's
    /// permits for the duration. Rejects immediately (without ever calling
    /// `f`) if the pool is already saturated, rather than growing an
    /// unbounded queue of waiters - the backpressure contract of spec.md §5.
    pub async fn run_blocking<F, T>(&self, f: F) -> Result<T, WorkerPoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.semaphore.available_permits() == 0 {
            let waiting = self.waiting.fetch_add(1, Ordering::SeqCst) + 1;
            if waiting > self.max_queued {
                self.waiting.fetch_sub(1, Ordering::SeqCst);
                return Err(WorkerPoolError::Saturated { waiting: waiting - 1, max: self.max_queued });
            }
            let permit = self.semaphore.clone().acquire_owned().await;
            self.waiting.fetch_sub(1, Ordering::SeqCst);
            let permit = permit.expect("worker pool semaphore never closed");
            let result = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                f()
            })
            .await;
            return result.map_err(|e| WorkerPoolError::Panicked(e.to_string()));
        }

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("worker pool semaphore never closed");
        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f()
        })
        .await;
        result.map_err(|e| WorkerPoolError::Panicked(e.to_string()))
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS, DEFAULT_QUEUE_DEPTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn runs_blocking_closure_and_returns_result() {
        let pool = WorkerPool::new(2, 2);
        let result = pool.run_blocking(|| 2 + 2).await.unwrap();
        assert_eq!(result, 4);
    }

    #[tokio::test]
    async fn bounds_concurrency_to_worker_count() {
        let pool = WorkerPool::new(1, 4);
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let pool = pool.clone();
            let active = active.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                pool.run_blocking(move || {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    active.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejects_once_queue_depth_exceeded() {
        let pool = WorkerPool::new(1, 1);
        let blocker = pool.clone();
        let blocking_task = tokio::spawn(async move {
            blocker
                .run_blocking(|| std::thread::sleep(Duration::from_millis(100)))
                .await
        });
        // Give the first call time to take the only permit.
        tokio::time::sleep(Duration::from_millis(10)).await;

        let waiter = pool.clone();
        let waiting_task = tokio::spawn(async move { waiter.run_blocking(|| ()).await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let rejected = pool.run_blocking(|| ()).await;
        assert!(matches!(rejected, Err(WorkerPoolError::Saturated { .. })));

        blocking_task.await.unwrap().unwrap();
        waiting_task.await.unwrap().unwrap();
    }
}
