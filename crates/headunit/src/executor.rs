//! Async I/O executor pool
//!
//! A fixed-size multi-threaded tokio runtime shared by every asynchronous
//! operation: timers, socket I/O, USB transfer pumps and negotiations. It is
//! built once in `main`, handed around by [`Handle`], and shut down
//! explicitly.
//!
//! Tasks are not pinned to workers and two tasks posted concurrently may run
//! in either order; callers that need ordering serialize through a single
//! owner task.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, info};

/// Thread start/stop counters for the pool
#[derive(Debug, Default)]
pub struct PoolStats {
    started: AtomicUsize,
    stopped: AtomicUsize,
}

impl PoolStats {
    /// Threads started so far, workers and blocking threads alike
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Threads that have exited
    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Threads currently alive
    pub fn alive(&self) -> usize {
        self.started().saturating_sub(self.stopped())
    }
}

/// Fixed pool of executor workers
pub struct IoExecutorPool {
    runtime: Runtime,
    workers: usize,
    stats: Arc<PoolStats>,
}

impl IoExecutorPool {
    /// Build the pool with `workers` executor threads
    pub fn new(workers: usize) -> io::Result<Self> {
        let workers = workers.max(1);
        let stats = Arc::new(PoolStats::default());

        let on_start = stats.clone();
        let on_stop = stats.clone();
        let runtime = Builder::new_multi_thread()
            .worker_threads(workers)
            .thread_name("io-worker")
            .enable_all()
            .on_thread_start(move || {
                on_start.started.fetch_add(1, Ordering::SeqCst);
            })
            .on_thread_stop(move || {
                on_stop.stopped.fetch_add(1, Ordering::SeqCst);
            })
            .build()?;

        info!("I/O executor pool started with {} workers", workers);
        Ok(Self {
            runtime,
            workers,
            stats,
        })
    }

    /// Handle used to post work onto the pool
    pub fn handle(&self) -> &Handle {
        self.runtime.handle()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn stats(&self) -> Arc<PoolStats> {
        self.stats.clone()
    }

    /// Stop accepting work and join every pool thread
    ///
    /// Tasks still pending are dropped. Blocking tasks get up to `timeout`
    /// to return.
    pub fn shutdown(self, timeout: Duration) -> Arc<PoolStats> {
        let stats = self.stats;
        debug!("Shutting down I/O executor pool");
        self.runtime.shutdown_timeout(timeout);
        info!(
            "I/O executor pool stopped ({} of {} threads joined)",
            stats.stopped(),
            stats.started()
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::thread::ThreadId;

    #[test]
    fn test_tasks_run_on_pool_threads() {
        let pool = IoExecutorPool::new(4).unwrap();
        let seen = Arc::new(Mutex::new(Vec::<ThreadId>::new()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let seen = seen.clone();
                pool.handle().spawn(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    seen.lock().unwrap().push(std::thread::current().id());
                })
            })
            .collect();

        pool.handle().block_on(async {
            for handle in handles {
                handle.await.unwrap();
            }
        });

        assert_eq!(seen.lock().unwrap().len(), 16);
        assert!(!seen.lock().unwrap().contains(&std::thread::current().id()));
        pool.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_shutdown_joins_every_thread() {
        let pool = IoExecutorPool::new(4).unwrap();
        assert_eq!(pool.workers(), 4);

        // Force a blocking thread into existence as well
        pool.handle()
            .block_on(pool.handle().spawn_blocking(|| 7))
            .unwrap();

        let stats = pool.shutdown(Duration::from_secs(5));
        assert!(stats.started() >= 5);
        assert_eq!(stats.started(), stats.stopped());
        assert_eq!(stats.alive(), 0);
    }

    #[test]
    fn test_zero_workers_clamped() {
        let pool = IoExecutorPool::new(0).unwrap();
        assert_eq!(pool.workers(), 1);
        pool.shutdown(Duration::from_secs(1));
    }
}
