//! `FixedPool` — default `CompletionScheduler` implementation.
//!
//! Spawns N OS threads at creation. Each worker owns one lock-free queue;
//! a job's `Lane` picks the queue, so jobs on one lane run on one worker in
//! the order they were scheduled.
//!
//! No dynamic scaling. Simple, predictable, safe.

use sockasync_core::error::{CoreError, CoreResult};
use sockasync_core::scheduler::{CompletionScheduler, Job, Lane};
use sockasync_core::{log_debug, log_error};

use crossbeam_queue::SegQueue;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Shared state between schedulers and workers.
struct PoolInner {
    /// One job queue per worker.
    queues: Vec<SegQueue<Job>>,
    /// Number of workers currently running a job.
    active: AtomicUsize,
    /// Workers exit once this is set and their queue is empty.
    shutdown: AtomicBool,
    /// Set after the workers have been joined. Jobs pushed later are run
    /// by whoever pushed them.
    stopped: AtomicBool,
    park_timeout: Duration,
}

pub struct FixedPool {
    inner: Arc<PoolInner>,
    threads: Vec<thread::Thread>,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl FixedPool {
    /// Create a pool with `n` workers (clamped to 1..=64).
    pub fn new(n: usize, park_timeout: Duration) -> CoreResult<Self> {
        let n = n.clamp(1, 64);
        let inner = Arc::new(PoolInner {
            queues: (0..n).map(|_| SegQueue::new()).collect(),
            active: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            park_timeout,
        });

        let mut handles = Vec::with_capacity(n);
        let mut threads = Vec::with_capacity(n);
        for worker_id in 0..n {
            let worker_inner = Arc::clone(&inner);
            let spawned = thread::Builder::new()
                .name(format!("sockasync-cb-{}", worker_id))
                .spawn(move || worker_loop(worker_inner, worker_id));
            match spawned {
                Ok(handle) => {
                    threads.push(handle.thread().clone());
                    handles.push(handle);
                }
                Err(e) => {
                    log_error!("completion worker {} spawn failed: {}", worker_id, e);
                    inner.shutdown.store(true, Ordering::SeqCst);
                    for t in &threads {
                        t.unpark();
                    }
                    for h in handles {
                        let _ = h.join();
                    }
                    return Err(CoreError::SpawnFailed);
                }
            }
        }

        log_debug!("completion pool started: {} workers", n);
        Ok(FixedPool {
            inner,
            threads,
            handles: Mutex::new(handles),
        })
    }

    /// Default pool sizing: min(8, nproc/2), at least 2.
    pub fn auto_sized(park_timeout: Duration) -> CoreResult<Self> {
        let cpus = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let n = (cpus / 2).max(2).min(8);
        Self::new(n, park_timeout)
    }

    pub fn active_workers(&self) -> usize {
        self.inner.active.load(Ordering::Relaxed)
    }

    pub fn total_workers(&self) -> usize {
        self.inner.queues.len()
    }

    fn drain_queue(&self, idx: usize) {
        while let Some(job) = self.inner.queues[idx].pop() {
            run_job(job);
        }
    }
}

impl CompletionScheduler for FixedPool {
    fn schedule(&self, lane: Lane, job: Job) {
        let idx = lane.bucket(self.inner.queues.len());
        self.inner.queues[idx].push(job);

        // Pool already joined: nobody else will pop this queue.
        if self.inner.stopped.load(Ordering::SeqCst) {
            self.drain_queue(idx);
            return;
        }
        self.threads[idx].unpark();
    }

    fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        for t in &self.threads {
            t.unpark();
        }

        let handles = match self.handles.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for h in handles {
            if h.join().is_err() {
                log_error!("completion worker exited abnormally");
            }
        }

        self.inner.stopped.store(true, Ordering::SeqCst);
        // Catch anything pushed between a worker's last pop and `stopped`.
        for idx in 0..self.inner.queues.len() {
            self.drain_queue(idx);
        }
        log_debug!("completion pool stopped");
    }
}

impl Drop for FixedPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Worker thread main loop.
fn worker_loop(inner: Arc<PoolInner>, worker_id: usize) {
    let queue = &inner.queues[worker_id];
    loop {
        match queue.pop() {
            Some(job) => {
                inner.active.fetch_add(1, Ordering::Relaxed);
                run_job(job);
                inner.active.fetch_sub(1, Ordering::Relaxed);
            }
            None => {
                if inner.shutdown.load(Ordering::SeqCst) {
                    if queue.is_empty() {
                        break;
                    }
                    continue;
                }
                thread::park_timeout(inner.park_timeout);
            }
        }
    }
}

/// Run one callback. A panicking callback is logged and does not take the
/// worker down with it.
fn run_job(job: Job) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "<non-string panic>".to_string());
        log_error!("completion callback panicked: {}", msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_same_lane_runs_in_order() {
        let pool = FixedPool::new(4, Duration::from_millis(1)).unwrap();
        let out = Arc::new(Mutex::new(Vec::new()));
        let lane = Lane::for_direction(9, 1);

        for i in 0..200 {
            let out = Arc::clone(&out);
            pool.schedule(lane, Box::new(move || out.lock().unwrap().push(i)));
        }
        pool.shutdown();

        let got = out.lock().unwrap().clone();
        assert_eq!(got, (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn test_shutdown_drains_all_lanes() {
        let pool = FixedPool::new(3, Duration::from_millis(5)).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        for fd in 0..50 {
            for dir in 0..3u8 {
                let count = Arc::clone(&count);
                pool.schedule(
                    Lane::for_direction(fd, dir),
                    Box::new(move || {
                        count.fetch_add(1, Ordering::SeqCst);
                    }),
                );
            }
        }
        pool.shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 150);
    }

    #[test]
    fn test_schedule_after_shutdown_still_runs() {
        let pool = FixedPool::new(2, Duration::from_millis(1)).unwrap();
        pool.shutdown();

        let (tx, rx) = mpsc::channel();
        pool.schedule(Lane(1), Box::new(move || tx.send(42).unwrap()));
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 42);
    }

    #[test]
    fn test_panicking_callback_keeps_worker_alive() {
        let pool = FixedPool::new(1, Duration::from_millis(1)).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.schedule(Lane(3), Box::new(|| panic!("boom")));
        pool.schedule(Lane(3), Box::new(move || tx.send(()).unwrap()));
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
        pool.shutdown();
    }

    #[test]
    fn test_sizes() {
        let pool = FixedPool::new(0, Duration::from_millis(1)).unwrap();
        assert_eq!(pool.total_workers(), 1);
        assert_eq!(pool.active_workers(), 0);

        let auto = FixedPool::auto_sized(Duration::from_millis(1)).unwrap();
        assert!((2..=8).contains(&auto.total_workers()));
    }
}
