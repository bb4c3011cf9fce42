//! Fixed-size worker pool draining one shared FIFO job queue
//!
//! Every network-facing role (coordinator client and registration listeners,
//! replica listener) hands each accepted connection to a `WorkerPool` so its
//! accept loop never blocks on request handling.
//!
//! Workers are long-lived tokio tasks. The queue is a single mutex-guarded
//! `VecDeque` paired with a `Notify`; `submit` appends and wakes one waiter.
//! A worker runs exactly one job at a time, inside its own task, so a job that
//! panics is reported and the worker keeps serving.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// An opaque unit of work.
pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct JobQueue {
    jobs: Mutex<VecDeque<Job>>,
    not_empty: Notify,
}

impl JobQueue {
    fn push(&self, job: Job) {
        self.jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(job);
        self.not_empty.notify_one();
    }

    fn try_pop(&self) -> Option<Job> {
        self.jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
    }

    /// Block until a job is available and dequeue it.
    async fn pop(&self) -> Job {
        loop {
            if let Some(job) = self.try_pop() {
                return job;
            }
            // A notify_one with no waiter leaves a permit, so a push between
            // the check above and this await is not lost.
            self.not_empty.notified().await;
        }
    }

    fn len(&self) -> usize {
        self.jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

pub struct WorkerPool {
    name: String,
    queue: Arc<JobQueue>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `size` workers. Must be called from within a tokio runtime.
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        let name = name.into();
        assert!(size > 0, "worker pool {} needs at least one worker", name);

        let queue = Arc::new(JobQueue {
            jobs: Mutex::new(VecDeque::new()),
            not_empty: Notify::new(),
        });

        let workers = (0..size)
            .map(|worker| {
                let queue = queue.clone();
                let name = name.clone();
                tokio::spawn(async move { run_worker(name, worker, queue).await })
            })
            .collect();

        tracing::debug!("Worker pool {} started with {} workers", name, size);
        Self {
            name,
            queue,
            workers,
        }
    }

    /// Enqueue a job; it runs as soon as a worker is free.
    pub fn submit<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.queue.push(Box::pin(job));
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

async fn run_worker(pool: String, worker: usize, queue: Arc<JobQueue>) {
    loop {
        let job = queue.pop().await;
        if let Err(e) = tokio::spawn(job).await {
            if e.is_panic() {
                tracing::error!("Job panicked in pool {} worker {}", pool, worker);
            } else {
                tracing::warn!("Job cancelled in pool {} worker {}: {}", pool, worker, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_runs_all_jobs() {
        let pool = WorkerPool::new("test", 4);
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();

        for _ in 0..50 {
            let counter = counter.clone();
            let tx = tx.clone();
            pool.submit(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tx.send(()).unwrap();
            });
        }
        for _ in 0..50 {
            rx.recv().await.unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 50);
        assert_eq!(pool.size(), 4);
    }

    #[tokio::test]
    async fn test_single_worker_is_fifo() {
        let pool = WorkerPool::new("fifo", 1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        for i in 0..10 {
            let tx = tx.clone();
            pool.submit(async move {
                tx.send(i).unwrap();
            });
        }
        let mut seen = Vec::new();
        for _ in 0..10 {
            seen.push(rx.recv().await.unwrap());
        }
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_worker_survives_panic() {
        let pool = WorkerPool::new("panicky", 1);
        let (tx, mut rx) = mpsc::unbounded_channel();

        pool.submit(async {
            panic!("job blew up");
        });
        pool.submit(async move {
            tx.send("still alive").unwrap();
        });

        let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert_eq!(msg, Some("still alive"));
    }

    #[tokio::test]
    async fn test_bounded_concurrency() {
        let pool = WorkerPool::new("bounded", 2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();

        for _ in 0..8 {
            let running = running.clone();
            let peak = peak.clone();
            let tx = tx.clone();
            pool.submit(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                tx.send(()).unwrap();
            });
        }
        for _ in 0..8 {
            rx.recv().await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
