use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Concurrent matching jobs allowed system-wide, independent of how many
/// ingestion or manual match requests arrive.
pub const MATCH_CONCURRENCY: usize = 2;

/// Log the queue depth whenever it crosses a multiple of this.
const DEPTH_LOG_STEP: usize = 10;

/// Admission control for enrichment work.
///
/// Unbounded FIFO of pending jobs, at most `concurrency` running at once; a
/// finished job's permit admits the next waiter immediately. No priority,
/// no cancellation, no deduplication by release; cooldown checks belong to
/// callers, before enqueueing. Pending jobs are in-memory only and dropped
/// on process exit.
#[derive(Clone)]
pub struct JobQueue {
    permits: Arc<Semaphore>,
    waiting: Arc<AtomicUsize>,
}

impl JobQueue {
    pub fn new(concurrency: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(concurrency)),
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Submit a job. The returned handle resolves to the job's output once a
    /// permit frees up and the job runs to completion. Depth crossing a
    /// round multiple is logged for observability, never used for control.
    pub fn enqueue<F>(&self, job: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let waiting = Arc::clone(&self.waiting);

        let depth = waiting.fetch_add(1, Ordering::SeqCst) + 1;
        if depth % DEPTH_LOG_STEP == 0 {
            tracing::warn!(depth, "match queue backlog");
        }

        tokio::spawn(async move {
            // acquire only errors if the semaphore is closed; this one never is
            let _permit = permits.acquire_owned().await.ok();
            waiting.fetch_sub(1, Ordering::SeqCst);
            job.await
        })
    }

    /// Jobs admitted but still waiting on a permit. A job leaves the count
    /// when it starts running.
    pub fn depth(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}
