//! Bounded FIFO handoff between the intake path and the worker pool.
//!
//! Producers first [`reserve`](JobQueue::reserve) a slot and then
//! [`fill`](QueueSlot::fill) it; splitting the two lets the caller record
//! the job as received before any worker can observe it. All workers share
//! one receiver, so jobs are handed out strictly in arrival order.
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use arc_swap::ArcSwapOption;
use thiserror::Error;
use tokio::sync::{
    Mutex,
    mpsc::{self, OwnedPermit, error::TrySendError},
};

use crate::{config::OverflowPolicy, core::capture::CapturedJob};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QueueError {
    /// Queue is at capacity and the overflow policy refuses to wait
    #[error("Job queue is full ({capacity} jobs)")]
    Full { capacity: usize },

    /// Queue no longer accepts jobs
    #[error("Job queue is closed")]
    Closed,
}

/// Fixed-capacity job queue shared by intake and workers.
pub struct JobQueue {
    tx: ArcSwapOption<mpsc::Sender<CapturedJob>>,
    rx: Mutex<mpsc::Receiver<CapturedJob>>,
    depth: Arc<AtomicUsize>,
    capacity: usize,
    policy: OverflowPolicy,
}

/// A reserved place in the queue.
pub struct QueueSlot {
    permit: OwnedPermit<CapturedJob>,
    depth: Arc<AtomicUsize>,
}

impl QueueSlot {
    /// Place `job` in the reserved position.
    pub fn fill(self, job: CapturedJob) {
        self.depth.fetch_add(1, Ordering::Relaxed);
        self.permit.send(job);
    }
}

impl JobQueue {
    /// Create a queue holding at most `capacity` jobs.
    ///
    /// # Panics
    /// Panics if `capacity` is zero (validated away by configuration).
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx: ArcSwapOption::from_pointee(tx),
            rx: Mutex::new(rx),
            depth: Arc::new(AtomicUsize::new(0)),
            capacity,
            policy,
        }
    }

    /// Reserve room for one job according to the overflow policy.
    ///
    /// With [`OverflowPolicy::Block`] this waits until a slot frees up; with
    /// [`OverflowPolicy::Reject`] it fails immediately when the queue is full.
    pub async fn reserve(&self) -> Result<QueueSlot, QueueError> {
        let tx = self.tx.load_full().ok_or(QueueError::Closed)?;
        let tx = mpsc::Sender::clone(&tx);

        let permit = match self.policy {
            OverflowPolicy::Block => tx.reserve_owned().await.map_err(|_| QueueError::Closed)?,
            OverflowPolicy::Reject => tx.try_reserve_owned().map_err(|e| match e {
                TrySendError::Full(_) => QueueError::Full {
                    capacity: self.capacity,
                },
                TrySendError::Closed(_) => QueueError::Closed,
            })?,
        };

        Ok(QueueSlot {
            permit,
            depth: self.depth.clone(),
        })
    }

    /// Wait for the next job. Returns `None` once the queue is closed and
    /// every remaining job has been handed out.
    pub async fn dequeue(&self) -> Option<CapturedJob> {
        let job = self.rx.lock().await.recv().await;
        if job.is_some() {
            self.depth.fetch_sub(1, Ordering::Relaxed);
        }
        job
    }

    /// Stop accepting jobs. Jobs already queued are still handed out.
    ///
    /// Producers waiting in [`reserve`](Self::reserve) keep their own sender
    /// handle and may still land one job each.
    pub fn close(&self) {
        if self.tx.swap(None).is_some() {
            tracing::info!(
                "Job queue closed with {} job(s) waiting",
                self.depth()
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.load().is_none()
    }

    /// Number of jobs waiting for a worker.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
