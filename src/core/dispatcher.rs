//! Dispatcher: owns the job queue and the fixed worker pool.
//!
//! Intake submits captured jobs here; the dispatcher counts them, hands them
//! to the queue under the configured overflow policy, and reports pool and
//! queue state for the stats and health endpoints. Shutdown closes the queue
//! and waits for the workers to drain it.
use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tokio::{sync::Mutex, task::JoinHandle};

use crate::{
    config::DispatchConfig,
    core::{
        capture::CapturedJob,
        queue::{JobQueue, QueueError},
        stats::{StatsRegister, StatsSnapshot},
        worker::{DispatchWorker, WorkerState, WorkerStatus},
    },
    ports::http_client::HttpClient,
};

/// Per-state worker counts for the health endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolSummary {
    pub total: usize,
    pub idle: usize,
    pub delivering: usize,
    pub halted: usize,
    pub stopped: usize,
}

impl PoolSummary {
    /// Workers still able to claim jobs.
    pub fn live(&self) -> usize {
        self.idle + self.delivering
    }
}

/// Owns the job queue and the worker pool.
///
/// Intake hands captured jobs to [`Dispatcher::submit`]; the pool drains them
/// concurrently. Counters are shared with the caller through [`StatsRegister`].
pub struct Dispatcher {
    queue: Arc<JobQueue>,
    stats: Arc<StatsRegister>,
    workers: Vec<Arc<WorkerStatus>>,
    tasks: Mutex<Vec<JoinHandle<WorkerState>>>,
}

impl Dispatcher {
    /// Create the queue and spawn `config.workers` workers onto the current runtime.
    pub fn start(
        config: &DispatchConfig,
        client: Arc<dyn HttpClient>,
        stats: Arc<StatsRegister>,
    ) -> Self {
        let queue = Arc::new(JobQueue::new(config.queue_capacity, config.overflow));

        let mut workers = Vec::with_capacity(config.workers);
        let mut tasks = Vec::with_capacity(config.workers);

        for id in 1..=config.workers {
            let worker = DispatchWorker::new(
                id,
                queue.clone(),
                client.clone(),
                stats.clone(),
                config.on_failure,
            );
            workers.push(worker.status());
            tasks.push(tokio::spawn(worker.run()));
        }

        tracing::info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            overflow = ?config.overflow,
            on_failure = ?config.on_failure,
            "Dispatcher started"
        );

        Self {
            queue,
            stats,
            workers,
            tasks: Mutex::new(tasks),
        }
    }

    /// Enqueue a job, counting it as received before any worker can see it.
    ///
    /// Under the blocking overflow policy this waits for queue space; under the
    /// rejecting policy a full queue returns [`QueueError::Full`] and the job is
    /// counted as rejected instead.
    pub async fn submit(&self, job: CapturedJob) -> Result<(), QueueError> {
        match self.queue.reserve().await {
            Ok(slot) => {
                self.stats.record_received();
                slot.fill(job);
                Ok(())
            }
            Err(e @ QueueError::Full { .. }) => {
                self.stats.record_rejected();
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.workers.iter().map(|w| w.get()).collect()
    }

    pub fn pool_summary(&self) -> PoolSummary {
        self.worker_states()
            .into_iter()
            .fold(PoolSummary { total: self.workers.len(), ..Default::default() }, |mut acc, state| {
                match state {
                    WorkerState::Idle => acc.idle += 1,
                    WorkerState::Delivering => acc.delivering += 1,
                    WorkerState::Halted => acc.halted += 1,
                    WorkerState::Stopped => acc.stopped += 1,
                }
                acc
            })
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn is_accepting(&self) -> bool {
        !self.queue.is_closed()
    }

    /// Stop accepting jobs and wait up to `drain_timeout` for workers to finish.
    ///
    /// Returns `true` when every worker exited in time. Workers still running
    /// after the timeout are left detached.
    pub async fn shutdown(&self, drain_timeout: Duration) -> bool {
        self.queue.close();

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        if tasks.is_empty() {
            return true;
        }

        tracing::info!(
            queued = self.queue.depth(),
            "Draining job queue (timeout {:?})",
            drain_timeout
        );

        match tokio::time::timeout(drain_timeout, futures_util::future::join_all(tasks)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        tracing::error!("Worker task failed: {}", e);
                    }
                }
                tracing::info!("Final stats: {}", self.stats.snapshot());
                true
            }
            Err(_) => {
                tracing::warn!(
                    queued = self.queue.depth(),
                    "Drain timeout elapsed, abandoning remaining jobs. Final stats: {}",
                    self.stats.snapshot()
                );
                false
            }
        }
    }
}
