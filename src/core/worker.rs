//! Dispatch worker: one of N identical loops draining the job queue.
//!
//! Each worker alternates between [`WorkerState::Idle`] (waiting on the queue)
//! and [`WorkerState::Delivering`] (rewriting and forwarding one job). It ends
//! in [`WorkerState::Stopped`] once the queue is closed and drained, or in
//! [`WorkerState::Halted`] when a transport failure occurs under
//! [`FailurePolicy::Halt`]. The current state is published through a shared
//! [`WorkerStatus`] cell so the health surface can report it.
use std::sync::{
    Arc,
    atomic::{AtomicU8, Ordering},
};

use hyper::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tracing::Instrument;

use crate::{
    config::FailurePolicy,
    core::{
        capture::CapturedJob,
        queue::JobQueue,
        rewrite::{RewriteError, build_outbound},
        stats::StatsRegister,
    },
    ports::http_client::{HttpClient, HttpClientError, destination_of},
    tracing_setup,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum WorkerState {
    /// Waiting for a job
    Idle = 0,
    /// Forwarding a job
    Delivering = 1,
    /// Stopped after a delivery failure; never claims another job
    Halted = 2,
    /// Queue closed and drained
    Stopped = 3,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Idle,
            1 => WorkerState::Delivering,
            2 => WorkerState::Halted,
            _ => WorkerState::Stopped,
        }
    }
}

/// Shared, lock-free view of a worker's current state.
#[derive(Debug)]
pub struct WorkerStatus(AtomicU8);

impl WorkerStatus {
    pub fn new() -> Self {
        Self(AtomicU8::new(WorkerState::Idle as u8))
    }

    pub fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: WorkerState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

impl Default for WorkerStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a single delivery did not produce a response.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Cannot rebuild outbound request: {0}")]
    Rewrite(#[from] RewriteError),

    #[error("Delivery failed: {0}")]
    Transport(#[from] HttpClientError),
}

pub struct DispatchWorker {
    id: usize,
    queue: Arc<JobQueue>,
    client: Arc<dyn HttpClient>,
    stats: Arc<StatsRegister>,
    on_failure: FailurePolicy,
    status: Arc<WorkerStatus>,
}

impl DispatchWorker {
    pub fn new(
        id: usize,
        queue: Arc<JobQueue>,
        client: Arc<dyn HttpClient>,
        stats: Arc<StatsRegister>,
        on_failure: FailurePolicy,
    ) -> Self {
        Self {
            id,
            queue,
            client,
            stats,
            on_failure,
            status: Arc::new(WorkerStatus::new()),
        }
    }

    /// Handle to this worker's state cell.
    pub fn status(&self) -> Arc<WorkerStatus> {
        self.status.clone()
    }

    /// Run until the queue closes or the worker halts; returns the final state.
    pub async fn run(self) -> WorkerState {
        let span = tracing_setup::worker_span(self.id);
        self.run_loop().instrument(span).await
    }

    async fn run_loop(&self) -> WorkerState {
        tracing::info!("Ready to work ...");

        loop {
            self.status.set(WorkerState::Idle);

            let Some(job) = self.queue.dequeue().await else {
                tracing::info!("Job queue closed and drained, worker stopping");
                self.status.set(WorkerState::Stopped);
                return WorkerState::Stopped;
            };

            self.status.set(WorkerState::Delivering);

            match self.deliver(job).await {
                Ok(status) => {
                    self.stats.record_completed();
                    if status.is_success() {
                        tracing::info!(http.status_code = status.as_u16(), "Fetched");
                    } else {
                        tracing::warn!(http.status_code = status.as_u16(), "Fetched with non-success status");
                    }
                }
                Err(e) => {
                    self.stats.record_failed();

                    if self.next_state_after(&e) == WorkerState::Halted {
                        tracing::error!("{e}. Worker halted and will not take further jobs");
                        self.status.set(WorkerState::Halted);
                        return WorkerState::Halted;
                    }
                    tracing::warn!("{e}");
                }
            }
        }
    }

    /// Malformed jobs never halt a worker; transport failures do under `Halt`.
    fn next_state_after(&self, error: &DeliveryError) -> WorkerState {
        match (error, self.on_failure) {
            (DeliveryError::Transport(_), FailurePolicy::Halt) => WorkerState::Halted,
            _ => WorkerState::Idle,
        }
    }

    async fn deliver(&self, job: CapturedJob) -> Result<StatusCode, DeliveryError> {
        let request = build_outbound(&job)?;
        drop(job);

        let span = tracing_setup::delivery_span(
            &destination_of(&request),
            request.method().as_str(),
            request.uri().path(),
        );

        async {
            tracing::info!("Fetching");
            let response = self.client.send_request(request).await?;
            let status = response.status();
            tracing::Span::current().record("http.status_code", status.as_u16());
            Ok(status)
        }
        .instrument(span)
        .await
    }
}
