//! Background worker that drains the job queue.

use crate::store::JobStore;
use async_trait::async_trait;
use skein_core::error::JobError;
use skein_core::job::Job;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Error returned by a [`JobExecutor`].
pub type ExecutionError = Box<dyn std::error::Error + Send + Sync>;

/// Performs the work a job describes.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &Job) -> Result<(), ExecutionError>;
}

/// What happened to one dequeued job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    Completed(String),
    Cancelled { id: String, reason: String },
}

/// Counters reported when the worker stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub completed: usize,
    pub cancelled: usize,
    pub store_errors: usize,
}

/// Polls [`JobStore::dequeue`], runs each job, and records the result:
/// completed on success, cancelled on failure.
pub struct JobWorker {
    store: Arc<JobStore>,
    executor: Arc<dyn JobExecutor>,
    poll_interval: Duration,
}

impl JobWorker {
    pub fn new(store: Arc<JobStore>, executor: Arc<dyn JobExecutor>) -> Self {
        Self {
            store,
            executor,
            poll_interval: Duration::from_secs(5),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Take at most one job and run it.
    pub async fn run_once(&self) -> Result<Option<WorkOutcome>, JobError> {
        let Some(job) = self.store.dequeue().await? else {
            return Ok(None);
        };

        let outcome = match self.executor.execute(&job).await {
            Ok(()) => {
                self.store.complete(&job.id).await?;
                info!(job_id = %job.id, "Job completed");
                WorkOutcome::Completed(job.id)
            }
            Err(e) => {
                self.store.cancel(&job.id).await?;
                warn!(job_id = %job.id, error = %e, "Job failed; cancelled");
                WorkOutcome::Cancelled {
                    id: job.id,
                    reason: e.to_string(),
                }
            }
        };
        Ok(Some(outcome))
    }

    /// Run until `cancel` fires. An empty queue or a store error waits one
    /// poll interval before trying again.
    pub async fn run(self, cancel: CancellationToken) -> WorkerStats {
        let mut stats = WorkerStats::default();
        info!(interval_ms = self.poll_interval.as_millis() as u64, "Job worker started");

        while !cancel.is_cancelled() {
            match self.run_once().await {
                Ok(Some(WorkOutcome::Completed(_))) => {
                    stats.completed += 1;
                    continue;
                }
                Ok(Some(WorkOutcome::Cancelled { .. })) => {
                    stats.cancelled += 1;
                    continue;
                }
                Ok(None) => debug!("Job queue empty"),
                Err(e) => {
                    stats.store_errors += 1;
                    warn!(error = %e, "Job store error in worker");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!(?stats, "Job worker stopped");
        stats
    }
}
