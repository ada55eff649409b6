//! The job store: a write-through cache over a [`JobBackend`].
//!
//! Reads are served from the cache. Every mutation goes to the backend first
//! and touches the cache only once the backend has accepted it, so a backend
//! outage leaves the cache stale but never ahead of durable state.
//! Mutations on the same id are serialized by a per-id async mutex.

use chrono::{DateTime, SubsecRound, Utc};
use skein_core::error::JobError;
use skein_core::event::{DomainEvent, EventBus};
use skein_core::job::{
    Job, JobBackend, JobFilter, JobStatus, JobUpdate, NewJob, PruneCriteria, PruneReport,
    PruneRequest,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub struct JobStore {
    backend: Arc<dyn JobBackend>,
    cache: RwLock<HashMap<String, Job>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    events: Option<Arc<EventBus>>,
}

impl std::fmt::Debug for JobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStore")
            .field("backend", &self.backend.name())
            .finish_non_exhaustive()
    }
}

/// Current time at the precision the durable backends keep.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

impl JobStore {
    /// Open a store, rebuilding the cache from the backend.
    pub async fn open(backend: Arc<dyn JobBackend>) -> Result<Self, JobError> {
        let jobs = backend.list_all().await?;
        info!(backend = backend.name(), jobs = jobs.len(), "Job store opened");
        let cache = jobs.into_iter().map(|j| (j.id.clone(), j)).collect();
        Ok(Self {
            backend,
            cache: RwLock::new(cache),
            locks: Mutex::new(HashMap::new()),
            events: None,
        })
    }

    /// Publish a `JobTransitioned` event on every status change.
    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    fn lock_for(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(id.to_string()).or_default().clone()
    }

    fn forget_lock(&self, id: &str) {
        self.locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }

    fn publish(&self, job: &Job) {
        if let Some(bus) = &self.events {
            bus.publish(DomainEvent::JobTransitioned {
                job_id: job.id.clone(),
                status: job.status.to_string(),
                timestamp: job.updated_at,
            });
        }
    }

    pub async fn create(&self, new: NewJob) -> Result<Job, JobError> {
        new.validate()?;
        let job = Job::new(new, now());
        let lock = self.lock_for(&job.id);
        let _guard = lock.lock().await;

        self.backend.insert(&job).await?;
        self.cache.write().await.insert(job.id.clone(), job.clone());
        debug!(job_id = %job.id, priority = job.priority, "Job created");
        self.publish(&job);
        Ok(job)
    }

    pub async fn get(&self, id: &str) -> Option<Job> {
        self.cache.read().await.get(id).cloned()
    }

    /// Apply a partial update. Terminal jobs reject status changes.
    ///
    /// The backend write is conditional on the status the update was
    /// computed from. A claim can move a row out from under the cache, in
    /// which case the update is recomputed against the stored row.
    pub async fn update(&self, id: &str, update: JobUpdate) -> Result<Job, JobError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut current = self
            .get(id)
            .await
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;
        loop {
            let mut job = current.clone();
            job.apply(&update, now())?;

            if self.backend.replace(&job, current.status).await? {
                self.cache.write().await.insert(job.id.clone(), job.clone());
                if job.status != current.status {
                    debug!(job_id = %id, from = %current.status, to = %job.status, "Job transitioned");
                    self.publish(&job);
                }
                return Ok(job);
            }

            match self.backend.get(id).await? {
                None => {
                    // Removed behind our back; drop the stale entry.
                    self.cache.write().await.remove(id);
                    return Err(JobError::NotFound(id.to_string()));
                }
                Some(stored) if stored.status != current.status => {
                    debug!(job_id = %id, cached = %current.status, stored = %stored.status, "Job moved under update");
                    self.cache.write().await.insert(stored.id.clone(), stored.clone());
                    current = stored;
                }
                Some(_) => return Err(JobError::Conflict(id.to_string())),
            }
        }
    }

    pub async fn delete(&self, id: &str) -> Result<(), JobError> {
        let lock = self.lock_for(id);
        let guard = lock.lock().await;

        let existed = self.backend.delete(id).await?;
        self.cache.write().await.remove(id);
        drop(guard);
        self.forget_lock(id);

        if existed {
            debug!(job_id = %id, "Job deleted");
            Ok(())
        } else {
            Err(JobError::NotFound(id.to_string()))
        }
    }

    /// Jobs matching `filter`, highest priority first, then oldest.
    pub async fn list(&self, filter: &JobFilter) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .cache
            .read()
            .await
            .values()
            .filter(|j| filter.matches(j))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        if let Some(limit) = filter.limit {
            jobs.truncate(limit);
        }
        jobs
    }

    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }

    /// Claim the next pending job and mark it in progress.
    ///
    /// The claim happens in the backend before the id's lock is held, so the
    /// row is re-read under the lock. A job that was cancelled or completed
    /// in between is not handed out.
    pub async fn dequeue(&self) -> Result<Option<Job>, JobError> {
        while let Some(claimed) = self.backend.claim_next(now()).await? {
            let lock = self.lock_for(&claimed.id);
            let _guard = lock.lock().await;

            match self.backend.get(&claimed.id).await? {
                Some(job) if job.status == JobStatus::InProgress => {
                    self.cache.write().await.insert(job.id.clone(), job.clone());
                    info!(job_id = %job.id, title = %job.title, "Job dequeued");
                    self.publish(&job);
                    return Ok(Some(job));
                }
                Some(job) => {
                    debug!(job_id = %job.id, status = %job.status, "Claimed job changed before hand-off");
                    self.cache.write().await.insert(job.id.clone(), job);
                }
                None => {
                    self.cache.write().await.remove(&claimed.id);
                }
            }
        }
        Ok(None)
    }

    pub async fn complete(&self, id: &str) -> Result<Job, JobError> {
        self.update(id, JobUpdate::status(JobStatus::Completed)).await
    }

    pub async fn cancel(&self, id: &str) -> Result<Job, JobError> {
        self.update(id, JobUpdate::status(JobStatus::Cancelled)).await
    }

    /// Remove (or, on a dry run, count) jobs matching the request.
    pub async fn prune(&self, request: &PruneRequest) -> Result<PruneReport, JobError> {
        if let PruneCriteria::Query(text) = &request.criteria
            && text.trim().is_empty()
        {
            return Err(JobError::Invalid("prune query must not be empty".into()));
        }

        let ids = self.backend.prune(request, now()).await?;
        if !request.dry_run && !ids.is_empty() {
            let mut cache = self.cache.write().await;
            for id in &ids {
                cache.remove(id);
            }
            drop(cache);
            for id in &ids {
                self.forget_lock(id);
            }
        }

        if request.dry_run {
            info!(count = ids.len(), criteria = ?request.criteria, "Prune dry run");
        } else if !ids.is_empty() {
            warn!(count = ids.len(), criteria = ?request.criteria, "Pruned jobs");
        }
        Ok(PruneReport {
            count: ids.len(),
            dry_run: request.dry_run,
        })
    }
}
