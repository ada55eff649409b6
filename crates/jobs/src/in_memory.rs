//! In-memory backend: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use skein_core::error::JobError;
use skein_core::job::{Job, JobBackend, JobStatus, PruneRequest};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// An in-memory backend that stores jobs in a Vec, in insertion order.
///
/// [`set_failing`](Self::set_failing) makes every call fail with
/// `JobError::Unavailable`, which lets tests exercise outage handling.
#[derive(Clone, Default)]
pub struct InMemoryJobBackend {
    jobs: Arc<RwLock<Vec<Job>>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryJobBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), JobError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(JobError::Unavailable("in-memory backend is offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl JobBackend for InMemoryJobBackend {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn insert(&self, job: &Job) -> Result<(), JobError> {
        self.check()?;
        let mut jobs = self.jobs.write().await;
        if jobs.iter().any(|j| j.id == job.id) {
            return Err(JobError::Invalid(format!("job {} already exists", job.id)));
        }
        jobs.push(job.clone());
        Ok(())
    }

    async fn replace(&self, job: &Job, expected: JobStatus) -> Result<bool, JobError> {
        self.check()?;
        let mut jobs = self.jobs.write().await;
        match jobs.iter_mut().find(|j| j.id == job.id && j.status == expected) {
            Some(existing) => {
                *existing = job.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool, JobError> {
        self.check()?;
        let mut jobs = self.jobs.write().await;
        let len_before = jobs.len();
        jobs.retain(|j| j.id != id);
        Ok(jobs.len() < len_before)
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, JobError> {
        self.check()?;
        Ok(self.jobs.read().await.iter().find(|j| j.id == id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<Job>, JobError> {
        self.check()?;
        Ok(self.jobs.read().await.clone())
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>, JobError> {
        self.check()?;
        let mut jobs = self.jobs.write().await;
        // `min_by` keeps the first of equal elements, so insertion order
        // breaks the remaining ties.
        let next = jobs
            .iter_mut()
            .filter(|j| j.status == JobStatus::Pending)
            .min_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then_with(|| a.created_at.cmp(&b.created_at))
            });
        Ok(next.map(|job| {
            job.status = JobStatus::InProgress;
            job.updated_at = now;
            job.clone()
        }))
    }

    async fn prune(&self, request: &PruneRequest, now: DateTime<Utc>) -> Result<Vec<String>, JobError> {
        self.check()?;
        let mut jobs = self.jobs.write().await;
        let mut ids = Vec::new();
        for job in jobs.iter() {
            if request.matches(job, now)? {
                ids.push(job.id.clone());
            }
        }
        if !request.dry_run {
            jobs.retain(|j| !ids.contains(&j.id));
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_core::job::NewJob;

    fn job(title: &str, priority: i64) -> Job {
        Job::new(
            NewJob {
                title: title.into(),
                description: None,
                priority,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn claim_order_and_exhaustion() {
        let b = InMemoryJobBackend::new();
        let first = job("first", 2);
        let second = job("second", 2);
        let urgent = job("urgent", 9);
        for j in [&first, &second, &urgent] {
            b.insert(j).await.unwrap();
        }
        let now = Utc::now();
        assert_eq!(b.claim_next(now).await.unwrap().unwrap().id, urgent.id);
        assert_eq!(b.claim_next(now).await.unwrap().unwrap().id, first.id);
        assert_eq!(b.claim_next(now).await.unwrap().unwrap().id, second.id);
        assert!(b.claim_next(now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failing_switch_rejects_everything() {
        let b = InMemoryJobBackend::new();
        b.set_failing(true);
        assert!(matches!(b.insert(&job("x", 0)).await, Err(JobError::Unavailable(_))));
        assert!(matches!(b.list_all().await, Err(JobError::Unavailable(_))));
        b.set_failing(false);
        assert!(b.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_insert_rejected() {
        let b = InMemoryJobBackend::new();
        let j = job("x", 0);
        b.insert(&j).await.unwrap();
        assert!(matches!(b.insert(&j).await, Err(JobError::Invalid(_))));
    }
}
