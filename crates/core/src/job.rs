//! Jobs: the durable background task backlog.
//!
//! A job is created by a tool or the user, mutated by status transitions and
//! only ever removed by an explicit delete or prune. The [`JobBackend`] trait
//! is the logical contract to durable storage; caching lives in `skein-jobs`.

use crate::error::JobError;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Whether a job in this state may move to `next`.
    ///
    /// Terminal jobs never change status; an in-progress job may be requeued.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if *self == next {
            return true;
        }
        match self {
            Self::Pending => true,
            Self::InProgress => true,
            Self::Completed | Self::Cancelled => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" | "inprogress" | "in-progress" => Ok(Self::InProgress),
            "completed" | "done" => Ok(Self::Completed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(JobError::Invalid(format!("unknown job status '{other}'"))),
        }
    }
}

/// A single backlog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub priority: i64,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Build a pending job with a fresh id.
    pub fn new(new: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id: format!("job-{}", uuid::Uuid::new_v4()),
            title: new.title,
            description: new.description,
            priority: new.priority,
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply an update, validating the status transition.
    pub fn apply(&mut self, update: &JobUpdate, now: DateTime<Utc>) -> Result<(), JobError> {
        if let Some(status) = update.status
            && !self.status.can_transition_to(status)
        {
            return Err(JobError::InvalidTransition {
                id: self.id.clone(),
                from: self.status.to_string(),
                to: status.to_string(),
            });
        }
        if let Some(title) = &update.title {
            if title.trim().is_empty() {
                return Err(JobError::Invalid("title must not be empty".into()));
            }
            self.title = title.clone();
        }
        if let Some(description) = &update.description {
            self.description = description.clone();
        }
        if let Some(priority) = update.priority {
            self.priority = priority;
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Substring match on title or description, ignoring ASCII case (the
    /// same folding SQLite's `lower()` applies).
    pub fn matches_query(&self, query: &str) -> bool {
        let needle = query.to_ascii_lowercase();
        self.title.to_ascii_lowercase().contains(&needle)
            || self
                .description
                .as_deref()
                .is_some_and(|d| d.to_ascii_lowercase().contains(&needle))
    }
}

/// Fields for creating a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewJob {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: i64,
}

impl NewJob {
    pub fn validate(&self) -> Result<(), JobError> {
        if self.title.trim().is_empty() {
            return Err(JobError::Invalid("title must not be empty".into()));
        }
        Ok(())
    }
}

/// A partial update. `None` leaves the field unchanged; `description:
/// Some(None)` clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub status: Option<JobStatus>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// Listing filter. Results are ordered by priority (desc), then creation time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobFilter {
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn matches(&self, job: &Job) -> bool {
        self.status.is_none_or(|s| job.status == s)
            && self.query.as_deref().is_none_or(|q| job.matches_query(q))
    }
}

/// Which jobs a prune targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PruneCriteria {
    /// Jobs not updated within the last `n` days.
    OlderThanDays(u32),
    /// Jobs whose title or description contains the text.
    Query(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneRequest {
    pub criteria: PruneCriteria,
    #[serde(default)]
    pub dry_run: bool,
}

impl PruneRequest {
    /// Whether `job` is affected. In-progress jobs are never pruned.
    pub fn matches(&self, job: &Job, now: DateTime<Utc>) -> Result<bool, JobError> {
        if job.status == JobStatus::InProgress {
            return Ok(false);
        }
        Ok(match &self.criteria {
            PruneCriteria::OlderThanDays(days) => job.updated_at < Self::cutoff(now, *days)?,
            PruneCriteria::Query(query) => job.matches_query(query),
        })
    }

    /// `now` minus `days`. An age that reaches past the representable
    /// calendar is rejected rather than clamped.
    pub fn cutoff(now: DateTime<Utc>, days: u32) -> Result<DateTime<Utc>, JobError> {
        TimeDelta::try_days(i64::from(days))
            .and_then(|age| now.checked_sub_signed(age))
            .ok_or_else(|| JobError::Invalid(format!("older_than_days {days} is out of range")))
    }
}

/// Result of a prune: how many rows were (or would be) removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneReport {
    pub count: usize,
    pub dry_run: bool,
}

/// Durable row store for jobs. Every method is atomic per row.
///
/// Implementations: SQLite (production), in-memory (tests, ephemeral sessions).
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    async fn insert(&self, job: &Job) -> Result<(), JobError>;

    /// Overwrite the row for `job.id` if its stored status is still
    /// `expected`. Returns `false` if the row is gone or has moved on.
    async fn replace(&self, job: &Job, expected: JobStatus) -> Result<bool, JobError>;

    async fn delete(&self, id: &str) -> Result<bool, JobError>;

    async fn get(&self, id: &str) -> Result<Option<Job>, JobError>;

    /// Every row, in insertion order.
    async fn list_all(&self) -> Result<Vec<Job>, JobError>;

    /// Atomically pick the pending job with highest priority (ties: oldest
    /// `created_at`) and mark it in progress. Two concurrent claims never
    /// return the same job.
    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>, JobError>;

    /// Ids of rows matching the request; rows are removed unless `dry_run`.
    async fn prune(&self, request: &PruneRequest, now: DateTime<Utc>) -> Result<Vec<String>, JobError>;
}
