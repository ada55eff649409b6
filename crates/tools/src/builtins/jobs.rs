//! Backlog tools over the shared [`JobStore`].

use crate::handler::{ResolvedPaths, ToolOutput, TypedTool};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use skein_core::error::{JobError, ToolFailure};
use skein_core::job::{Job, JobFilter, JobStatus, JobUpdate, NewJob, PruneCriteria, PruneRequest};
use skein_jobs::JobStore;
use std::sync::Arc;

/// An unreachable store halts the turn; anything else is reported back to
/// the model as a failed call.
pub(crate) fn job_failure(tool: &str, err: JobError) -> ToolFailure {
    match err {
        JobError::Unavailable(reason) => ToolFailure::JobStoreUnavailable { reason },
        other => ToolFailure::ExecutionFailed {
            tool_name: tool.into(),
            reason: other.to_string(),
        },
    }
}

fn parse_status(tool: &str, raw: Option<&str>) -> Result<Option<JobStatus>, ToolFailure> {
    raw.map(|s| s.parse::<JobStatus>())
        .transpose()
        .map_err(|e| ToolFailure::InvalidArguments {
            missing: vec![],
            mismatched: vec!["status".into()],
            reason: Some(format!("{tool}: {e}")),
        })
}

fn describe(job: &Job) -> String {
    format!("[{}] {} (priority {}, {})", job.id, job.title, job.priority, job.status)
}

fn job_data(job: &Job) -> serde_json::Value {
    serde_json::to_value(job).unwrap_or(serde_json::Value::Null)
}

const STATUS_VALUES: [&str; 4] = ["pending", "in_progress", "completed", "cancelled"];

pub struct CreateJob {
    store: Arc<JobStore>,
}

impl CreateJob {
    pub fn new(store: Arc<JobStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TypedTool for CreateJob {
    type Args = NewJob;

    fn name(&self) -> &str {
        "create_job"
    }

    fn description(&self) -> &str {
        "Add a job to the persistent backlog."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "title": {"type": "string"},
                "description": {"type": "string"},
                "priority": {"type": "integer", "description": "Higher runs first (default 0)"}
            },
            "required": ["title"]
        })
    }

    async fn run(&self, args: NewJob, _paths: &ResolvedPaths) -> Result<ToolOutput, ToolFailure> {
        let job = self.store.create(args).await.map_err(|e| job_failure(self.name(), e))?;
        Ok(ToolOutput::text(format!("Created job {}", describe(&job))).with_data(job_data(&job)))
    }
}

pub struct UpdateJob {
    store: Arc<JobStore>,
}

impl UpdateJob {
    pub fn new(store: Arc<JobStore>) -> Self {
        Self { store }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateJobArgs {
    id: String,
    #[serde(default)]
    title: Option<String>,
    /// An empty string clears the description.
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    priority: Option<i64>,
    #[serde(default)]
    status: Option<String>,
}

#[async_trait]
impl TypedTool for UpdateJob {
    type Args = UpdateJobArgs;

    fn name(&self) -> &str {
        "update_job"
    }

    fn description(&self) -> &str {
        "Change a job's title, description, priority or status."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "id": {"type": "string"},
                "title": {"type": "string"},
                "description": {"type": "string"},
                "priority": {"type": "integer"},
                "status": {"type": "string", "enum": STATUS_VALUES}
            },
            "required": ["id"]
        })
    }

    async fn run(&self, args: UpdateJobArgs, _paths: &ResolvedPaths) -> Result<ToolOutput, ToolFailure> {
        let update = JobUpdate {
            title: args.title,
            description: args
                .description
                .map(|d| if d.is_empty() { None } else { Some(d) }),
            priority: args.priority,
            status: parse_status(self.name(), args.status.as_deref())?,
        };
        let job = self
            .store
            .update(&args.id, update)
            .await
            .map_err(|e| job_failure(self.name(), e))?;
        Ok(ToolOutput::text(format!("Updated job {}", describe(&job))).with_data(job_data(&job)))
    }
}

pub struct ListJobs {
    store: Arc<JobStore>,
}

impl ListJobs {
    pub fn new(store: Arc<JobStore>) -> Self {
        Self { store }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListJobsArgs {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

#[async_trait]
impl TypedTool for ListJobs {
    type Args = ListJobsArgs;

    fn name(&self) -> &str {
        "list_jobs"
    }

    fn description(&self) -> &str {
        "List backlog jobs, highest priority first."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "status": {"type": "string", "enum": STATUS_VALUES},
                "query": {"type": "string", "description": "Substring of title or description"},
                "limit": {"type": "integer"}
            }
        })
    }

    async fn run(&self, args: ListJobsArgs, _paths: &ResolvedPaths) -> Result<ToolOutput, ToolFailure> {
        let filter = JobFilter {
            status: parse_status(self.name(), args.status.as_deref())?,
            query: args.query,
            limit: args.limit,
        };
        let jobs = self.store.list(&filter).await;
        let output = if jobs.is_empty() {
            "No jobs.".to_string()
        } else {
            jobs.iter().map(describe).collect::<Vec<_>>().join("\n")
        };
        let data = serde_json::to_value(&jobs).unwrap_or(serde_json::Value::Null);
        Ok(ToolOutput::text(output).with_data(data))
    }
}

pub struct DeleteJob {
    store: Arc<JobStore>,
}

impl DeleteJob {
    pub fn new(store: Arc<JobStore>) -> Self {
        Self { store }
    }
}

#[derive(Debug, Deserialize)]
pub struct DeleteJobArgs {
    id: String,
}

#[async_trait]
impl TypedTool for DeleteJob {
    type Args = DeleteJobArgs;

    fn name(&self) -> &str {
        "delete_job"
    }

    fn description(&self) -> &str {
        "Permanently remove a job from the backlog."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {"id": {"type": "string"}},
            "required": ["id"]
        })
    }

    fn requires_permission(&self) -> bool {
        true
    }

    async fn run(&self, args: DeleteJobArgs, _paths: &ResolvedPaths) -> Result<ToolOutput, ToolFailure> {
        self.store
            .delete(&args.id)
            .await
            .map_err(|e| job_failure(self.name(), e))?;
        Ok(ToolOutput::text(format!("Deleted job {}", args.id)))
    }
}

pub struct PruneJobs {
    store: Arc<JobStore>,
}

impl PruneJobs {
    pub fn new(store: Arc<JobStore>) -> Self {
        Self { store }
    }
}

#[derive(Debug, Deserialize)]
pub struct PruneJobsArgs {
    #[serde(default)]
    older_than_days: Option<u32>,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    dry_run: bool,
}

impl PruneJobsArgs {
    fn into_request(self) -> Result<PruneRequest, ToolFailure> {
        let criteria = match (self.older_than_days, self.query) {
            (Some(days), None) => PruneCriteria::OlderThanDays(days),
            (None, Some(query)) => PruneCriteria::Query(query),
            _ => {
                return Err(ToolFailure::invalid_arguments(
                    "exactly one of older_than_days or query is required",
                ));
            }
        };
        Ok(PruneRequest {
            criteria,
            dry_run: self.dry_run,
        })
    }
}

#[async_trait]
impl TypedTool for PruneJobs {
    type Args = PruneJobsArgs;

    fn name(&self) -> &str {
        "prune_jobs"
    }

    fn description(&self) -> &str {
        "Remove jobs older than N days or matching a query. In-progress jobs are kept. \
         Set dry_run to only count."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "older_than_days": {"type": "integer"},
                "query": {"type": "string"},
                "dry_run": {"type": "boolean"}
            }
        })
    }

    fn requires_permission(&self) -> bool {
        true
    }

    async fn run(&self, args: PruneJobsArgs, _paths: &ResolvedPaths) -> Result<ToolOutput, ToolFailure> {
        let request = args.into_request()?;
        let report = self
            .store
            .prune(&request)
            .await
            .map_err(|e| job_failure(self.name(), e))?;
        let output = if report.dry_run {
            format!("Would remove {} job(s)", report.count)
        } else {
            format!("Removed {} job(s)", report.count)
        };
        Ok(ToolOutput::text(output).with_data(json!({"count": report.count, "dry_run": report.dry_run})))
    }
}
