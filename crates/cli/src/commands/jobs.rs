//! `skein jobs`: backlog maintenance against the configured SQLite store.

use anyhow::{Context, bail};
use clap::{Args, Subcommand};
use skein_config::AppConfig;
use skein_core::job::{Job, JobFilter, JobStatus, JobUpdate, NewJob, PruneCriteria, PruneRequest};
use skein_jobs::{JobStore, SqliteJobBackend};
use std::sync::Arc;

#[derive(Subcommand)]
pub enum JobsCommand {
    /// List jobs, highest priority first
    List {
        /// pending, in_progress, completed or cancelled
        #[arg(long)]
        status: Option<JobStatus>,
        /// Substring of title or description
        #[arg(long)]
        query: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Add a job
    Add {
        title: String,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(short, long, default_value_t = 0)]
        priority: i64,
    },
    /// Change a job's fields
    Update {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        priority: Option<i64>,
        #[arg(long)]
        status: Option<JobStatus>,
    },
    /// Mark a job completed
    Complete { id: String },
    /// Mark a job cancelled
    Cancel { id: String },
    /// Remove a job
    Delete { id: String },
    /// Claim the next pending job (marks it in progress)
    Claim,
    /// Remove jobs by age or query
    Prune(PruneArgs),
}

#[derive(Args)]
pub struct PruneArgs {
    /// Jobs not updated in this many days
    #[arg(long, conflicts_with = "query", required_unless_present = "query")]
    older_than_days: Option<u32>,
    /// Jobs whose title or description contains this text
    #[arg(long)]
    query: Option<String>,
    /// Only count what would be removed
    #[arg(long)]
    dry_run: bool,
}

impl PruneArgs {
    fn into_request(self) -> anyhow::Result<PruneRequest> {
        let criteria = match (self.older_than_days, self.query) {
            (Some(days), None) => PruneCriteria::OlderThanDays(days),
            (None, Some(query)) => PruneCriteria::Query(query),
            _ => bail!("pass exactly one of --older-than-days or --query"),
        };
        Ok(PruneRequest {
            criteria,
            dry_run: self.dry_run,
        })
    }
}

pub async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<JobStore>> {
    if let Some(parent) = std::path::Path::new(&config.jobs.database).parent()
        && !parent.as_os_str().is_empty()
        && config.jobs.database != ":memory:"
    {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let backend = SqliteJobBackend::new(&config.jobs.database)
        .await
        .with_context(|| format!("opening job database {}", config.jobs.database))?;
    let store = JobStore::open(Arc::new(backend)).await.context("loading jobs")?;
    Ok(Arc::new(store))
}

fn print_job(job: &Job) {
    println!(
        "{:<42} {:>4}  {:<11} {}",
        job.id,
        job.priority,
        job.status.as_str(),
        job.title
    );
}

pub async fn run(config: &AppConfig, command: JobsCommand) -> anyhow::Result<()> {
    let store = open_store(config).await?;

    match command {
        JobsCommand::List {
            status,
            query,
            limit,
            json,
        } => {
            let jobs = store.list(&JobFilter { status, query, limit }).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&jobs)?);
            } else if jobs.is_empty() {
                println!("No jobs.");
            } else {
                for job in &jobs {
                    print_job(job);
                }
            }
        }
        JobsCommand::Add {
            title,
            description,
            priority,
        } => {
            let job = store
                .create(NewJob {
                    title,
                    description,
                    priority,
                })
                .await?;
            println!("{}", job.id);
        }
        JobsCommand::Update {
            id,
            title,
            description,
            priority,
            status,
        } => {
            let update = JobUpdate {
                title,
                description: description.map(|d| (!d.is_empty()).then_some(d)),
                priority,
                status,
            };
            print_job(&store.update(&id, update).await?);
        }
        JobsCommand::Complete { id } => print_job(&store.complete(&id).await?),
        JobsCommand::Cancel { id } => print_job(&store.cancel(&id).await?),
        JobsCommand::Delete { id } => {
            store.delete(&id).await?;
            println!("Deleted {id}");
        }
        JobsCommand::Claim => match store.dequeue().await? {
            Some(job) => print_job(&job),
            None => println!("No pending jobs."),
        },
        JobsCommand::Prune(args) => {
            let report = store.prune(&args.into_request()?).await?;
            if report.dry_run {
                println!("Would remove {} job(s)", report.count);
            } else {
                println!("Removed {} job(s)", report.count);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prune_args_need_one_criterion() {
        let args = PruneArgs {
            older_than_days: Some(30),
            query: None,
            dry_run: true,
        };
        let request = args.into_request().unwrap();
        assert_eq!(request.criteria, PruneCriteria::OlderThanDays(30));
        assert!(request.dry_run);

        let neither = PruneArgs {
            older_than_days: None,
            query: None,
            dry_run: false,
        };
        assert!(neither.into_request().is_err());
    }

    #[tokio::test]
    async fn store_opens_in_fresh_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.jobs.database = dir.path().join("nested/jobs.sqlite").to_string_lossy().into_owned();

        let store = open_store(&config).await.unwrap();
        store
            .create(NewJob {
                title: "first".into(),
                ..NewJob::default()
            })
            .await
            .unwrap();
        drop(store);

        let reopened = open_store(&config).await.unwrap();
        assert_eq!(reopened.len().await, 1);
    }
}
