//! `skein replay`: drive one turn with a recorded model stream.
//!
//! The recording file holds model replies separated by `---` lines. Stream
//! events are printed to stdout as JSON lines while the turn runs; logs go
//! to stderr.

use crate::commands::jobs::open_store;
use crate::replay::ReplayClient;
use anyhow::Context;
use clap::Args;
use skein_agent::{StaticSource, TurnConfig, TurnController, TurnError, TurnOutcome, Transcript};
use skein_config::AppConfig;
use skein_core::event::{EventBus, StreamEvent};
use skein_core::tool::HostType;
use skein_jobs::{InMemoryJobBackend, JobStore};
use skein_memory::{MemorySource, NoteStore};
use skein_security::WorkspaceRoot;
use skein_tools::{BuiltinDeps, Router, Session, register_builtins};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const SYSTEM_PROMPT: &str = "You are Skein, an agent that works through tools. \
Call tools with <|call:ID:NAME|>, then <|args:ID|> followed by JSON arguments and <|end:ID|>. \
Finish with <|done|>.";

#[derive(Args)]
pub struct ReplayArgs {
    /// Recording of model replies, separated by `---` lines
    file: PathBuf,

    /// User message that opens the turn
    #[arg(short, long, default_value = "")]
    message: String,

    /// Bytes per streamed chunk
    #[arg(long, default_value_t = 16)]
    chunk_size: usize,

    /// Workspace root for file tools (defaults to the configured one)
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Approve every call that asks for permission and resume
    #[arg(long)]
    approve_all: bool,

    /// Keep jobs and notes in memory instead of the configured stores
    #[arg(long)]
    ephemeral: bool,
}

async fn stores(config: &AppConfig, ephemeral: bool) -> anyhow::Result<(Arc<JobStore>, Arc<NoteStore>)> {
    if ephemeral {
        let jobs = JobStore::open(Arc::new(InMemoryJobBackend::new())).await?;
        return Ok((Arc::new(jobs), Arc::new(NoteStore::in_memory())));
    }
    let jobs = open_store(config).await?;
    let notes = match &config.memory.notes_file {
        Some(path) => NoteStore::open(path),
        None => NoteStore::in_memory(),
    };
    Ok((jobs, Arc::new(notes)))
}

pub async fn run(config: &AppConfig, args: ReplayArgs) -> anyhow::Result<()> {
    let recording = std::fs::read_to_string(&args.file)
        .with_context(|| format!("reading {}", args.file.display()))?;
    let replies = ReplayClient::parse_recording(&recording);
    info!(replies = replies.len(), file = %args.file.display(), "Loaded recording");
    let model = Arc::new(ReplayClient::new(replies, args.chunk_size));

    let (jobs, notes) = stores(config, args.ephemeral).await?;
    let mut router = Router::new().with_remote_timeout(Duration::from_millis(config.tools.remote_timeout_ms));
    register_builtins(
        &mut router,
        BuiltinDeps {
            jobs: Some(jobs),
            notes: Some(notes.clone()),
        },
    );

    let workspace = args.workspace.clone().unwrap_or_else(|| config.local_workspace());
    let root = WorkspaceRoot::create(&workspace, HostType::Local)
        .with_context(|| format!("opening workspace {}", workspace.display()))?;
    let session = Session::new("replay").with_root(root);
    for tool in &config.tools.approved_tools {
        session.approve_tool(tool.clone());
    }

    let (sink, mut events) = mpsc::unbounded_channel::<StreamEvent>();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!("Unprintable stream event: {e}"),
            }
        }
    });

    let controller = TurnController::new(model.clone(), Arc::new(router))
        .with_config(TurnConfig::from(config))
        .with_source(Arc::new(StaticSource::system(SYSTEM_PROMPT)))
        .with_source(Arc::new(MemorySource::new(notes, config.memory.always_append_cap)))
        .with_events(Arc::new(EventBus::default()))
        .with_presenter(sink);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let mut transcript = Transcript::new();
    let input = (!args.message.is_empty()).then(|| args.message.clone());
    let mut result = controller.run(&session, &mut transcript, input, &cancel).await;

    while let Ok(TurnOutcome::AwaitingApproval { calls }) = &result {
        let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
        if !args.approve_all {
            eprintln!("Awaiting approval for: {} (rerun with --approve-all)", names.join(", "));
            break;
        }
        eprintln!("Approving: {}", names.join(", "));
        for call in calls {
            session.approve_call(&call.id);
        }
        result = controller.run(&session, &mut transcript, None, &cancel).await;
    }

    drop(controller);
    printer.await.context("event printer panicked")?;
    if model.remaining() > 0 {
        warn!(unused = model.remaining(), "Recording has replies the turn never requested");
    }

    match result {
        Ok(TurnOutcome::Completed { text, iterations }) => {
            eprintln!("Completed after {iterations} iteration(s)");
            if !text.is_empty() {
                println!("{text}");
            }
            Ok(())
        }
        Ok(TurnOutcome::AwaitingApproval { .. }) => Ok(()),
        Err(TurnError::Cancelled) => {
            eprintln!("Cancelled");
            Ok(())
        }
        Err(e) => Err(e).context("turn failed"),
    }
}
