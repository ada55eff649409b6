//! The turn controller: context → model → parse → tools → repeat.
//!
//! One `run` drives a session until the model answers without tool calls,
//! a call needs approval, a halting failure occurs, the iteration limit is
//! hit, or the turn is cancelled. Calls held for approval are re-dispatched
//! at the start of the next `run`.

use crate::context::{ContextAssembler, DEFAULT_CONTEXT_BUDGET};
use crate::sources::Transcript;
use chrono::Utc;
use futures::StreamExt;
use futures::future::join_all;
use skein_config::AppConfig;
use skein_core::context::{AssembledContext, SectionSource};
use skein_core::error::{ProviderError, ToolFailure};
use skein_core::event::{DomainEvent, EventBus, StreamEvent};
use skein_core::provider::{ChunkStream, ModelClient, ModelRequest};
use skein_core::tool::ToolCall;
use skein_stream::{DEFAULT_MAX_ARGUMENT_BYTES, StreamParser};
use skein_tools::{Router, Session};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_ITERATIONS: u32 = 25;

/// Where the controller currently is in a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    BuildingContext,
    AwaitingModel,
    ParsingStream,
    ExecutingTools,
    Terminal,
}

/// How a turn ended, short of an error.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The model answered without calling tools.
    Completed { text: String, iterations: u32 },
    /// These calls wait on approval; the next `run` dispatches them first.
    AwaitingApproval { calls: Vec<ToolCall> },
}

#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("Exceeded {limit} model iterations without a final answer")]
    MaxIterationsExceeded { limit: u32 },

    #[error("Tool call {call_id} halted the turn: {failure}")]
    ToolHalted { call_id: String, failure: ToolFailure },

    #[error("Turn cancelled")]
    Cancelled,

    #[error("Model error: {0}")]
    Model(#[from] ProviderError),
}

/// Limits for one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnConfig {
    pub max_iterations: u32,
    pub context_budget: usize,
    pub max_argument_bytes: usize,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            context_budget: DEFAULT_CONTEXT_BUDGET,
            max_argument_bytes: DEFAULT_MAX_ARGUMENT_BYTES,
        }
    }
}

impl From<&AppConfig> for TurnConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_iterations: config.agent.max_iterations,
            context_budget: config.agent.context_budget,
            max_argument_bytes: config.stream.max_argument_bytes,
        }
    }
}

/// What one model stream amounted to.
#[derive(Debug, Default)]
struct ModelReply {
    text: String,
    calls: Vec<ToolCall>,
    done: bool,
}

pub struct TurnController {
    model: Arc<dyn ModelClient>,
    router: Arc<Router>,
    sources: Vec<Arc<dyn SectionSource>>,
    assembler: ContextAssembler,
    config: TurnConfig,
    events: Option<Arc<EventBus>>,
    presenter: Option<mpsc::UnboundedSender<StreamEvent>>,
    phase: watch::Sender<TurnPhase>,
}

impl TurnController {
    pub fn new(model: Arc<dyn ModelClient>, router: Arc<Router>) -> Self {
        let config = TurnConfig::default();
        Self {
            model,
            router,
            sources: Vec::new(),
            assembler: ContextAssembler::new(config.context_budget),
            config,
            events: None,
            presenter: None,
            phase: watch::channel(TurnPhase::Idle).0,
        }
    }

    pub fn with_config(mut self, config: TurnConfig) -> Self {
        self.assembler = ContextAssembler::new(config.context_budget);
        self.config = config;
        self
    }

    /// Add a contributor of context sections (system text, memory, documents).
    pub fn with_source(mut self, source: Arc<dyn SectionSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    /// Forward every parsed stream event to a presentation layer.
    pub fn with_presenter(mut self, sink: mpsc::UnboundedSender<StreamEvent>) -> Self {
        self.presenter = Some(sink);
        self
    }

    pub fn config(&self) -> &TurnConfig {
        &self.config
    }

    /// Observe phase transitions.
    pub fn phases(&self) -> watch::Receiver<TurnPhase> {
        self.phase.subscribe()
    }

    pub fn phase(&self) -> TurnPhase {
        *self.phase.borrow()
    }

    fn set_phase(&self, phase: TurnPhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            debug!(from = ?previous, to = ?phase, "Turn phase");
        }
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    /// Run one turn for `session`. `input` is the new user message, if any;
    /// `None` resumes after approvals.
    pub async fn run(
        &self,
        session: &Session,
        transcript: &mut Transcript,
        input: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, TurnError> {
        info!(session_id = %session.id(), resume = input.is_none(), "Turn started");
        self.publish(DomainEvent::TurnStarted {
            session_id: session.id().to_string(),
            timestamp: Utc::now(),
        });

        let mut iterations = 0;
        let result = self.drive(session, transcript, input, cancel, &mut iterations).await;
        session.clear_call_approvals();
        self.set_phase(TurnPhase::Terminal);

        let outcome = match &result {
            Ok(TurnOutcome::Completed { .. }) => "completed",
            Ok(TurnOutcome::AwaitingApproval { .. }) => "awaiting_approval",
            Err(TurnError::MaxIterationsExceeded { .. }) => "max_iterations",
            Err(TurnError::ToolHalted { .. }) => "halted",
            Err(TurnError::Cancelled) => "cancelled",
            Err(TurnError::Model(_)) => "model_error",
        };
        info!(session_id = %session.id(), iterations, outcome, "Turn finished");
        self.publish(DomainEvent::TurnFinished {
            session_id: session.id().to_string(),
            iterations,
            outcome: outcome.into(),
            timestamp: Utc::now(),
        });
        result
    }

    async fn drive(
        &self,
        session: &Session,
        transcript: &mut Transcript,
        input: Option<String>,
        cancel: &CancellationToken,
        iterations: &mut u32,
    ) -> Result<TurnOutcome, TurnError> {
        if let Some(text) = input {
            transcript.push_user(text);
        }

        let held = session.take_pending();
        if !held.is_empty() {
            info!(count = held.len(), "Resuming calls held for approval");
            checkpoint(cancel)?;
            self.set_phase(TurnPhase::ExecutingTools);
            if let Some(outcome) = self.execute(held, session, transcript, cancel).await? {
                return Ok(outcome);
            }
        }

        for iteration in 1..=self.config.max_iterations {
            *iterations = iteration;
            checkpoint(cancel)?;
            self.set_phase(TurnPhase::BuildingContext);
            let context = self.build_context(session, transcript).await;

            checkpoint(cancel)?;
            self.set_phase(TurnPhase::AwaitingModel);
            let request = ModelRequest {
                session_id: session.id().to_string(),
                context,
                tools: self.router.definitions(),
            };
            let stream = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TurnError::Cancelled),
                stream = self.model.stream(request) => stream?,
            };

            self.set_phase(TurnPhase::ParsingStream);
            let reply = self.read_stream(stream, cancel).await?;
            transcript.push_assistant(reply.text.clone(), reply.calls.clone());
            if reply.calls.is_empty() {
                return Ok(TurnOutcome::Completed {
                    text: reply.text,
                    iterations: iteration,
                });
            }

            checkpoint(cancel)?;
            self.set_phase(TurnPhase::ExecutingTools);
            if let Some(outcome) = self.execute(reply.calls, session, transcript, cancel).await? {
                return Ok(outcome);
            }
        }

        let limit = self.config.max_iterations;
        warn!(session_id = %session.id(), limit, "Max iterations reached");
        Err(TurnError::MaxIterationsExceeded { limit })
    }

    async fn build_context(&self, session: &Session, transcript: &Transcript) -> AssembledContext {
        let mut sections = Vec::new();
        for source in &self.sources {
            let contributed = source.sections().await;
            debug!(source = source.name(), count = contributed.len(), "Collected sections");
            sections.extend(contributed);
        }
        sections.extend(transcript.sections());

        let context = self.assembler.assemble(&sections);
        if context.overrun {
            self.publish(DomainEvent::ContextOverrun {
                session_id: session.id().to_string(),
                total_cost: context.total_cost,
                budget: context.budget,
                timestamp: Utc::now(),
            });
        }
        context
    }

    async fn read_stream(&self, mut stream: ChunkStream, cancel: &CancellationToken) -> Result<ModelReply, TurnError> {
        let mut parser = StreamParser::new(self.config.max_argument_bytes);
        let mut reply = ModelReply::default();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TurnError::Cancelled),
                chunk = stream.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => self.absorb(parser.process(&bytes), &mut reply),
                Some(Err(e)) => {
                    warn!(error = %e, "Model stream failed");
                    return Err(TurnError::Model(e));
                }
                None => break,
            }
        }
        self.absorb(parser.finalize(), &mut reply);

        if !reply.done {
            warn!("Model stream ended without a done marker; treating as done");
        }
        let stats = parser.stats();
        debug!(
            events = stats.events,
            calls = stats.calls_completed,
            truncated = stats.truncated,
            "Model stream parsed"
        );
        Ok(reply)
    }

    fn absorb(&self, events: Vec<StreamEvent>, reply: &mut ModelReply) {
        for event in events {
            if let Some(sink) = &self.presenter {
                // A closed presenter does not stop the turn.
                let _ = sink.send(event.clone());
            }
            match event {
                StreamEvent::TextDelta { text } => reply.text.push_str(&text),
                StreamEvent::ToolCallComplete { call } => reply.calls.push(call),
                StreamEvent::TurnDone => reply.done = true,
                StreamEvent::StreamError { kind } => warn!(?kind, "Stream error event"),
                StreamEvent::ToolCallStart { .. } | StreamEvent::ToolCallArgsDelta { .. } => {}
            }
        }
    }

    /// Dispatch `calls` concurrently and record their results. Returns an
    /// outcome when the turn has to stop here.
    async fn execute(
        &self,
        calls: Vec<ToolCall>,
        session: &Session,
        transcript: &mut Transcript,
        cancel: &CancellationToken,
    ) -> Result<Option<TurnOutcome>, TurnError> {
        debug!(count = calls.len(), "Executing tool calls");
        let dispatches = calls.iter().map(|call| async move {
            let started = Instant::now();
            let result = self.router.dispatch(call, session, cancel).await;
            (result, started.elapsed().as_millis() as u64)
        });
        let results = join_all(dispatches).await;

        let mut pending = Vec::new();
        let mut halted = None;
        for (call, (result, duration_ms)) in calls.iter().zip(results) {
            if result.is_pending() {
                pending.push(call.clone());
                continue;
            }
            self.publish(DomainEvent::ToolExecuted {
                tool_name: result.tool_name.clone(),
                success: result.is_success(),
                duration_ms,
                timestamp: Utc::now(),
            });
            if halted.is_none()
                && let Some(failure) = result.failure().filter(|f| f.is_halting())
            {
                halted = Some((result.call_id.clone(), failure.clone()));
            }
            transcript.push_result(result);
        }

        // Results that came back before cancellation are already recorded.
        checkpoint(cancel)?;
        if let Some((call_id, failure)) = halted {
            warn!(call_id = %call_id, %failure, "Tool failure halted the turn");
            return Err(TurnError::ToolHalted { call_id, failure });
        }
        if !pending.is_empty() {
            info!(count = pending.len(), "Tool calls awaiting approval");
            return Ok(Some(TurnOutcome::AwaitingApproval { calls: pending }));
        }
        Ok(None)
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), TurnError> {
    if cancel.is_cancelled() {
        Err(TurnError::Cancelled)
    } else {
        Ok(())
    }
}
