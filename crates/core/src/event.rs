//! Events: the per-turn stream events and the process-wide domain event bus.
//!
//! [`StreamEvent`]s are produced by the stream parser and consumed within the
//! same turn (and by a presentation layer); they are never persisted.
//! [`DomainEvent`]s are published on the [`EventBus`] for decoupled observers.

use crate::tool::ToolCall;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Why the stream produced an error event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StreamErrorKind {
    /// An `args`/`end` marker referenced a call that is not open.
    UnknownCall(String),
    /// A `call` marker reused the id of a call that is still open.
    DuplicateCall(String),
    /// The model provider reported an error in-band.
    Provider(String),
}

/// One typed event parsed out of the model's output stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    TextDelta { text: String },
    ToolCallStart { call_id: String, name: String },
    ToolCallArgsDelta { call_id: String, fragment: String },
    /// Fires for every closed call, parsed or not; carries the final status.
    ToolCallComplete { call: ToolCall },
    TurnDone,
    StreamError { kind: StreamErrorKind },
}

impl StreamEvent {
    /// SSE-style event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TextDelta { .. } => "text_delta",
            Self::ToolCallStart { .. } => "tool_call_start",
            Self::ToolCallArgsDelta { .. } => "tool_call_args_delta",
            Self::ToolCallComplete { .. } => "tool_call_complete",
            Self::TurnDone => "turn_done",
            Self::StreamError { .. } => "stream_error",
        }
    }
}

/// Domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A turn began for a session.
    TurnStarted {
        session_id: String,
        timestamp: DateTime<Utc>,
    },

    /// The assembled context exceeded its budget (only `keep` sections can cause this).
    ContextOverrun {
        session_id: String,
        total_cost: usize,
        budget: usize,
        timestamp: DateTime<Utc>,
    },

    /// A tool call was dispatched.
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A turn reached a terminal state.
    TurnFinished {
        session_id: String,
        iterations: u32,
        outcome: String,
        timestamp: DateTime<Utc>,
    },

    /// A job changed status.
    JobTransitioned {
        job_id: String,
        status: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
