//! # Skein Core
//!
//! Domain types, traits, and error definitions for the Skein agent execution
//! core. This crate defines the model every other crate implements against:
//! stream events, tool calls and results, context sections, jobs, memory
//! notes, and the collaborator seams (model client, job backend, section
//! sources).
//!
//! ## Design Philosophy
//!
//! Every subsystem boundary is a trait or a plain data type here.
//! Implementations live in their respective crates, so:
//! - collaborators can be swapped (SQLite vs. in-memory job storage)
//! - tests use stub implementations
//! - the dependency graph points inward on core

pub mod context;
pub mod error;
pub mod event;
pub mod job;
pub mod memory;
pub mod provider;
pub mod token;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use context::{
    AssembledContext, CompressionStrategy, ContextSection, DropInfo, DropReason, Fidelity,
    RenderedSection, SectionContent, SectionSource, TextContent,
};
pub use error::{JobError, ProviderError, ToolFailure};
pub use event::{DomainEvent, EventBus, StreamErrorKind, StreamEvent};
pub use job::{
    Job, JobBackend, JobFilter, JobStatus, JobUpdate, NewJob, PruneCriteria, PruneReport,
    PruneRequest,
};
pub use memory::{MemoryNote, NewNote};
pub use provider::{ChunkStream, ModelClient, ModelRequest};
pub use tool::{
    CallStatus, HostType, InvalidReason, ToolCall, ToolDefinition, ToolOutcome, ToolResult,
};
