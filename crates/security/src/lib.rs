//! Security module for Skein: workspace sandboxing and audit logging.
//!
//! Provides:
//! - **Workspace roots**: every tool path is resolved inside a session's root
//! - **Audit logging**: structured security event logging

pub mod audit;
pub mod path;

pub use audit::{
    AuditEntry, AuditEvent, AuditLogger, AuditOutcome, AuditSink, DEFAULT_RETAINED_ENTRIES, TracingSink,
};
pub use path::{PathError, WorkspaceRoot, lexically_contained};
