//! Error types for the Skein domain.
//!
//! Each bounded context has its own `thiserror` enum. There is no aggregate:
//! a tool failure becomes a [`ToolResult`](crate::tool::ToolResult), a job
//! error becomes a tool failure at the tool boundary, and the binary wraps
//! the rest in `anyhow`.

use thiserror::Error;

/// Failures of the model-stream collaborator.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),
}

/// Why a tool call did not produce a successful result.
///
/// Every variant except [`ToolFailure::PathEscape`] and
/// [`ToolFailure::JobStoreUnavailable`] is recoverable: the failure is fed
/// back to the model as a tool result and the turn continues.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolFailure {
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Invalid arguments: {}", describe_invalid(.missing, .mismatched, .reason))]
    InvalidArguments {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        missing: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        mismatched: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    #[error("Path '{path}' escapes workspace root '{root}'")]
    PathEscape { path: String, root: String },

    #[error("Remote tool timed out after {timeout_ms}ms")]
    RemoteTimeout { timeout_ms: u64 },

    #[error("No remote peer available: {reason}")]
    RemoteUnavailable { reason: String },

    #[error("Tool call cancelled")]
    Cancelled,

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Job store unavailable: {reason}")]
    JobStoreUnavailable { reason: String },
}

impl ToolFailure {
    /// Shorthand for an argument failure that only carries a reason.
    pub fn invalid_arguments(reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            missing: Vec::new(),
            mismatched: Vec::new(),
            reason: Some(reason.into()),
        }
    }

    /// Failures that halt the operation in progress instead of being
    /// reported back to the model.
    pub fn is_halting(&self) -> bool {
        matches!(
            self,
            Self::PathEscape { .. } | Self::JobStoreUnavailable { .. }
        )
    }
}

fn describe_invalid(missing: &[String], mismatched: &[String], reason: &Option<String>) -> String {
    let mut parts = Vec::new();
    if !missing.is_empty() {
        parts.push(format!("missing required field(s): {}", missing.join(", ")));
    }
    if !mismatched.is_empty() {
        parts.push(format!("wrong type for: {}", mismatched.join(", ")));
    }
    if let Some(reason) = reason {
        parts.push(reason.clone());
    }
    if parts.is_empty() {
        "arguments rejected".into()
    } else {
        parts.join("; ")
    }
}

/// Failures of the durable job store.
#[derive(Debug, Clone, Error)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job store unavailable: {0}")]
    Unavailable(String),

    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition { id: String, from: String, to: String },

    #[error("Invalid job data: {0}")]
    Invalid(String),

    #[error("Job {0} changed while it was being updated")]
    Conflict(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_reason() {
        let err = ProviderError::StreamInterrupted("connection reset".into());
        assert_eq!(err.to_string(), "Stream interrupted: connection reset");
    }

    #[test]
    fn invalid_arguments_lists_missing_fields() {
        let err = ToolFailure::InvalidArguments {
            missing: vec!["path".into(), "content".into()],
            mismatched: vec![],
            reason: None,
        };
        let text = err.to_string();
        assert!(text.contains("path, content"));
    }

    #[test]
    fn halting_failures() {
        assert!(ToolFailure::PathEscape { path: "../x".into(), root: "/w".into() }.is_halting());
        assert!(ToolFailure::JobStoreUnavailable { reason: "down".into() }.is_halting());
        assert!(!ToolFailure::RemoteTimeout { timeout_ms: 10 }.is_halting());
        assert!(!ToolFailure::UnknownTool { name: "x".into() }.is_halting());
    }

    #[test]
    fn job_errors_read_as_sentences() {
        let err = JobError::InvalidTransition {
            id: "job-1".into(),
            from: "completed".into(),
            to: "pending".into(),
        };
        assert_eq!(err.to_string(), "Job job-1 cannot move from completed to pending");
        assert!(JobError::Conflict("job-2".into()).to_string().contains("job-2"));
    }

    #[test]
    fn tool_failure_serializes_with_kind_tag() {
        let json = serde_json::to_string(&ToolFailure::RemoteTimeout { timeout_ms: 5 }).unwrap();
        assert!(json.contains(r#""kind":"remote_timeout""#));
    }
}
