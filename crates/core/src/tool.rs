//! Tool calls and tool results: what the model asks for and what it gets back.
//!
//! A [`ToolCall`] is assembled by the stream parser from argument fragments.
//! Its [`CallStatus`] records whether the accumulated buffer parsed; the
//! router, not the parser, decides what to do with an invalid call.

use crate::error::ToolFailure;
use serde::{Deserialize, Serialize};

/// Where a tool registration executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostType {
    /// In-process, against the local workspace.
    Local,
    /// Forwarded to the peer that owns the remote workspace.
    Remote,
}

impl std::fmt::Display for HostType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote => f.write_str("remote"),
        }
    }
}

/// Why an accumulated argument buffer could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum InvalidReason {
    /// The buffer is not valid JSON.
    Malformed { message: String },
    /// The stream ended before the call was closed.
    Truncated,
    /// The buffer grew past the configured limit.
    TooLarge { limit: usize },
}

impl std::fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed { message } => write!(f, "malformed arguments: {message}"),
            Self::Truncated => f.write_str("stream ended before the call was closed"),
            Self::TooLarge { limit } => write!(f, "arguments exceed {limit} bytes"),
        }
    }
}

/// Parse status of a tool call's argument buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum CallStatus {
    Accumulating,
    Parsed(serde_json::Value),
    Invalid(InvalidReason),
}

/// A request from the model to invoke a named capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Opaque id, unique within a turn.
    pub id: String,

    /// Name of the tool to execute.
    pub name: String,

    /// Argument bytes exactly as they arrived.
    pub raw_arguments: String,

    pub status: CallStatus,
}

impl ToolCall {
    /// A freshly opened call with an empty buffer.
    pub fn open(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            raw_arguments: String::new(),
            status: CallStatus::Accumulating,
        }
    }

    /// A call whose arguments are already structured (tests, replays, resumes).
    pub fn parsed(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            raw_arguments: arguments.to_string(),
            status: CallStatus::Parsed(arguments),
        }
    }

    /// Parsed arguments, if the buffer parsed.
    pub fn arguments(&self) -> Option<&serde_json::Value> {
        match &self.status {
            CallStatus::Parsed(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self.status, CallStatus::Parsed(_))
    }
}

/// The outcome of dispatching one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success {
        output: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
    Failed {
        failure: ToolFailure,
    },
    /// Not an error: the call needs external approval before it can run.
    PendingApproval,
}

/// The result of a tool dispatch, addressed to the call that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub tool_name: String,
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn success(call: &ToolCall, output: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            outcome: ToolOutcome::Success {
                output: output.into(),
                data: None,
            },
        }
    }

    pub fn failed(call: &ToolCall, failure: ToolFailure) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            outcome: ToolOutcome::Failed { failure },
        }
    }

    pub fn pending(call: &ToolCall) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            outcome: ToolOutcome::PendingApproval,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Success { .. })
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.outcome, ToolOutcome::PendingApproval)
    }

    pub fn failure(&self) -> Option<&ToolFailure> {
        match &self.outcome {
            ToolOutcome::Failed { failure } => Some(failure),
            _ => None,
        }
    }

    /// Text the model sees for this result.
    pub fn render(&self) -> String {
        match &self.outcome {
            ToolOutcome::Success { output, .. } => output.clone(),
            ToolOutcome::Failed { failure } => format!("Error: {failure}"),
            ToolOutcome::PendingApproval => "Awaiting user approval".into(),
        }
    }
}

/// A tool definition advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's parameters.
    pub parameters: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parsed_call_exposes_arguments() {
        let call = ToolCall::parsed("1", "read_file", serde_json::json!({"path": "a.txt"}));
        assert!(call.is_parsed());
        assert_eq!(call.arguments().unwrap()["path"], "a.txt");
        assert_eq!(call.raw_arguments, r#"{"path":"a.txt"}"#);
    }

    #[test]
    fn open_call_is_accumulating() {
        let call = ToolCall::open("7", "x");
        assert_eq!(call.status, CallStatus::Accumulating);
        assert!(call.arguments().is_none());
    }

    #[test]
    fn result_rendering() {
        let call = ToolCall::parsed("1", "x", serde_json::json!({}));
        assert_eq!(ToolResult::success(&call, "ok").render(), "ok");
        let failed = ToolResult::failed(&call, ToolFailure::UnknownTool { name: "x".into() });
        assert_eq!(failed.render(), "Error: Unknown tool: x");
        assert!(ToolResult::pending(&call).is_pending());
    }

    #[test]
    fn call_status_serialization() {
        let status = CallStatus::Invalid(InvalidReason::Truncated);
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains(r#""status":"invalid""#));
        assert!(json.contains("truncated"));
    }
}
