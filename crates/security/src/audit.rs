//! Audit logging: structured security event logging.
//!
//! Records sandbox denials and permission decisions made by the tool router.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// How many entries a logger keeps in memory. Sinks see every entry.
pub const DEFAULT_RETAINED_ENTRIES: usize = 1024;

/// A single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
    /// Session that triggered the event.
    pub actor: String,
    /// Tool or path the event concerns.
    pub target: String,
    pub outcome: AuditOutcome,
    pub details: Option<String>,
}

/// Types of auditable security events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A tool was executed
    ToolExecution { tool_name: String },
    /// A permission-gated call was held for approval
    ApprovalRequested { tool_name: String, call_id: String },
    /// A gated call ran on the strength of an approval
    ApprovalGranted { tool_name: String, call_id: String },
    /// A path resolved outside the workspace root
    PathDenied { path: String },
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
}

/// Where audit entries are written.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry);
}

/// Audit logger that keeps the most recent entries in memory and forwards
/// every entry to its sinks.
pub struct AuditLogger {
    entries: Mutex<VecDeque<AuditEntry>>,
    retained: usize,
    sinks: Vec<Box<dyn AuditSink>>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("entry_count", &self.count())
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLogger {
    /// Create a new audit logger with no sinks.
    pub fn new() -> Self {
        Self::with_sinks(Vec::new())
    }

    /// Create a new audit logger with the given sinks.
    pub fn with_sinks(sinks: Vec<Box<dyn AuditSink>>) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            retained: DEFAULT_RETAINED_ENTRIES,
            sinks,
        }
    }

    /// Keep at most `retained` entries in memory; older ones are dropped.
    pub fn with_retention(mut self, retained: usize) -> Self {
        self.retained = retained.max(1);
        self
    }

    /// A logger that mirrors every entry to `tracing`.
    pub fn tracing() -> Self {
        Self::with_sinks(vec![Box::new(TracingSink)])
    }

    fn entries_guard(&self) -> MutexGuard<'_, VecDeque<AuditEntry>> {
        // A poisoned log is still a valid log.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record an audit event.
    pub fn log(
        &self,
        event: AuditEvent,
        actor: &str,
        target: &str,
        outcome: AuditOutcome,
        details: Option<String>,
    ) {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            event,
            actor: actor.into(),
            target: target.into(),
            outcome,
            details,
        };

        {
            let mut entries = self.entries_guard();
            if entries.len() == self.retained {
                entries.pop_front();
            }
            entries.push_back(entry.clone());
        }

        for sink in &self.sinks {
            sink.record(&entry);
        }
    }

    /// Retained entries, oldest first.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries_guard().iter().cloned().collect()
    }

    /// Get entries with the given outcome.
    pub fn entries_by_outcome(&self, outcome: &AuditOutcome) -> Vec<AuditEntry> {
        self.entries_guard()
            .iter()
            .filter(|e| &e.outcome == outcome)
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.entries_guard().len()
    }
}

/// A tracing-based audit sink.
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, entry: &AuditEntry) {
        match entry.outcome {
            AuditOutcome::Denied => tracing::warn!(
                event = ?entry.event,
                actor = %entry.actor,
                target = %entry.target,
                details = ?entry.details,
                "audit: denied"
            ),
            _ => tracing::info!(
                event = ?entry.event,
                actor = %entry.actor,
                target = %entry.target,
                outcome = ?entry.outcome,
                "audit"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct CountingSink(Arc<Mutex<usize>>);

    impl AuditSink for CountingSink {
        fn record(&self, _entry: &AuditEntry) {
            *self.0.lock().unwrap() += 1;
        }
    }

    #[test]
    fn log_and_retrieve() {
        let logger = AuditLogger::new();
        logger.log(
            AuditEvent::PathDenied { path: "../etc".into() },
            "session-1",
            "write_file",
            AuditOutcome::Denied,
            None,
        );
        assert_eq!(logger.count(), 1);
        assert_eq!(logger.entries_by_outcome(&AuditOutcome::Denied).len(), 1);
        assert!(logger.entries_by_outcome(&AuditOutcome::Success).is_empty());
    }

    #[test]
    fn sinks_receive_entries() {
        let counter = Arc::new(Mutex::new(0));
        let logger = AuditLogger::with_sinks(vec![Box::new(CountingSink(counter.clone()))]);
        logger.log(
            AuditEvent::ToolExecution { tool_name: "read_file".into() },
            "s",
            "read_file",
            AuditOutcome::Success,
            None,
        );
        assert_eq!(*counter.lock().unwrap(), 1);
    }

    #[test]
    fn memory_keeps_only_recent_entries() {
        let counter = Arc::new(Mutex::new(0));
        let logger =
            AuditLogger::with_sinks(vec![Box::new(CountingSink(counter.clone()))]).with_retention(3);
        for i in 0..5 {
            logger.log(
                AuditEvent::PathDenied { path: format!("../{i}") },
                "s",
                "read_file",
                AuditOutcome::Denied,
                None,
            );
        }
        assert_eq!(logger.count(), 3);
        let paths: Vec<AuditEvent> = logger.entries().into_iter().map(|e| e.event).collect();
        assert_eq!(paths[0], AuditEvent::PathDenied { path: "../2".into() });
        assert_eq!(paths[2], AuditEvent::PathDenied { path: "../4".into() });
        assert_eq!(*counter.lock().unwrap(), 5, "sinks still see everything");
    }

    #[test]
    fn entry_serialization() {
        let event = AuditEvent::ApprovalRequested {
            tool_name: "write_file".into(),
            call_id: "c1".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"approval_requested""#));
    }
}
