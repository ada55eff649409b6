//! Section sources owned by the agent: static text and the transcript.

use async_trait::async_trait;
use skein_core::context::{CompressionStrategy, ContextSection, SectionSource, TextContent};
use skein_core::tool::{ToolCall, ToolOutcome, ToolResult};

/// Default priority for system instructions.
pub const SYSTEM_PRIORITY: i64 = 1000;

/// History priorities start here and rise with recency.
pub const HISTORY_BASE_PRIORITY: i64 = 100;

/// Head of a tool output kept in the excerpt rung.
const RESULT_EXCERPT_CHARS: usize = 400;

/// Fixed sections: system instructions, pinned documents.
#[derive(Debug, Clone)]
pub struct StaticSource {
    name: String,
    sections: Vec<ContextSection>,
}

impl StaticSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sections: Vec::new(),
        }
    }

    /// System instructions, always included.
    pub fn system(instructions: impl Into<String>) -> Self {
        Self::new("system").with_section(ContextSection::text(
            "system",
            SYSTEM_PRIORITY,
            CompressionStrategy::Keep,
            TextContent::new(instructions),
        ))
    }

    pub fn with_section(mut self, section: ContextSection) -> Self {
        self.sections.push(section);
        self
    }
}

#[async_trait]
impl SectionSource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn sections(&self) -> Vec<ContextSection> {
        self.sections.clone()
    }
}

/// One transcript entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    User(String),
    Assistant { text: String, calls: Vec<ToolCall> },
    Tool(ToolResult),
}

/// The conversation so far, as context sections.
///
/// User messages are kept in full; assistant text and tool results degrade.
/// Later entries get higher priority so the oldest history goes first.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<Entry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.entries.push(Entry::User(text.into()));
    }

    pub fn push_assistant(&mut self, text: impl Into<String>, calls: Vec<ToolCall>) {
        self.entries.push(Entry::Assistant {
            text: text.into(),
            calls,
        });
    }

    pub fn push_result(&mut self, result: ToolResult) {
        self.entries.push(Entry::Tool(result));
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The most recent assistant text, if any.
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.entries.iter().rev().find_map(|e| match e {
            Entry::Assistant { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn sections(&self) -> Vec<ContextSection> {
        self.entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let id = format!("history:{index}");
                let priority = HISTORY_BASE_PRIORITY + index as i64;
                match entry {
                    Entry::User(text) => ContextSection::text(
                        id,
                        priority,
                        CompressionStrategy::Keep,
                        TextContent::new(format!("User: {text}")),
                    ),
                    Entry::Assistant { text, calls } => {
                        ContextSection::text(id, priority, CompressionStrategy::Degrade, assistant_content(text, calls))
                    }
                    Entry::Tool(result) => {
                        ContextSection::text(id, priority, CompressionStrategy::Degrade, result_content(result))
                    }
                }
            })
            .collect()
    }
}

fn assistant_content(text: &str, calls: &[ToolCall]) -> TextContent {
    let mut full = format!("Assistant: {text}");
    for call in calls {
        full.push_str(&format!("\n[call {} {} {}]", call.id, call.name, call.raw_arguments));
    }
    let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
    let summary = if names.is_empty() {
        format!("Assistant: {}", first_line(text))
    } else {
        format!("Assistant called {}", names.join(", "))
    };
    TextContent::new(full).with_summary(summary)
}

fn result_content(result: &ToolResult) -> TextContent {
    let header = format!("Tool result {} ({})", result.call_id, result.tool_name);
    let body = result.render();
    let full = format!("{header}:\n{body}");
    let excerpt = if body.chars().count() > RESULT_EXCERPT_CHARS {
        let head: String = body.chars().take(RESULT_EXCERPT_CHARS).collect();
        Some(format!("{header}:\n{head}\n[output truncated]"))
    } else {
        None
    };
    let status = match &result.outcome {
        ToolOutcome::Success { output, .. } => format!("succeeded, {} bytes of output", output.len()),
        ToolOutcome::Failed { failure } => format!("failed: {failure}"),
        ToolOutcome::PendingApproval => "awaiting approval".into(),
    };

    let mut content = TextContent::new(full).with_summary(format!("{header} {status}"));
    if let Some(excerpt) = excerpt {
        content = content.with_excerpt(excerpt);
    }
    content
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use skein_core::context::Fidelity;

    #[tokio::test]
    async fn system_source_is_kept() {
        let source = StaticSource::system("Be brief.");
        let sections = source.sections().await;
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].strategy, CompressionStrategy::Keep);
        assert_eq!(sections[0].render(Fidelity::Full).as_deref(), Some("Be brief."));
    }

    #[test]
    fn newer_history_outranks_older() {
        let mut transcript = Transcript::new();
        transcript.push_user("hi");
        transcript.push_assistant("hello", vec![]);
        let sections = transcript.sections();
        assert!(sections[1].priority > sections[0].priority);
        assert_eq!(sections[0].strategy, CompressionStrategy::Keep);
        assert_eq!(sections[1].strategy, CompressionStrategy::Degrade);
    }

    #[test]
    fn long_tool_output_has_excerpt_and_status_summary() {
        let call = ToolCall::parsed("c1", "read_file", json!({"path": "big.txt"}));
        let mut transcript = Transcript::new();
        transcript.push_result(ToolResult::success(&call, "z".repeat(2000)));

        let section = &transcript.sections()[0];
        let excerpt = section.render(Fidelity::Excerpt).unwrap();
        assert!(excerpt.ends_with("[output truncated]"));
        assert!(excerpt.len() < 600);
        assert_eq!(
            section.render(Fidelity::Summary).unwrap(),
            "Tool result c1 (read_file) succeeded, 2000 bytes of output"
        );
    }

    #[test]
    fn assistant_summary_names_calls() {
        let mut transcript = Transcript::new();
        let call = ToolCall::parsed("c1", "list_jobs", json!({}));
        transcript.push_assistant("Checking the backlog.", vec![call]);
        let section = &transcript.sections()[0];
        assert!(section.render(Fidelity::Full).unwrap().contains("[call c1 list_jobs {}]"));
        assert_eq!(section.render(Fidelity::Summary).unwrap(), "Assistant called list_jobs");
        assert_eq!(transcript.last_assistant_text(), Some("Checking the backlog."));
    }
}
