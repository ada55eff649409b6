use crate::handler::{ResolvedPaths, ToolOutput, TypedTool};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use skein_core::error::ToolFailure;
use skein_core::memory::NewNote;
use skein_memory::{NoteError, NoteStore};
use std::sync::Arc;

/// Saves a note the context assembler can draw on in later turns.
pub struct CreateMemory {
    store: Arc<NoteStore>,
}

impl CreateMemory {
    pub fn new(store: Arc<NoteStore>) -> Self {
        Self { store }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateMemoryArgs {
    content: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    always_append: bool,
    #[serde(default)]
    tags: Vec<String>,
}

#[async_trait]
impl TypedTool for CreateMemory {
    type Args = CreateMemoryArgs;

    fn name(&self) -> &str {
        "create_memory"
    }

    fn description(&self) -> &str {
        "Remember a note across turns. Pinned notes (always_append) are included in every context."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "content": {"type": "string"},
                "summary": {"type": "string", "description": "One-line form used when space is short"},
                "always_append": {"type": "boolean"},
                "tags": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["content"]
        })
    }

    async fn run(&self, args: CreateMemoryArgs, _paths: &ResolvedPaths) -> Result<ToolOutput, ToolFailure> {
        let note = self
            .store
            .add(NewNote {
                content: args.content,
                summary: args.summary,
                always_append: args.always_append,
                tags: args.tags,
            })
            .await
            .map_err(|e| match e {
                NoteError::Invalid(reason) => ToolFailure::invalid_arguments(reason),
                NoteError::Storage(reason) => ToolFailure::ExecutionFailed {
                    tool_name: self.name().into(),
                    reason,
                },
            })?;
        let pinned = if note.always_append { " (pinned)" } else { "" };
        Ok(ToolOutput::text(format!("Saved note {}{pinned}", note.id)).with_data(json!({"id": note.id})))
    }
}
