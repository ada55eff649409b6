//! Memory notes: durable facts the agent carries between turns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryNote {
    pub id: String,
    pub content: String,
    /// Short form used when the budget is tight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Included in every turn's context instead of only when it fits.
    #[serde(default)]
    pub always_append: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields for creating a note.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewNote {
    pub content: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub always_append: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl MemoryNote {
    pub fn new(new: NewNote, now: DateTime<Utc>) -> Self {
        Self {
            id: format!("note-{}", uuid::Uuid::new_v4()),
            content: new.content,
            summary: new.summary,
            always_append: new.always_append,
            tags: new.tags,
            created_at: now,
        }
    }

    /// The summary, or the first line of the content.
    pub fn short_form(&self) -> &str {
        match self.summary.as_deref() {
            Some(summary) if !summary.trim().is_empty() => summary,
            _ => self.content.lines().next().unwrap_or_default(),
        }
    }
}
