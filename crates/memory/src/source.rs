//! Memory notes as context sections.
//!
//! Always-append notes are collected into one `Degrade` section. Its full
//! form carries note contents until their cumulative cost passes the cap,
//! after which remaining notes contribute only their short form; the
//! excerpt and summary rungs use short forms throughout. Every other note is
//! an `OmitIfOverBudget` section of its own.

use crate::store::NoteStore;
use async_trait::async_trait;
use skein_core::context::{CompressionStrategy, ContextSection, SectionSource, TextContent};
use skein_core::memory::MemoryNote;
use skein_core::token::estimate_tokens;
use std::sync::Arc;

pub const PINNED_SECTION_ID: &str = "memory:pinned";

const SUMMARY_CHARS: usize = 240;

pub struct MemorySource {
    store: Arc<NoteStore>,
    always_append_cap: usize,
    pinned_priority: i64,
    note_priority: i64,
}

impl MemorySource {
    pub fn new(store: Arc<NoteStore>, always_append_cap: usize) -> Self {
        Self {
            store,
            always_append_cap,
            pinned_priority: 80,
            note_priority: 20,
        }
    }

    pub fn with_priorities(mut self, pinned: i64, note: i64) -> Self {
        self.pinned_priority = pinned;
        self.note_priority = note;
        self
    }

    fn pinned_section(&self, pinned: &[&MemoryNote]) -> Option<ContextSection> {
        if pinned.is_empty() {
            return None;
        }

        let mut full = String::from("Pinned notes:\n");
        let mut spent = 0;
        let mut degraded = 0;
        for note in pinned {
            let cost = estimate_tokens(&note.content);
            if spent + cost <= self.always_append_cap {
                spent += cost;
                full.push_str(&format!("- {}\n", note.content));
            } else {
                degraded += 1;
                spent += estimate_tokens(note.short_form());
                full.push_str(&format!("- {}\n", note.short_form()));
            }
        }
        if degraded > 0 {
            tracing::debug!(degraded, cap = self.always_append_cap, "Pinned notes past cap use short forms");
        }

        let short_forms: Vec<&str> = pinned.iter().map(|n| n.short_form()).collect();
        let excerpt = format!("Pinned notes:\n- {}\n", short_forms.join("\n- "));
        let mut summary = format!("Pinned notes: {}", short_forms.join("; "));
        if summary.chars().count() > SUMMARY_CHARS {
            summary = summary.chars().take(SUMMARY_CHARS).collect::<String>() + "…";
        }

        Some(ContextSection::text(
            PINNED_SECTION_ID,
            self.pinned_priority,
            CompressionStrategy::Degrade,
            TextContent::new(full.trim_end())
                .with_excerpt(excerpt.trim_end())
                .with_summary(summary),
        ))
    }
}

#[async_trait]
impl SectionSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn sections(&self) -> Vec<ContextSection> {
        let notes = self.store.list().await;
        let (pinned, others): (Vec<&MemoryNote>, Vec<&MemoryNote>) =
            notes.iter().partition(|n| n.always_append);

        let mut sections: Vec<ContextSection> = self.pinned_section(&pinned).into_iter().collect();
        sections.extend(others.into_iter().map(|note| {
            ContextSection::text(
                format!("memory:{}", note.id),
                self.note_priority,
                CompressionStrategy::OmitIfOverBudget,
                TextContent::new(format!("Note: {}", note.content)),
            )
        }));
        sections
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_core::context::Fidelity;
    use skein_core::memory::NewNote;

    async fn store_with(notes: &[(&str, Option<&str>, bool)]) -> Arc<NoteStore> {
        let store = NoteStore::in_memory();
        for (content, summary, always_append) in notes {
            store
                .add(NewNote {
                    content: (*content).into(),
                    summary: summary.map(String::from),
                    always_append: *always_append,
                    tags: vec![],
                })
                .await
                .unwrap();
        }
        Arc::new(store)
    }

    #[tokio::test]
    async fn empty_store_yields_no_sections() {
        let source = MemorySource::new(Arc::new(NoteStore::in_memory()), 100);
        assert!(source.sections().await.is_empty());
    }

    #[tokio::test]
    async fn pinned_notes_form_one_degradable_section() {
        let store = store_with(&[
            ("User prefers tabs", None, true),
            ("Project uses Rust 2024", None, true),
            ("Met on Tuesday", None, false),
        ])
        .await;
        let sections = MemorySource::new(store, 1000).sections().await;
        assert_eq!(sections.len(), 2);

        let pinned = &sections[0];
        assert_eq!(pinned.id, PINNED_SECTION_ID);
        assert_eq!(pinned.strategy, CompressionStrategy::Degrade);
        let full = pinned.render(Fidelity::Full).unwrap();
        assert!(full.contains("User prefers tabs"));
        assert!(full.contains("Project uses Rust 2024"));

        assert_eq!(sections[1].strategy, CompressionStrategy::OmitIfOverBudget);
        assert!(sections[1].id.starts_with("memory:note-"));
    }

    #[tokio::test]
    async fn pinned_notes_past_cap_fall_back_to_summaries() {
        let long = "x".repeat(400);
        let store = store_with(&[
            ("short pinned fact", None, true),
            (long.as_str(), Some("long note, summarized"), true),
        ])
        .await;
        let sections = MemorySource::new(store, 20).sections().await;
        let full = sections[0].render(Fidelity::Full).unwrap();
        assert!(full.contains("short pinned fact"));
        assert!(full.contains("long note, summarized"));
        assert!(!full.contains(&long));

        let summary = sections[0].render(Fidelity::Summary).unwrap();
        assert!(summary.starts_with("Pinned notes: short pinned fact"));
    }
}
