//! Note storage: in memory, optionally mirrored to a JSON-lines file.
//!
//! Notes are loaded on open and the whole file is rewritten on every
//! mutation, so reads never touch the disk. Each line is one `MemoryNote`.

use chrono::Utc;
use skein_core::memory::{MemoryNote, NewNote};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum NoteError {
    #[error("Note storage failed: {0}")]
    Storage(String),

    #[error("Invalid note: {0}")]
    Invalid(String),
}

pub struct NoteStore {
    path: Option<PathBuf>,
    notes: RwLock<Vec<MemoryNote>>,
}

impl Default for NoteStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl NoteStore {
    /// A store that forgets everything when dropped.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            notes: RwLock::new(Vec::new()),
        }
    }

    /// Load notes from `path`. A missing file starts empty; it is created on
    /// the first write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let notes = load_from_disk(&path);
        debug!(path = %path.display(), count = notes.len(), "Note store loaded");
        Self {
            path: Some(path),
            notes: RwLock::new(notes),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn add(&self, new: NewNote) -> Result<MemoryNote, NoteError> {
        if new.content.trim().is_empty() {
            return Err(NoteError::Invalid("content must not be empty".into()));
        }
        let note = MemoryNote::new(new, Utc::now());
        let mut notes = self.notes.write().await;
        notes.push(note.clone());
        if let Err(e) = self.flush(&notes) {
            notes.pop();
            return Err(e);
        }
        debug!(note_id = %note.id, always_append = note.always_append, "Note added");
        Ok(note)
    }

    /// Every note, oldest first.
    pub async fn list(&self) -> Vec<MemoryNote> {
        self.notes.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<MemoryNote> {
        self.notes.read().await.iter().find(|n| n.id == id).cloned()
    }

    pub async fn remove(&self, id: &str) -> Result<bool, NoteError> {
        let mut notes = self.notes.write().await;
        let Some(index) = notes.iter().position(|n| n.id == id) else {
            return Ok(false);
        };
        let removed = notes.remove(index);
        if let Err(e) = self.flush(&notes) {
            notes.insert(index, removed);
            return Err(e);
        }
        Ok(true)
    }

    pub async fn len(&self) -> usize {
        self.notes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.notes.read().await.is_empty()
    }

    fn flush(&self, notes: &[MemoryNote]) -> Result<(), NoteError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| NoteError::Storage(format!("Failed to create notes directory: {e}")))?;
        }

        let mut content = String::new();
        for note in notes {
            let line = serde_json::to_string(note)
                .map_err(|e| NoteError::Storage(format!("Failed to serialize note: {e}")))?;
            content.push_str(&line);
            content.push('\n');
        }
        std::fs::write(path, content)
            .map_err(|e| NoteError::Storage(format!("Failed to write notes file: {e}")))
    }
}

fn load_from_disk(path: &Path) -> Vec<MemoryNote> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<MemoryNote>(line) {
            Ok(note) => Some(note),
            Err(e) => {
                warn!(error = %e, "Skipping corrupted note");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(content: &str) -> NewNote {
        NewNote {
            content: content.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn add_list_remove() {
        let store = NoteStore::in_memory();
        let a = store.add(note("first")).await.unwrap();
        store.add(note("second")).await.unwrap();
        assert_eq!(store.len().await, 2);
        assert!(store.remove(&a.id).await.unwrap());
        assert!(!store.remove(&a.id).await.unwrap());
        assert_eq!(store.list().await[0].content, "second");
    }

    #[tokio::test]
    async fn empty_content_rejected() {
        let store = NoteStore::in_memory();
        assert!(matches!(store.add(note("  ")).await, Err(NoteError::Invalid(_))));
    }

    #[tokio::test]
    async fn notes_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("notes.jsonl");

        let store = NoteStore::open(&path);
        let kept = store.add(note("keep me")).await.unwrap();
        let gone = store.add(note("drop me")).await.unwrap();
        store.remove(&gone.id).await.unwrap();

        let reopened = NoteStore::open(&path);
        assert_eq!(reopened.list().await, vec![kept]);
    }

    #[tokio::test]
    async fn corrupted_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.jsonl");
        let store = NoteStore::open(&path);
        store.add(note("valid")).await.unwrap();
        let mut raw = std::fs::read_to_string(&path).unwrap();
        raw.push_str("{not json\n");
        std::fs::write(&path, raw).unwrap();

        assert_eq!(NoteStore::open(&path).len().await, 1);
    }
}
