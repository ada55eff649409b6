//! Memory notes for Skein.
//!
//! [`NoteStore`] keeps notes (optionally mirrored to a JSONL file) and
//! [`MemorySource`] turns them into context sections, applying the
//! always-append policy.

pub mod source;
pub mod store;

pub use source::{MemorySource, PINNED_SECTION_ID};
pub use store::{NoteError, NoteStore};
