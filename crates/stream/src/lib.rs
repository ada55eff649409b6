//! Incremental parsing of model output.
//!
//! [`StreamParser`] consumes raw chunks as they arrive from a model client and
//! yields typed [`StreamEvent`](skein_core::StreamEvent)s: text deltas, tool
//! call lifecycle events, turn completion and in-band errors.

pub mod marker;
pub mod parser;

pub use parser::{DEFAULT_MAX_ARGUMENT_BYTES, ParserStats, RUN_FLUSH_BYTES, StreamParser};
