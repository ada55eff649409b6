//! The agent execution loop for Skein.
//!
//! A turn follows the cycle:
//!
//! 1. **Build context** from the section sources and the transcript
//! 2. **Stream the model** and parse its output into events
//! 3. **Execute tools** the model called, concurrently
//! 4. **Append results** to the transcript and loop back to step 1
//!
//! The loop ends when the model answers without tool calls, a call needs
//! approval, a halting failure occurs, or the iteration limit is reached.

pub mod context;
pub mod sources;
pub mod turn;

pub use context::{ContextAssembler, DEFAULT_CONTEXT_BUDGET, assemble};
pub use sources::{Entry, StaticSource, Transcript};
pub use turn::{DEFAULT_MAX_ITERATIONS, TurnConfig, TurnController, TurnError, TurnOutcome, TurnPhase};
