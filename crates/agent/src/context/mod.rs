//! Context assembly: turns a pool of candidate sections into a budgeted
//! prompt. See [`assembler`] for the algorithm.

pub mod assembler;

pub use assembler::{ContextAssembler, DEFAULT_CONTEXT_BUDGET, assemble};
