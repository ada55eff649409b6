//! Durable job backlog for Skein.
//!
//! - [`JobStore`]: write-through cache with per-id serialization
//! - [`SqliteJobBackend`]: production storage (sqlx, WAL)
//! - [`InMemoryJobBackend`]: tests and ephemeral sessions
//! - [`JobWorker`]: drains the queue through a [`JobExecutor`]

pub mod in_memory;
pub mod sqlite;
pub mod store;
pub mod worker;

pub use in_memory::InMemoryJobBackend;
pub use sqlite::SqliteJobBackend;
pub use store::JobStore;
pub use worker::{ExecutionError, JobExecutor, JobWorker, WorkOutcome, WorkerStats};
