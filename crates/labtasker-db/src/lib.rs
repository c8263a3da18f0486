//! Transactional storage engine for Labtasker.
//!
//! Three repositories over PostgreSQL (queues, tasks, workers) plus the
//! policy-gated raw collection operations. Every mutation runs inside a
//! transaction; nesting is rejected by default via a task-local flag.

pub mod db;

pub use db::collections::CollectionRepository;
pub use db::queue::QueueRepository;
pub use db::task::{FetchOptions, TaskRepository};
pub use db::transaction::{in_transaction, with_transaction};
pub use db::worker::WorkerRepository;

/// Embedded migrations for the labtasker schema.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
