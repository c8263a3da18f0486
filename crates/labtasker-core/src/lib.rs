//! Core domain types for the Labtasker task queue.
//!
//! This crate holds everything that is independent of the HTTP layer and the
//! database: entity models, the task/worker state machines, filter documents
//! and their evaluator, the query transpiler, duration parsing, dotted-path
//! utilities, the in-process event hub, errors, and server configuration.

pub mod config;
pub mod error;
pub mod events;
pub mod filter;
pub mod flatten;
pub mod fsm;
pub mod models;
pub mod security;
pub mod timeparse;
pub mod transpiler;

pub use config::ServerConfig;
pub use error::ApiError;
