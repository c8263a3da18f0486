//! Client-side runtime for Labtasker workers.
//!
//! The centerpiece is the job loop ([`runner`]): fetch a task, start the
//! heartbeat sender, resolve declared arguments, run the user function,
//! and report the outcome, with automatic failure capture and idempotent
//! finishing. Supporting modules cover client configuration, run-artifact
//! paths, command-template interpolation, and sensitive-text redaction.

pub mod config;
pub mod heartbeat;
pub mod interpolate;
pub mod paths;
pub mod redact;
pub mod runner;

pub use config::ClientConfig;
pub use heartbeat::HeartbeatHandle;
pub use runner::{JobContext, JobLoop, Required};
