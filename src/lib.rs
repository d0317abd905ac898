//! scad-live: compile-on-edit for batch CAD compilers.
//!
//! Every compiler run is a fresh worker process. Edits arrive continuously,
//! so each job class keeps at most one pending and one running execution,
//! and only the latest request may commit its results.
//!
//! # Module Structure
//!
//! - `state` - Immutable state tree with structural sharing
//! - `job` - Abortable operations and the debounced single-flight scheduler
//! - `worker` - Worker process protocol, host and runner
//! - `diagnostics` - Compiler stderr → positioned diagnostics
//! - `session` - Wires edits, jobs, workers and state together
//! - `config` - `scad-live.toml`
//! - `cli` - Command-line front end

pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod job;
pub mod logger;
pub mod session;
pub mod state;
pub mod worker;

pub use error::{Error, Result};
