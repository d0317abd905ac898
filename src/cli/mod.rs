//! Command-line interface module.
//!
//! - `watch` - interactive loop over one source file
//! - `render` - one-shot render and check
//! - `worker` - hidden worker process entry
//! - `common` - config loading, session setup, shutdown signal

mod args;
pub mod common;
pub mod render;
pub mod watch;
pub mod worker;

pub use args::{Cli, Commands, JobArgs};
