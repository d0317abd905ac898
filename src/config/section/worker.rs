//! `[worker]` section configuration.
//!
//! Which process hosts each compiler run. By default this executable's own
//! hidden `worker` subcommand.
//!
//! # Example
//!
//! ```toml
//! [worker]
//! program = ""        # empty: current executable
//! args = ["worker"]
//! ```

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::compiler::resolve_program;
use crate::worker::{Compiler, WorkerCommand};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: String::new(),
            args: vec!["worker".into()],
        }
    }
}

impl WorkerConfig {
    /// Build the worker command line for `compiler`.
    ///
    /// A custom program gets its args verbatim; choosing the compiler is then
    /// its own business.
    pub fn command(&self, compiler: &Compiler, root: &Path) -> io::Result<WorkerCommand> {
        if self.program.trim().is_empty() {
            return WorkerCommand::current_exe(&self.args, compiler);
        }
        let program = resolve_program(&self.program, root).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("worker `{}` not found", self.program))
        })?;
        Ok(WorkerCommand::new(program).with_args(self.args.iter().cloned()))
    }
}
