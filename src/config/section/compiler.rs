//! `[compiler]` section configuration.
//!
//! The batch compiler each worker runs.
//!
//! # Example
//!
//! ```toml
//! [compiler]
//! program = "openscad"      # PATH lookup; `~` expanded, relative paths from the config dir
//! args = ["--hardwarnings"] # placed before every invocation's own args
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::worker::Compiler;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            program: "openscad".into(),
            args: Vec::new(),
        }
    }
}

impl CompilerConfig {
    /// Resolve the program to an executable path. Relative paths start at `root`.
    pub fn resolve(&self, root: &Path) -> Result<Compiler, ConfigError> {
        let program = resolve_program(&self.program, root)
            .ok_or_else(|| ConfigError::Validation(format!("compiler `{}` not found", self.program)))?;
        Ok(Compiler::new(program).with_args(self.args.iter().cloned()))
    }
}

/// `~` expansion, then a PATH lookup for bare names.
pub(crate) fn resolve_program(program: &str, root: &Path) -> Option<PathBuf> {
    let expanded = shellexpand::tilde(program.trim()).into_owned();
    if expanded.is_empty() {
        return None;
    }
    which::which_in(&expanded, std::env::var_os("PATH"), root).ok()
}
