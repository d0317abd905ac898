//! `[diagnostics]` section configuration.
//!
//! Controls warning/error display and which compiler lines are dropped.
//!
//! # Example
//!
//! ```toml
//! [diagnostics]
//! max_errors = 3                   # Max errors to display (default: 3)
//! max_warnings = 3                 # Max warnings to display (default: 3)
//! denylist = ["DEPRECATED:"]       # Extra line prefixes to drop from the log
//! ```

use serde::{Deserialize, Serialize};

use crate::diagnostics::{Denylist, DiagnosticParser};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Maximum errors to display (None = unlimited).
    pub max_errors: Option<usize>,

    /// Maximum warnings to display (None = unlimited).
    pub max_warnings: Option<usize>,

    pub denylist: Vec<String>,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            max_errors: Some(3),
            max_warnings: Some(3),
            denylist: Vec::new(),
        }
    }
}

impl DiagnosticsConfig {
    pub fn parser(&self) -> DiagnosticParser {
        DiagnosticParser::new(Denylist::new(self.denylist.iter().cloned()))
    }
}
