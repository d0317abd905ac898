//! Diagnostic output parser.
//!
//! Turns the ordered output lines of one compiler run into a readable log
//! plus positioned diagnostics. Lines are classified by a fixed list of
//! stderr shapes; anything else stays in the log verbatim.

mod filter;
mod parse;

use std::fmt;

use serde::Serialize;

pub use filter::{Denylist, strip_ansi};
pub use parse::{DiagnosticParser, parse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
        }
    }

    /// `"1 error"`, `"0 warnings"`.
    pub fn counted(self, n: usize) -> String {
        let suffix = if n == 1 { "" } else { "s" };
        format!("{n} {}{suffix}", self.as_str())
    }
}

/// A compiler message tied to a source line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    /// 1-based, after remapping.
    pub line: u32,
    pub message: String,
    pub file: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}: {}", self.file, self.line, self.severity.as_str(), self.message)
    }
}

/// Undo synthetic lines prepended to the logical source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remap {
    /// Logical source path, as passed to the compiler.
    pub target: String,
    pub lines_to_skip: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedOutput {
    pub log: String,
    pub diagnostics: Vec<Diagnostic>,
}

impl ParsedOutput {
    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    fn count(&self, severity: Severity) -> usize {
        self.diagnostics.iter().filter(|d| d.severity == severity).count()
    }

    /// Diagnostics for terminal display, capped per severity.
    ///
    /// `None` limits show everything.
    pub fn summary(&self, max_errors: Option<usize>, max_warnings: Option<usize>) -> String {
        let mut lines = Vec::new();
        for (severity, max) in [(Severity::Error, max_errors), (Severity::Warning, max_warnings)] {
            let max = max.unwrap_or(usize::MAX);
            let matching = self.diagnostics.iter().filter(|d| d.severity == severity);
            lines.extend(matching.clone().take(max).map(ToString::to_string));
            let remaining = matching.count().saturating_sub(max);
            if remaining > 0 {
                lines.push(format!("... and {remaining} more {}s", severity.as_str()));
            }
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diag(severity: Severity, line: u32) -> Diagnostic {
        Diagnostic {
            severity,
            line,
            message: "m".into(),
            file: "input.scad".into(),
        }
    }

    #[test]
    fn test_counts() {
        let out = ParsedOutput {
            log: String::new(),
            diagnostics: vec![diag(Severity::Error, 1), diag(Severity::Warning, 2), diag(Severity::Warning, 3)],
        };
        assert_eq!(out.error_count(), 1);
        assert_eq!(out.warning_count(), 2);
    }

    #[test]
    fn test_summary_caps_each_severity() {
        let out = ParsedOutput {
            log: String::new(),
            diagnostics: (1..=5).map(|l| diag(Severity::Warning, l)).chain([diag(Severity::Error, 9)]).collect(),
        };
        assert_eq!(
            out.summary(Some(3), Some(2)),
            "input.scad:9: error: m\ninput.scad:1: warning: m\ninput.scad:2: warning: m\n... and 3 more warnings"
        );
        assert_eq!(out.summary(None, None).lines().count(), 6);
    }

    #[test]
    fn test_counted() {
        assert_eq!(Severity::Error.counted(1), "1 error");
        assert_eq!(Severity::Error.counted(0), "0 errors");
        assert_eq!(Severity::Warning.counted(4), "4 warnings");
    }

    #[test]
    fn test_severity_serializes_lowercase() {
        assert_eq!(serde_json::to_value(Severity::Warning).unwrap(), "warning");
    }
}
