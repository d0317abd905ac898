//! Compiler stderr → positioned diagnostics.

use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::filter::{Denylist, strip_ansi};
use super::{Diagnostic, ParsedOutput, Remap, Severity};
use crate::worker::OutputLine;

/// One stderr shape. Captures: `severity`, `file`, `line`, `message`.
struct Rule {
    re: Regex,
}

impl Rule {
    fn new(pattern: &str) -> Self {
        Self {
            re: Regex::new(pattern).unwrap(),
        }
    }

    fn apply(&self, line: &str) -> Option<Diagnostic> {
        let caps = self.re.captures(line)?;
        let field = |caps: &Captures<'_>, name| caps.name(name).map_or("", |m| m.as_str()).trim().to_owned();

        let severity = match caps.name("severity")?.as_str() {
            "ERROR" => Severity::Error,
            _ => Severity::Warning,
        };
        Some(Diagnostic {
            severity,
            line: caps.name("line")?.as_str().parse().ok()?,
            message: field(&caps, "message"),
            file: field(&caps, "file"),
        })
    }
}

/// Tried in order; the first match wins.
static RULES: LazyLock<[Rule; 3]> = LazyLock::new(|| {
    [
        // ERROR: Parser error in file "input.scad", line 5: syntax error
        Rule::new(r#"^(?P<severity>ERROR|WARNING): Parser error in file "(?P<file>[^"]+)", line (?P<line>\d+): (?P<message>.*)$"#),
        // WARNING: Ignoring unknown variable 'x' in file "input.scad", line 3
        Rule::new(r#"^(?P<severity>ERROR|WARNING): (?P<message>.+?),? in file "(?P<file>[^"]+)", line (?P<line>\d+)\.?$"#),
        // ERROR: Parser error: unexpected token in file input.scad, line 2
        Rule::new(r"^(?P<severity>ERROR|WARNING): (?P<message>.+?),? in file (?P<file>[^,]+), line (?P<line>\d+)\.?$"),
    ]
});

fn match_rules(line: &str) -> Option<Diagnostic> {
    RULES.iter().find_map(|rule| rule.apply(line))
}

/// Stateless parser configured with a denylist.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticParser {
    denylist: Denylist,
}

impl DiagnosticParser {
    pub fn new(denylist: Denylist) -> Self {
        Self { denylist }
    }

    /// Classify `events` into a log and diagnostics.
    ///
    /// Pure: the same input always yields the same output.
    pub fn parse(&self, events: &[OutputLine], remap: Option<&Remap>) -> ParsedOutput {
        let mut log = Vec::new();
        let mut diagnostics = Vec::new();

        for event in events {
            let raw = event.text();
            let plain = strip_ansi(raw);
            if self.denylist.is_denied(plain.trim()) {
                continue;
            }

            match event {
                OutputLine::Stderr(_) => match match_rules(plain.trim()) {
                    Some(mut diagnostic) => {
                        if let Some(remap) = remap {
                            remap.apply(&mut diagnostic);
                        }
                        diagnostics.push(diagnostic);
                    }
                    None => log.push(raw.to_owned()),
                },
                OutputLine::Stdout(_) | OutputLine::Error(_) => log.push(raw.to_owned()),
            }
        }

        let mut output = ParsedOutput {
            log: String::new(),
            diagnostics,
        };
        if !output.diagnostics.is_empty() {
            log.insert(0, banner(output.error_count(), output.warning_count()));
        }
        output.log = log.join("\n");
        output
    }
}

/// Parse with the built-in denylist only.
pub fn parse(events: &[OutputLine], remap: Option<&Remap>) -> ParsedOutput {
    DiagnosticParser::default().parse(events, remap)
}

fn banner(errors: usize, warnings: usize) -> String {
    format!("{}, {}", Severity::Error.counted(errors), Severity::Warning.counted(warnings))
}

impl Remap {
    pub fn new(target: impl Into<String>, lines_to_skip: u32) -> Self {
        Self {
            target: target.into(),
            lines_to_skip,
        }
    }

    /// Count the preamble's lines, so a preamble of `n` lines shifts by `n`.
    pub fn for_preamble(target: impl Into<String>, preamble: &str) -> Self {
        let lines = if preamble.is_empty() {
            0
        } else {
            preamble.lines().count()
        };
        Self::new(target, u32::try_from(lines).unwrap_or(u32::MAX))
    }

    /// Reported paths may be absolute inside the worker's scratch directory.
    fn matches(&self, file: &str) -> bool {
        file == self.target || Path::new(file).ends_with(&self.target)
    }

    fn apply(&self, diagnostic: &mut Diagnostic) {
        if self.matches(&diagnostic.file) {
            diagnostic.line = diagnostic.line.saturating_sub(self.lines_to_skip).max(1);
        }
    }
}
