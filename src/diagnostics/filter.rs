//! Line filtering for compiler output.
//!
//! Drops known benign lines before they reach the log, so the log only
//! carries what the user needs to read.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

/// Prefix-based skip list.
pub struct FilterRule {
    /// Prefixes to drop, matched against the ANSI-stripped, trimmed line.
    pub skip_prefixes: &'static [&'static str],
}

impl FilterRule {
    pub const fn new(skip_prefixes: &'static [&'static str]) -> Self {
        Self { skip_prefixes }
    }

    fn should_skip(&self, line: &str) -> bool {
        self.skip_prefixes.iter().any(|p| line.starts_with(p))
    }
}

/// Informational noise OpenSCAD prints on otherwise healthy runs.
pub const BENIGN_WARNINGS: FilterRule = FilterRule::new(&[
    "Could not initialize localization",
    "Fontconfig warning",
    "Fontconfig error",
    "QStandardPaths: XDG_RUNTIME_DIR not set",
    "WARNING: Viewall and autocenter disabled in favor of $vp*",
    "Saved backup file:",
]);

/// Built-in rule plus user-configured prefixes.
#[derive(Debug, Clone, Default)]
pub struct Denylist {
    extra: Vec<String>,
}

impl Denylist {
    pub fn new<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            extra: extra.into_iter().map(Into::into).filter(|p: &String| !p.is_empty()).collect(),
        }
    }

    /// `line` must already be ANSI-stripped and trimmed.
    pub fn is_denied(&self, line: &str) -> bool {
        BENIGN_WARNINGS.should_skip(line) || self.extra.iter().any(|p| line.starts_with(p.as_str()))
    }
}

/// Strip ANSI color codes.
pub fn strip_ansi(s: &str) -> Cow<'_, str> {
    static RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*m").unwrap());
    RE.replace_all(s, "")
}
