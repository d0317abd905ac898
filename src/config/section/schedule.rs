//! `[schedule]` section configuration.
//!
//! Debounce windows for the two job classes and an optional run timeout.
//!
//! # Example
//!
//! ```toml
//! [schedule]
//! check_debounce_ms = 300
//! render_debounce_ms = 1000
//! timeout_ms = 0             # 0: no timeout
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::job::{JobClass, JobSpec};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub check_debounce_ms: u64,
    pub render_debounce_ms: u64,
    pub timeout_ms: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            check_debounce_ms: 300,
            render_debounce_ms: 1000,
            timeout_ms: 0,
        }
    }
}

impl ScheduleConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    pub fn job(&self, class: JobClass) -> JobSpec {
        let debounce = match class {
            JobClass::SyntaxCheck => self.check_debounce_ms,
            JobClass::Render => self.render_debounce_ms,
        };
        JobSpec::new(class, Duration::from_millis(debounce)).with_timeout(self.timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ScheduleConfig::default();
        assert_eq!(config.job(JobClass::SyntaxCheck).debounce, Duration::from_millis(300));
        assert_eq!(config.job(JobClass::Render).debounce, Duration::from_millis(1000));
        assert_eq!(config.timeout(), None);
    }

    #[test]
    fn test_timeout_applies_to_both_classes() {
        let config = ScheduleConfig {
            timeout_ms: 30_000,
            ..Default::default()
        };
        assert_eq!(config.job(JobClass::Render).timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.job(JobClass::SyntaxCheck).timeout, Some(Duration::from_secs(30)));
    }
}
