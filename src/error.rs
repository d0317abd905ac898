//! Error types shared by the job, worker and session layers.

use std::time::Duration;

use thiserror::Error;

use crate::worker::OutputLine;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Orchestration errors.
///
/// Compiler diagnostics are never errors: a run that produced its outputs
/// succeeds even when stderr was full of warnings.
#[derive(Debug, Error)]
pub enum Error {
    /// Superseded by a newer request or killed by the caller.
    #[error("job cancelled")]
    Cancelled,

    #[error("job exceeded timeout of {0:?}")]
    Timeout(Duration),

    /// The compiler finished but a requested output file does not exist.
    #[error("missing output `{path}` (exit code {})", exit_code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    MissingOutput {
        path: String,
        exit_code: Option<i32>,
        log: Vec<OutputLine>,
    },

    /// The worker itself failed: could not start, crashed, or broke protocol.
    #[error("worker failed: {message}")]
    Worker {
        message: String,
        log: Vec<OutputLine>,
    },

    #[error("malformed worker message")]
    Protocol(#[from] serde_json::Error),

    #[error("IO error")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn worker(message: impl Into<String>) -> Self {
        Self::Worker {
            message: message.into(),
            log: Vec::new(),
        }
    }

    /// Supersession is not a failure; callers drop these silently.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Output lines captured before the failure, if any.
    pub fn log(&self) -> &[OutputLine] {
        match self {
            Self::MissingOutput { log, .. } | Self::Worker { log, .. } => log,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_output_message() {
        let err = Error::MissingOutput {
            path: "out.stl".into(),
            exit_code: Some(1),
            log: vec![],
        };
        assert_eq!(err.to_string(), "missing output `out.stl` (exit code 1)");

        let err = Error::MissingOutput {
            path: "out.stl".into(),
            exit_code: None,
            log: vec![],
        };
        assert_eq!(err.to_string(), "missing output `out.stl` (exit code none)");
    }

    #[test]
    fn test_log_accessor() {
        let err = Error::Worker {
            message: "boom".into(),
            log: vec![OutputLine::Stderr("partial".into())],
        };
        assert_eq!(err.log().len(), 1);
        assert!(Error::Cancelled.log().is_empty());
        assert!(Error::Cancelled.is_cancelled());
    }
}
