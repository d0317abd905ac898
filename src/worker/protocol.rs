//! Wire messages exchanged between host and worker.
//!
//! One JSON object per line. The host writes a single [`Request`]; the worker
//! answers with zero or more streamed lines followed by exactly one terminal
//! message:
//!
//! ```text
//! host  → {"inputs":[["input.scad","Y3ViZSgxKQ=="]],"args":["input.scad","-o","out.stl"],"outputPaths":["out.stl"]}
//! worker→ {"stderr":"Compiling design (CSG Tree generation)..."}
//! worker→ {"outputs":[["out.stl","c29saWQ="]],"mergedOutputs":[...],"exitCode":0,"elapsedMillis":412}
//! ```
//!
//! Binary payloads travel as base64 strings.

use std::fmt;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

// ============================================================================
// Output lines
// ============================================================================

/// One line of worker output, in emission order.
///
/// Serialized externally tagged: `{"stdout": s}`, `{"stderr": s}`, `{"error": s}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputLine {
    Stdout(String),
    Stderr(String),
    /// Internal failure text from the worker, not the compiler.
    Error(String),
}

impl OutputLine {
    pub fn text(&self) -> &str {
        match self {
            Self::Stdout(s) | Self::Stderr(s) | Self::Error(s) => s,
        }
    }

    pub const fn stream(&self) -> &'static str {
        match self {
            Self::Stdout(_) => "stdout",
            Self::Stderr(_) => "stderr",
            Self::Error(_) => "error",
        }
    }
}

// ============================================================================
// Blob
// ============================================================================

/// Raw bytes carried as a base64 string.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Blob(pub Vec<u8>);

impl Blob {
    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for Blob {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blob({} bytes)", self.0.len())
    }
}

impl Serialize for Blob {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Blob {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Blob)
            .map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Request
// ============================================================================

/// The one message a worker receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// `[path, content]` pairs, materialized relative to the scratch directory.
    pub inputs: Vec<(String, Blob)>,
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_paths: Option<Vec<String>>,
}

// ============================================================================
// Worker → host
// ============================================================================

/// Terminal success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completed {
    pub outputs: Vec<(String, Blob)>,
    pub merged_outputs: Vec<OutputLine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub elapsed_millis: u64,
}

/// Terminal failure, with whatever was captured before it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Failed {
    pub error: String,
    pub merged_outputs: Vec<OutputLine>,
}

/// Any message a worker writes to stdout.
///
/// Terminal shapes are tried first: a streamed line never carries
/// `outputs` or `mergedOutputs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkerMessage {
    Completed(Completed),
    Failed(Failed),
    Line(OutputLine),
}

impl WorkerMessage {
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Line(_))
    }
}

// ============================================================================
// Host-side result
// ============================================================================

/// Terminal outcome of one successful invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationResult {
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
    pub outputs: Vec<(String, Vec<u8>)>,
    pub log: Vec<OutputLine>,
}

impl InvocationResult {
    pub fn output(&self, path: &str) -> Option<&[u8]> {
        self.outputs
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, bytes)| bytes.as_slice())
    }
}

impl From<Completed> for InvocationResult {
    fn from(done: Completed) -> Self {
        Self {
            exit_code: done.exit_code,
            elapsed: Duration::from_millis(done.elapsed_millis),
            outputs: done
                .outputs
                .into_iter()
                .map(|(path, blob)| (path, blob.into_inner()))
                .collect(),
            log: done.merged_outputs,
        }
    }
}

impl From<Failed> for Error {
    /// Missing-output failures keep their own variant; everything else is a worker failure.
    fn from(failed: Failed) -> Self {
        match parse_missing_output(&failed.error) {
            Some((path, exit_code)) => Self::MissingOutput {
                path,
                exit_code,
                log: failed.merged_outputs,
            },
            None => Self::Worker {
                message: failed.error,
                log: failed.merged_outputs,
            },
        }
    }
}

/// Failure text for a requested output that was not produced.
///
/// Same wording as [`Error::MissingOutput`], so both ends agree on one format.
pub fn missing_output_message(path: &str, exit_code: Option<i32>) -> String {
    Error::MissingOutput {
        path: path.to_owned(),
        exit_code,
        log: Vec::new(),
    }
    .to_string()
}

/// Inverse of [`missing_output_message`].
fn parse_missing_output(message: &str) -> Option<(String, Option<i32>)> {
    let rest = message.strip_prefix("missing output `")?;
    let (path, rest) = rest.split_once("` (exit code ")?;
    let code = rest.strip_suffix(')')?;
    let exit_code = match code {
        "none" => None,
        n => Some(n.parse().ok()?),
    };
    Some((path.to_owned(), exit_code))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_output_line_shape() {
        let line = OutputLine::Stderr("WARNING: x".into());
        assert_eq!(serde_json::to_value(&line).unwrap(), json!({"stderr": "WARNING: x"}));
        let line: OutputLine = serde_json::from_value(json!({"error": "boom"})).unwrap();
        assert_eq!(line, OutputLine::Error("boom".into()));
    }

    #[test]
    fn test_request_shape() {
        let request = Request {
            inputs: vec![("input.scad".into(), Blob(b"cube(1)".to_vec()))],
            args: vec!["input.scad".into(), "-o".into(), "out.stl".into()],
            output_paths: Some(vec!["out.stl".into()]),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "inputs": [["input.scad", "Y3ViZSgxKQ=="]],
                "args": ["input.scad", "-o", "out.stl"],
                "outputPaths": ["out.stl"],
            })
        );

        let bare: Request = serde_json::from_value(json!({"inputs": [], "args": []})).unwrap();
        assert_eq!(bare.output_paths, None);
        assert!(!serde_json::to_string(&bare).unwrap().contains("outputPaths"));
    }

    #[test]
    fn test_terminal_success_shape() {
        let message = WorkerMessage::Completed(Completed {
            outputs: vec![("out.stl".into(), Blob(b"solid".to_vec()))],
            merged_outputs: vec![OutputLine::Stdout("ok".into())],
            exit_code: Some(0),
            elapsed_millis: 12,
        });
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "outputs": [["out.stl", "c29saWQ="]],
                "mergedOutputs": [{"stdout": "ok"}],
                "exitCode": 0,
                "elapsedMillis": 12,
            })
        );
    }

    #[test]
    fn test_message_discrimination() {
        let parse = |v: serde_json::Value| serde_json::from_value::<WorkerMessage>(v).unwrap();

        assert_eq!(
            parse(json!({"stdout": "hi"})),
            WorkerMessage::Line(OutputLine::Stdout("hi".into()))
        );
        // `error` alone is a line; with `mergedOutputs` it is terminal
        assert_eq!(
            parse(json!({"error": "oops"})),
            WorkerMessage::Line(OutputLine::Error("oops".into()))
        );
        let failed = parse(json!({"error": "oops", "mergedOutputs": [{"stderr": "e"}]}));
        assert!(failed.is_terminal());
        assert!(matches!(failed, WorkerMessage::Failed(Failed { ref error, .. }) if error == "oops"));

        let done = parse(json!({"outputs": [], "mergedOutputs": [], "elapsedMillis": 3}));
        assert!(matches!(done, WorkerMessage::Completed(Completed { exit_code: None, .. })));
    }

    #[test]
    fn test_bad_base64_is_rejected() {
        let result = serde_json::from_value::<Request>(json!({"inputs": [["a", "!!"]], "args": []}));
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_output_round_trips_through_failure_text() {
        let failed = Failed {
            error: missing_output_message("out.stl", Some(1)),
            merged_outputs: vec![OutputLine::Stderr("ERROR: x".into())],
        };
        match Error::from(failed) {
            Error::MissingOutput { path, exit_code, log } => {
                assert_eq!(path, "out.stl");
                assert_eq!(exit_code, Some(1));
                assert_eq!(log.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }

        let failed = Failed {
            error: "failed to start `openscad`".into(),
            merged_outputs: vec![],
        };
        assert!(matches!(Error::from(failed), Error::Worker { .. }));
    }

    #[test]
    fn test_invocation_result_lookup() {
        let result = InvocationResult::from(Completed {
            outputs: vec![("out.stl".into(), Blob(vec![1, 2]))],
            merged_outputs: vec![],
            exit_code: Some(0),
            elapsed_millis: 1500,
        });
        assert_eq!(result.output("out.stl"), Some(&[1u8, 2][..]));
        assert_eq!(result.output("out.off"), None);
        assert_eq!(result.elapsed, Duration::from_millis(1500));
    }
}
