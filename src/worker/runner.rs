//! Worker side of the protocol.
//!
//! Runs inside the worker process: materializes the request's inputs into a
//! fresh scratch directory, runs the compiler there, forwards every output
//! line as it arrives, then reads back the requested outputs. Closing the
//! request stream early kills the compiler.
//!
//! The compiler is passed in explicitly; nothing here reads global state.

use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use super::protocol::{Blob, Completed, Failed, OutputLine, Request, WorkerMessage, missing_output_message};

/// Compiler executable plus the arguments placed before every invocation's own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compiler {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Compiler {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// Failure text of a run abandoned because the host closed the request stream.
pub const CANCELLED: &str = "cancelled: request stream closed";

/// Worker entry: read one request line, stream messages to `output`.
///
/// Exactly one terminal message is written, also for a malformed request.
/// The host keeps `input` open while it still wants the result; once it
/// closes, the compiler is killed and the scratch directory removed.
pub async fn serve<R, W>(mut input: R, mut output: W, compiler: &Compiler) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut line = String::new();
    input.read_line(&mut line).await?;

    let terminal = match serde_json::from_str::<Request>(&line) {
        Ok(request) => {
            let mut write_error = None;
            let terminal = execute_until(request, compiler, closed(&mut input), |line| {
                if write_error.is_none()
                    && let Err(e) = write_message(&mut output, &WorkerMessage::Line(line.clone()))
                {
                    write_error = Some(e);
                }
            })
            .await;
            if let Some(e) = write_error {
                return Err(e);
            }
            terminal
        }
        Err(e) => WorkerMessage::Failed(Failed {
            error: format!("malformed request: {e}"),
            merged_outputs: Vec::new(),
        }),
    };

    match write_message(&mut output, &terminal) {
        // Nobody is left to read a cancellation
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe && is_cancelled(&terminal) => Ok(()),
        written => written,
    }
}

/// Resolves once `input` reaches EOF. Bytes after the request line are ignored.
async fn closed<R: AsyncBufRead + Unpin>(input: &mut R) {
    let mut rest = Vec::new();
    loop {
        rest.clear();
        match input.read_until(b'\n', &mut rest).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

fn is_cancelled(message: &WorkerMessage) -> bool {
    matches!(message, WorkerMessage::Failed(Failed { error, .. }) if error == CANCELLED)
}

fn write_message(output: &mut impl Write, message: &WorkerMessage) -> io::Result<()> {
    serde_json::to_writer(&mut *output, message)?;
    output.write_all(b"\n")?;
    output.flush()
}

/// Run one request to its terminal message. `emit` sees every line as it arrives.
pub async fn execute(request: Request, compiler: &Compiler, emit: impl FnMut(&OutputLine)) -> WorkerMessage {
    execute_until(request, compiler, std::future::pending(), emit).await
}

/// Like [`execute`], but gives up as soon as `cancelled` resolves.
///
/// A cancelled run kills the compiler and removes the scratch directory
/// before the [`CANCELLED`] failure is returned.
pub async fn execute_until(
    request: Request,
    compiler: &Compiler,
    cancelled: impl Future<Output = ()>,
    mut emit: impl FnMut(&OutputLine),
) -> WorkerMessage {
    let started = Instant::now();
    let mut log = Vec::new();

    match run(&request, compiler, cancelled, &mut log, &mut emit).await {
        Ok((outputs, exit_code)) => WorkerMessage::Completed(Completed {
            outputs,
            merged_outputs: log,
            exit_code,
            elapsed_millis: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }),
        Err(error) => WorkerMessage::Failed(Failed {
            error,
            merged_outputs: log,
        }),
    }
}

type Outputs = Vec<(String, Blob)>;

async fn run(
    request: &Request,
    compiler: &Compiler,
    cancelled: impl Future<Output = ()>,
    log: &mut Vec<OutputLine>,
    emit: &mut impl FnMut(&OutputLine),
) -> Result<(Outputs, Option<i32>), String> {
    // Dropped on every exit path, taking the inputs and outputs with it
    let scratch = tempfile::Builder::new()
        .prefix("scad-live-")
        .tempdir()
        .map_err(|e| format!("cannot create scratch directory: {e}"))?;

    for (path, content) in &request.inputs {
        let target = scratch_path(scratch.path(), path)?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| format!("cannot write input `{path}`: {e}"))?;
        }
        std::fs::write(&target, &content.0).map_err(|e| format!("cannot write input `{path}`: {e}"))?;
    }

    let mut child = Command::new(&compiler.program)
        .args(&compiler.args)
        .args(&request.args)
        .current_dir(scratch.path())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("failed to start `{}`: {e}", compiler.program.display()))?;

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return Err("compiler output pipes unavailable".to_owned());
    };

    let finished = tokio::select! {
        status = async {
            drain(stdout, stderr, log, emit).await;
            child.wait().await
        } => Some(status),
        () = cancelled => None,
    };
    let Some(status) = finished else {
        // Reap before the scratch directory goes away
        if let Err(e) = child.kill().await {
            crate::debug!("worker"; "cannot kill `{}`: {e}", compiler.program.display());
        }
        return Err(CANCELLED.to_owned());
    };
    let status = status.map_err(|e| format!("failed waiting for `{}`: {e}", compiler.program.display()))?;
    let exit_code = status.code();

    let mut outputs = Vec::new();
    for path in request.output_paths.iter().flatten() {
        let target = scratch_path(scratch.path(), path)?;
        match std::fs::read(&target) {
            Ok(bytes) => outputs.push((path.clone(), Blob(bytes))),
            Err(_) => return Err(missing_output_message(path, exit_code)),
        }
    }

    Ok((outputs, exit_code))
}

/// Forward both pipes line by line until each reaches EOF.
///
/// Lines are split on raw bytes and decoded lossily, so output that is not
/// UTF-8 never stops a pipe from being drained.
async fn drain(
    stdout: impl AsyncRead + Unpin,
    stderr: impl AsyncRead + Unpin,
    log: &mut Vec<OutputLine>,
    emit: &mut impl FnMut(&OutputLine),
) {
    let mut stdout = BufReader::new(stdout);
    let mut stderr = BufReader::new(stderr);
    // Persist across iterations: a read interrupted by the other branch resumes here
    let (mut out_buf, mut err_buf) = (Vec::new(), Vec::new());
    let (mut stdout_open, mut stderr_open) = (true, true);

    while stdout_open || stderr_open {
        let line = tokio::select! {
            read = stdout.read_until(b'\n', &mut out_buf), if stdout_open => {
                match next_line(read, &mut out_buf, &mut stdout_open, "stdout") {
                    Some(Ok(text)) => OutputLine::Stdout(text),
                    Some(Err(e)) => OutputLine::Error(e),
                    None => continue,
                }
            }
            read = stderr.read_until(b'\n', &mut err_buf), if stderr_open => {
                match next_line(read, &mut err_buf, &mut stderr_open, "stderr") {
                    Some(Ok(text)) => OutputLine::Stderr(text),
                    Some(Err(e)) => OutputLine::Error(e),
                    None => continue,
                }
            }
        };
        emit(&line);
        log.push(line);
    }
}

/// Interpret one `read_until` result. `None` means nothing to forward.
fn next_line(
    read: io::Result<usize>,
    buf: &mut Vec<u8>,
    open: &mut bool,
    stream: &str,
) -> Option<Result<String, String>> {
    match read {
        Ok(0) => {
            *open = false;
            (!buf.is_empty()).then(|| Ok(take_line(buf)))
        }
        Ok(_) => Some(Ok(take_line(buf))),
        Err(e) => {
            *open = false;
            Some(Err(format!("unreadable {stream}: {e}")))
        }
    }
}

/// Decode and clear a buffered line, without its line ending.
fn take_line(buf: &mut Vec<u8>) -> String {
    let mut line: &[u8] = buf;
    line = line.strip_suffix(b"\n").unwrap_or(line);
    line = line.strip_suffix(b"\r").unwrap_or(line);
    let text = String::from_utf8_lossy(line).into_owned();
    buf.clear();
    text
}

/// Resolve a request path inside the scratch directory, refusing escapes.
fn scratch_path(root: &Path, path: &str) -> Result<PathBuf, String> {
    let relative = Path::new(path);
    let contained = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if path.is_empty() || !contained {
        return Err(format!("invalid path `{path}`: must be relative to the scratch directory"));
    }
    Ok(root.join(relative))
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::error::Error;

    /// `sh -c SCRIPT sh ARGS...`: request args land in `$1`, `$2`, ...
    fn sh(script: &str) -> Compiler {
        Compiler::new("sh").with_args(["-c", script, "sh"])
    }

    fn request(source: &str, output: Option<&str>) -> Request {
        let mut args = vec!["input.scad".to_owned()];
        if let Some(output) = output {
            args.extend(["-o".to_owned(), output.to_owned()]);
        }
        Request {
            inputs: vec![("input.scad".into(), Blob(source.as_bytes().to_vec()))],
            args,
            output_paths: output.map(|o| vec![o.to_owned()]),
        }
    }

    #[tokio::test]
    async fn test_success_reads_outputs_and_streams_lines() {
        let compiler = sh(r#"echo "ECHO: building"; echo "WARNING: slow in file input.scad, line 1" >&2; cat "$1" > "$3""#);
        let mut seen = Vec::new();
        let message = execute(request("cube(1);", Some("out.stl")), &compiler, |l| seen.push(l.clone())).await;

        let WorkerMessage::Completed(done) = message else {
            panic!("expected success");
        };
        assert_eq!(done.exit_code, Some(0));
        assert_eq!(done.outputs, vec![("out.stl".to_owned(), Blob(b"cube(1);".to_vec()))]);
        assert_eq!(seen, done.merged_outputs);
        assert!(done.merged_outputs.contains(&OutputLine::Stdout("ECHO: building".into())));
        assert!(
            done.merged_outputs
                .contains(&OutputLine::Stderr("WARNING: slow in file input.scad, line 1".into()))
        );
    }

    #[tokio::test]
    async fn test_stream_order_is_preserved_per_stream() {
        let compiler = sh("for i in 1 2 3 4 5; do echo \"line $i\" >&2; done");
        let message = execute(request("", None), &compiler, |_| {}).await;
        let WorkerMessage::Completed(done) = message else {
            panic!("expected success");
        };
        let lines: Vec<_> = done.merged_outputs.iter().map(OutputLine::text).collect();
        assert_eq!(lines, ["line 1", "line 2", "line 3", "line 4", "line 5"]);
    }

    #[tokio::test]
    async fn test_missing_output_is_a_failure() {
        let compiler = sh(r#"echo "ERROR: Parser error: unexpected token in file input.scad, line 2" >&2; exit 1"#);
        let message = execute(request("cube(", Some("out.stl")), &compiler, |_| {}).await;

        let WorkerMessage::Failed(failed) = message else {
            panic!("expected failure");
        };
        assert!(failed.error.starts_with("missing output"));
        assert_eq!(failed.merged_outputs.len(), 1);
        match Error::from(failed) {
            Error::MissingOutput { path, exit_code, .. } => {
                assert_eq!(path, "out.stl");
                assert_eq!(exit_code, Some(1));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_nonzero_exit_with_outputs_still_succeeds() {
        let compiler = sh(r#"echo solid > "$3"; exit 1"#);
        let message = execute(request("x", Some("out.stl")), &compiler, |_| {}).await;
        assert!(matches!(message, WorkerMessage::Completed(Completed { exit_code: Some(1), .. })));
    }

    #[tokio::test]
    async fn test_unstartable_compiler_is_a_failure() {
        let compiler = Compiler::new("/nonexistent/openscad");
        let message = execute(request("x", None), &compiler, |_| {}).await;
        assert!(matches!(message, WorkerMessage::Failed(Failed { ref error, .. }) if error.starts_with("failed to start")));
    }

    #[tokio::test]
    async fn test_input_path_cannot_escape_scratch() {
        let mut req = request("x", None);
        req.inputs[0].0 = "../escape.scad".into();
        let message = execute(req, &sh("true"), |_| {}).await;
        assert!(matches!(message, WorkerMessage::Failed(Failed { ref error, .. }) if error.starts_with("invalid path")));
    }

    #[tokio::test]
    async fn test_nested_inputs_are_materialized() {
        let mut req = request("include <lib/a.scad>", Some("out.txt"));
        req.inputs.push(("lib/a.scad".into(), Blob(b"A".to_vec())));
        let message = execute(req, &sh(r#"cat lib/a.scad > "$3""#), |_| {}).await;
        let WorkerMessage::Completed(done) = message else {
            panic!("expected success");
        };
        assert_eq!(done.outputs[0].1, Blob(b"A".to_vec()));
    }

    #[tokio::test]
    async fn test_serve_writes_lines_then_one_terminal() {
        let req = serde_json::to_string(&request("cube(1);", Some("out.stl"))).unwrap() + "\n";
        // The host keeps its end open until the result arrives
        let (mut host_end, worker_end) = tokio::io::duplex(64 * 1024);
        host_end.write_all(req.as_bytes()).await.unwrap();

        let mut output = Vec::new();
        serve(
            BufReader::new(worker_end),
            &mut output,
            &sh(r#"echo one; echo two; cat "$1" > "$3""#),
        )
        .await
        .unwrap();
        drop(host_end);

        let messages: Vec<WorkerMessage> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], WorkerMessage::Line(OutputLine::Stdout("one".into())));
        assert_eq!(messages[1], WorkerMessage::Line(OutputLine::Stdout("two".into())));
        assert!(messages[2].is_terminal());
    }

    #[tokio::test]
    async fn test_closed_request_stream_kills_compiler() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("survived");
        let scratch = dir.path().join("scratch");
        let compiler = sh(&format!(
            r#"pwd > "{}"; echo started >&2; sleep 1; echo survived > "{}""#,
            scratch.display(),
            marker.display()
        ));

        let req = serde_json::to_string(&request("cube(1);", None)).unwrap() + "\n";
        let (mut host_end, worker_end) = tokio::io::duplex(64 * 1024);
        host_end.write_all(req.as_bytes()).await.unwrap();

        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let mut started_tx = Some(started_tx);
        let worker = tokio::spawn(async move {
            let mut input = BufReader::new(worker_end);
            let mut line = String::new();
            input.read_line(&mut line).await.unwrap();
            let request: Request = serde_json::from_str(&line).unwrap();
            execute_until(request, &compiler, closed(&mut input), |line| {
                if line.text() == "started"
                    && let Some(tx) = started_tx.take()
                {
                    let _ = tx.send(());
                }
            })
            .await
        });

        started_rx.await.unwrap();
        drop(host_end);
        let message = tokio::time::timeout(Duration::from_secs(5), worker).await.unwrap().unwrap();
        assert!(is_cancelled(&message));

        // The scratch directory is gone as soon as the run returns
        let scratch = std::fs::read_to_string(&scratch).unwrap();
        assert!(!Path::new(scratch.trim()).exists());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_invalid_utf8_does_not_hide_later_lines() {
        let compiler = sh(r"printf 'caf\351\n' >&2; echo 'ERROR: boom in file input.scad, line 2' >&2");
        let message = execute(request("x", None), &compiler, |_| {}).await;
        let WorkerMessage::Completed(done) = message else {
            panic!("expected success");
        };
        assert_eq!(
            done.merged_outputs,
            vec![
                OutputLine::Stderr("caf\u{FFFD}".into()),
                OutputLine::Stderr("ERROR: boom in file input.scad, line 2".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_utf8_keeps_pipe_drained() {
        // Far more than a pipe buffer after the undecodable line
        let compiler = sh(r#"printf '\377\n' >&2; i=0; while [ $i -lt 20000 ]; do echo "noise $i" >&2; i=$((i+1)); done"#);
        let message = tokio::time::timeout(Duration::from_secs(30), execute(request("x", None), &compiler, |_| {}))
            .await
            .expect("compiler blocked on a full pipe");
        let WorkerMessage::Completed(done) = message else {
            panic!("expected success");
        };
        assert_eq!(done.merged_outputs.len(), 20001);
        assert_eq!(done.merged_outputs[0], OutputLine::Stderr("\u{FFFD}".into()));
        assert_eq!(done.merged_outputs[20000], OutputLine::Stderr("noise 19999".into()));
    }

    #[test]
    fn test_take_line_strips_line_endings() {
        let mut buf = b"ECHO: 1\r\n".to_vec();
        assert_eq!(take_line(&mut buf), "ECHO: 1");
        assert!(buf.is_empty());
        let mut buf = b"tail".to_vec();
        assert_eq!(take_line(&mut buf), "tail");
    }

    #[tokio::test]
    async fn test_serve_answers_malformed_request() {
        let mut output = Vec::new();
        serve(&b"not json\n"[..], &mut output, &sh("true")).await.unwrap();
        let message: WorkerMessage = serde_json::from_slice(output.trim_ascii_end()).unwrap();
        assert!(matches!(message, WorkerMessage::Failed(Failed { ref error, .. }) if error.starts_with("malformed request")));
    }
}
