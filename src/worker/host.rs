//! Host side of the protocol: one fresh worker process per invocation.
//!
//! ```text
//! invoke ──spawn──▶ worker ◀── request line (stdin)
//!    │                 │
//!    │                 ├──▶ {"stdout"|"stderr": ..}   forwarded to LineStream
//!    │                 └──▶ terminal message          settles the Abortable
//!    │
//!    └── kill() ──▶ stream closed, stdin closed ──▶ worker kills its compiler
//!                                      └─ still alive after a grace period: killed
//! ```

use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{ChildStderr, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};

use super::protocol::{InvocationResult, OutputLine, Request, WorkerMessage};
use super::runner::Compiler;
use super::source::{FileSource, Invocation};
use crate::error::{Error, Result};
use crate::job::Abortable;

/// How long a worker may linger after its terminal message, or after stdin closed.
const EXIT_GRACE: Duration = Duration::from_secs(1);

/// Lines of worker stderr kept for failure messages.
const STDERR_TAIL: usize = 20;

/// Command line that starts a worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
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

    /// This executable's hidden worker subcommand, running `compiler`.
    pub fn current_exe(worker_args: &[String], compiler: &Compiler) -> io::Result<Self> {
        let program = std::env::current_exe()?;
        Ok(Self::new(program)
            .with_args(worker_args.iter().cloned())
            .with_compiler(compiler))
    }

    /// Append `--compiler` / `--compiler-arg` flags understood by the worker subcommand.
    pub fn with_compiler(self, compiler: &Compiler) -> Self {
        let program = format!("--compiler={}", compiler.program.display());
        let args = compiler.args.iter().map(|a| format!("--compiler-arg={a}"));
        self.with_args(std::iter::once(program).chain(args))
    }
}

/// Streamed output of one invocation.
///
/// Yields `None` once the worker finished or the invocation was killed;
/// lines still buffered at kill time are dropped.
#[derive(Debug)]
pub struct LineStream {
    rx: mpsc::UnboundedReceiver<OutputLine>,
    killed: Arc<AtomicBool>,
}

impl LineStream {
    pub async fn recv(&mut self) -> Option<OutputLine> {
        if self.killed.load(Ordering::Acquire) {
            return None;
        }
        let line = self.rx.recv().await?;
        (!self.killed.load(Ordering::Acquire)).then_some(line)
    }
}

/// A running invocation: its eventual result plus the live line stream.
#[derive(Debug)]
pub struct InvocationHandle {
    pub result: Abortable<InvocationResult>,
    pub lines: LineStream,
}

/// Spawns workers. Cheap to clone.
#[derive(Clone)]
pub struct WorkerHost {
    command: Arc<WorkerCommand>,
    source: Arc<dyn FileSource>,
}

impl WorkerHost {
    pub fn new(command: WorkerCommand, source: Arc<dyn FileSource>) -> Self {
        Self {
            command: Arc::new(command),
            source,
        }
    }

    pub fn command(&self) -> &WorkerCommand {
        &self.command
    }

    /// Start one worker for `invocation`.
    ///
    /// Referenced inputs are resolved first; a read failure settles the
    /// result immediately without spawning anything.
    pub fn invoke(&self, invocation: &Invocation) -> InvocationHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let killed = Arc::new(AtomicBool::new(false));
        let lines = LineStream {
            rx,
            killed: Arc::clone(&killed),
        };

        let request = match invocation.to_request(self.source.as_ref()) {
            Ok(request) => request,
            Err(e) => {
                return InvocationHandle {
                    result: Abortable::ready(Err(e)),
                    lines,
                };
            }
        };

        let command = Arc::clone(&self.command);
        let result = Abortable::new(|settle| {
            let (cancel, cancelled) = oneshot::channel();
            tokio::spawn(async move {
                settle.settle(run_worker(&command, &request, tx, cancelled).await);
            });
            move || {
                killed.store(true, Ordering::Release);
                // The task stays alive to shut the worker down
                let _ = cancel.send(());
            }
        });

        InvocationHandle { result, lines }
    }
}

async fn run_worker(
    command: &WorkerCommand,
    request: &Request,
    lines: mpsc::UnboundedSender<OutputLine>,
    cancelled: oneshot::Receiver<()>,
) -> Result<InvocationResult> {
    let mut child = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::worker(format!("failed to start worker `{}`: {e}", command.program.display())))?;

    let (Some(mut stdin), Some(stdout), Some(stderr)) = (child.stdin.take(), child.stdout.take(), child.stderr.take())
    else {
        return Err(Error::worker("worker pipes unavailable"));
    };
    crate::debug!("worker"; "spawned pid {}", child.id().unwrap_or_default());

    let stderr_tail = tokio::spawn(collect_tail(stderr));

    let mut payload = serde_json::to_vec(request)?;
    payload.push(b'\n');
    let mut reader = BufReader::new(stdout).lines();
    let mut streamed = Vec::new();

    // Stdin stays open until the terminal message: closing it cancels the worker
    let exchange = async {
        // A worker that dies before reading still gets reported below, with its stderr
        if let Err(e) = stdin.write_all(&payload).await {
            crate::debug!("worker"; "request not delivered: {e}");
        }
        next_terminal(&mut reader, &lines, &mut streamed).await
    };
    let terminal = tokio::select! {
        terminal = exchange => Some(terminal),
        _ = cancelled => None,
    };
    drop(stdin);
    drop(lines);

    let Some(terminal) = terminal else {
        crate::debug!("worker"; "cancelled, closing request stream");
        if tokio::time::timeout(EXIT_GRACE, child.wait()).await.is_err() {
            crate::debug!("worker"; "worker ignored cancellation, killing");
            let _ = child.kill().await;
        }
        return Err(Error::Cancelled);
    };
    let terminal = terminal?;

    let exit = async {
        while let Ok(Some(extra)) = reader.next_line().await {
            if !extra.trim().is_empty() {
                crate::debug!("worker"; "ignoring message after terminal: {extra}");
            }
        }
        child.wait().await
    };
    let exited = tokio::time::timeout(EXIT_GRACE, exit).await;
    let status = match exited {
        Ok(Ok(status)) => Some(status),
        Ok(Err(e)) => {
            crate::debug!("worker"; "wait failed: {e}");
            None
        }
        Err(_) => {
            crate::debug!("worker"; "worker lingered after output closed, killing");
            let _ = child.start_kill();
            None
        }
    };

    match terminal {
        Some(WorkerMessage::Completed(done)) => Ok(done.into()),
        Some(WorkerMessage::Failed(failed)) => Err(failed.into()),
        _ => {
            let tail = match tokio::time::timeout(EXIT_GRACE, stderr_tail).await {
                Ok(Ok(tail)) => tail,
                _ => Vec::new(),
            };
            Err(Error::Worker {
                message: exited_without_result(status, &tail),
                log: streamed,
            })
        }
    }
}

/// Forward streamed lines until the terminal message, or `None` at EOF.
async fn next_terminal(
    reader: &mut Lines<BufReader<ChildStdout>>,
    lines: &mpsc::UnboundedSender<OutputLine>,
    streamed: &mut Vec<OutputLine>,
) -> Result<Option<WorkerMessage>> {
    while let Some(line) = reader.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let message: WorkerMessage = serde_json::from_str(&line).map_err(|e| Error::Worker {
            message: format!("malformed worker message: {e}"),
            log: streamed.clone(),
        })?;
        match message {
            WorkerMessage::Line(line) => {
                // Receiver gone only means nobody is watching live output
                let _ = lines.send(line.clone());
                streamed.push(line);
            }
            done => return Ok(Some(done)),
        }
    }
    Ok(None)
}

fn exited_without_result(status: Option<ExitStatus>, stderr_tail: &[String]) -> String {
    let status = status.map_or_else(|| "unknown status".to_owned(), |s| s.to_string());
    let mut message = format!("worker exited without a result ({status})");
    if !stderr_tail.is_empty() {
        message.push_str(": ");
        message.push_str(&stderr_tail.join(" | "));
    }
    message
}

/// Keep the last few stderr lines of a worker for failure messages.
///
/// Decodes lossily so a stray byte never stops the pipe from draining.
async fn collect_tail(stderr: ChildStderr) -> Vec<String> {
    let mut tail = VecDeque::with_capacity(STDERR_TAIL);
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    while let Ok(n) = reader.read_until(b'\n', &mut buf).await {
        if n == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf).trim().to_owned();
        buf.clear();
        if line.is_empty() {
            continue;
        }
        if tail.len() == STDERR_TAIL {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail.into()
}
