//! Edit → schedule → compile → commit.
//!
//! ```text
//! edit(source) ──commit──▶ StateStore ──changed?──┬──▶ check scheduler ──▶ worker ──┐
//!                                                 └──▶ render scheduler ──▶ worker ──┤
//!                                                                                     │
//!         live_log() ◀── streamed lines ◀─────────────────────────────────────────────┤
//!         subscribe() ◀── commit_if(ticket is current) ◀── parse diagnostics ◀────────┘
//! ```
//!
//! State layout:
//!
//! ```text
//! source  { path, text }
//! check   { diagnostics, log }
//! render  { status, diagnostics, log, outputs, exitCode, elapsedMillis, error }
//! ```
//!
//! Fields are only rewritten when their value changed, so an unchanged
//! diagnostics list keeps its node identity across runs.

mod args;

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{broadcast, watch};

pub use args::{CheckArgs, RenderArgs};

use args::{Plan, check_plan, render_plan};
use crate::config::LiveConfig;
use crate::debug;
use crate::diagnostics::{Diagnostic, DiagnosticParser, ParsedOutput, Remap};
use crate::error::{Error, Result};
use crate::job::{Abortable, JobClass, JobSpec, JobTicket, Scheduler};
use crate::state::{Draft, Opaque, StateStore, StateTree, Value};
use crate::worker::{InputFile, InvocationHandle, InvocationResult, LineStream, WorkerHost};

/// Buffered live lines per subscriber before the slowest one starts lagging.
const LIVE_LOG_CAPACITY: usize = 1024;

/// Knobs fixed for the lifetime of a session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub check: JobSpec,
    pub render: JobSpec,
    pub parser: DiagnosticParser,
    /// Default export format for renders started by [`Session::edit`].
    pub format: String,
    pub features: Vec<String>,
    /// `-D name=value` overrides for renders started by [`Session::edit`].
    pub vars: Vec<(String, String)>,
    pub extra_args: Vec<String>,
    pub is_preview: bool,
    /// Synthetic lines prepended to every source.
    pub preamble: String,
    /// Extra files placed next to the source, e.g. `use <...>` libraries.
    pub libraries: Vec<InputFile>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            check: JobSpec::new(JobClass::SyntaxCheck, Duration::from_millis(300)),
            render: JobSpec::new(JobClass::Render, Duration::from_millis(1000)),
            parser: DiagnosticParser::default(),
            format: "stl".into(),
            features: Vec::new(),
            vars: Vec::new(),
            extra_args: Vec::new(),
            is_preview: false,
            preamble: String::new(),
            libraries: Vec::new(),
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &LiveConfig) -> Self {
        Self {
            check: config.schedule.job(JobClass::SyntaxCheck),
            render: config.schedule.job(JobClass::Render),
            parser: config.diagnostics.parser(),
            format: config.render.format.clone(),
            features: config.render.features.clone(),
            preamble: config.render.preamble.clone(),
            ..Self::default()
        }
    }

    pub fn with_libraries(mut self, libraries: Vec<InputFile>) -> Self {
        self.libraries = libraries;
        self
    }
}

/// One line of compiler output as it streams in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveLine {
    pub class: JobClass,
    /// `stdout`, `stderr` or `error`.
    pub stream: &'static str,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct CheckReport {
    pub output: ParsedOutput,
}

#[derive(Debug, Clone)]
pub struct RenderReport {
    pub output: ParsedOutput,
    pub outputs: Vec<(String, Vec<u8>)>,
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
}

impl RenderReport {
    pub fn output_bytes(&self, path: &str) -> Option<&[u8]> {
        self.outputs
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, bytes)| bytes.as_slice())
    }
}

/// Both jobs scheduled by an edit.
#[must_use = "the jobs run regardless; await them to observe results"]
pub struct EditJobs {
    pub check: Abortable<CheckReport>,
    pub render: Abortable<RenderReport>,
}

/// Shared by both schedulers' factories.
struct Context {
    host: WorkerHost,
    store: StateStore,
    live: broadcast::Sender<LiveLine>,
    settings: SessionSettings,
    /// Starts as `settings.libraries`; replaced when files come and go.
    libraries: RwLock<Vec<InputFile>>,
}

/// Live compile session around one source file. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    ctx: Arc<Context>,
    check: Scheduler<CheckArgs, CheckReport>,
    render: Scheduler<RenderArgs, RenderReport>,
}

impl Session {
    pub fn new(host: WorkerHost, settings: SessionSettings) -> Self {
        let (live, _) = broadcast::channel(LIVE_LOG_CAPACITY);
        let ctx = Arc::new(Context {
            host,
            store: StateStore::default(),
            live,
            libraries: RwLock::new(settings.libraries.clone()),
            settings,
        });

        let check = Scheduler::new(ctx.settings.check, {
            let ctx = Arc::clone(&ctx);
            move |args: CheckArgs, ticket| start_check(&ctx, &args, ticket)
        });
        let render = Scheduler::new(ctx.settings.render, {
            let ctx = Arc::clone(&ctx);
            move |args: RenderArgs, ticket| start_render(&ctx, &args, ticket)
        });

        Self { ctx, check, render }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.ctx.settings
    }

    /// Replace the files placed next to the source. Applies to jobs started afterwards.
    pub fn set_libraries(&self, libraries: Vec<InputFile>) {
        *self.ctx.libraries.write() = libraries;
    }

    pub fn libraries(&self) -> Vec<InputFile> {
        self.ctx.libraries.read().clone()
    }

    /// Render arguments for `source` with the session defaults.
    pub fn render_args(&self, source: &str, path: &str) -> RenderArgs {
        let settings = &self.ctx.settings;
        RenderArgs {
            vars: settings.vars.clone(),
            features: settings.features.clone(),
            extra_args: settings.extra_args.clone(),
            is_preview: settings.is_preview,
            ..RenderArgs::new(source, path, &settings.format)
        }
    }

    /// Commit a new source and schedule both jobs.
    ///
    /// Returns `None` when the source and path are unchanged.
    pub fn edit(&self, source: &str, path: &str) -> Option<EditJobs> {
        let committed = infallible(self.ctx.store.commit(|draft| {
            let section = draft.record_mut("source");
            section.set("path", path);
            section.set("text", source);
            Ok(())
        }));
        if !committed.changed {
            debug!("session"; "edit of {path} changed nothing");
            return None;
        }

        Some(EditJobs {
            check: self.check_syntax(source, path),
            render: self.render(self.render_args(source, path), false),
        })
    }

    /// Debounced syntax check.
    pub fn check_syntax(&self, source: &str, path: &str) -> Abortable<CheckReport> {
        let args = CheckArgs {
            source: source.to_owned(),
            path: path.to_owned(),
        };
        self.check.schedule(args, false)
    }

    /// Debounced render; `immediate` skips the debounce window.
    pub fn render(&self, args: RenderArgs, immediate: bool) -> Abortable<RenderReport> {
        self.render.schedule(args, immediate)
    }

    /// Diagnostics carried by a failed job's partial log, remapped like a success.
    pub fn diagnose(&self, error: &Error, path: &str) -> ParsedOutput {
        let remap = Remap::for_preamble(path, &self.ctx.settings.preamble);
        self.ctx.settings.parser.parse(error.log(), Some(&remap))
    }

    /// Kill everything pending or running.
    pub fn cancel(&self) {
        self.check.cancel();
        self.render.cancel();
    }

    pub fn is_idle(&self) -> bool {
        self.check.is_idle() && self.render.is_idle()
    }

    /// Lines from every job as they arrive. Lagging receivers lose the oldest lines.
    pub fn live_log(&self) -> broadcast::Receiver<LiveLine> {
        self.ctx.live.subscribe()
    }

    pub fn state(&self) -> StateTree {
        self.ctx.store.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<StateTree> {
        self.ctx.store.subscribe()
    }
}

// ============================================================================
// Job factories
// ============================================================================

fn start_check(ctx: &Arc<Context>, args: &CheckArgs, ticket: JobTicket) -> Abortable<CheckReport> {
    let plan = check_plan(args, &ctx.settings.preamble, &ctx.libraries.read());
    launch(ctx, ticket, plan, finish_check)
}

fn start_render(ctx: &Arc<Context>, args: &RenderArgs, ticket: JobTicket) -> Abortable<RenderReport> {
    let plan = render_plan(args, &ctx.settings.preamble, &ctx.libraries.read());
    ctx.commit_section(&ticket, "render", vec![("status", Value::from("running"))]);
    launch(ctx, ticket, plan, finish_render)
}

type Finish<T> = fn(&Context, &JobTicket, &Remap, Result<InvocationResult>) -> Result<T>;

/// Invoke a worker, forward its lines, then hand the outcome to `finish`.
fn launch<T: Send + 'static>(ctx: &Arc<Context>, ticket: JobTicket, plan: Plan, finish: Finish<T>) -> Abortable<T> {
    let InvocationHandle { result, lines } = ctx.host.invoke(&plan.invocation);
    let worker = result.kill_handle();
    let ctx = Arc::clone(ctx);

    Abortable::new(move |settle| {
        let forward = tokio::spawn(forward_lines(ctx.live.clone(), ticket.class(), lines));
        let on_kill = (Arc::clone(&ctx), ticket.clone());
        let task = tokio::spawn(async move {
            let outcome = result.await;
            // The stream ends with the worker; let subscribers see every line first
            let _ = forward.await;
            settle.settle(finish(&ctx, &ticket, &plan.remap, outcome));
        });
        move || {
            worker.kill();
            task.abort();
            // Superseded tickets are refused; this only lands for timeouts and direct kills
            let (ctx, ticket) = on_kill;
            if ticket.class() == JobClass::Render {
                ctx.commit_section(&ticket, "render", vec![("status", Value::from("cancelled"))]);
            }
        }
    })
}

async fn forward_lines(live: broadcast::Sender<LiveLine>, class: JobClass, mut lines: LineStream) {
    while let Some(line) = lines.recv().await {
        // No subscribers is fine
        let _ = live.send(LiveLine {
            class,
            stream: line.stream(),
            text: line.text().to_owned(),
        });
    }
}

fn finish_check(
    ctx: &Context,
    ticket: &JobTicket,
    remap: &Remap,
    outcome: Result<InvocationResult>,
) -> Result<CheckReport> {
    let result = match outcome {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => return Err(e),
        Err(e) => {
            let output = ctx.settings.parser.parse(e.log(), Some(remap));
            ctx.commit_section(ticket, "check", parsed_fields(&output));
            return Err(e);
        }
    };

    let output = ctx.settings.parser.parse(&result.log, Some(remap));
    if !ctx.commit_section(ticket, "check", parsed_fields(&output)) {
        return Err(Error::Cancelled);
    }
    Ok(CheckReport { output })
}

fn finish_render(
    ctx: &Context,
    ticket: &JobTicket,
    remap: &Remap,
    outcome: Result<InvocationResult>,
) -> Result<RenderReport> {
    let result = match outcome {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => return Err(e),
        Err(e) => {
            // Diagnostics still land in state; the job itself fails
            let output = ctx.settings.parser.parse(e.log(), Some(remap));
            let exit_code = match &e {
                Error::MissingOutput { exit_code, .. } => *exit_code,
                _ => None,
            };
            let mut fields = parsed_fields(&output);
            fields.extend([
                ("status", Value::from("failed")),
                ("exitCode", exit_code_value(exit_code)),
                ("error", Value::from(e.to_string())),
            ]);
            ctx.commit_section(ticket, "render", fields);
            return Err(e);
        }
    };

    let report = RenderReport {
        output: ctx.settings.parser.parse(&result.log, Some(remap)),
        outputs: result.outputs,
        exit_code: result.exit_code,
        elapsed: result.elapsed,
    };

    let outputs = Value::from_fields(
        report
            .outputs
            .iter()
            .map(|(path, bytes)| (path.clone(), Value::from(Opaque::blob(bytes.clone())))),
    );
    let elapsed = i64::try_from(report.elapsed.as_millis()).unwrap_or(i64::MAX);
    let mut fields = parsed_fields(&report.output);
    fields.extend([
        ("status", Value::from("ok")),
        ("outputs", outputs),
        ("exitCode", exit_code_value(report.exit_code)),
        ("elapsedMillis", Value::from(elapsed)),
        ("error", Value::Null),
    ]);
    if !ctx.commit_section(ticket, "render", fields) {
        return Err(Error::Cancelled);
    }
    Ok(report)
}

// ============================================================================
// State helpers
// ============================================================================

impl Context {
    /// Write `fields` under `section` if `ticket` is still current.
    ///
    /// Returns `false` when a newer request owns the section.
    fn commit_section(&self, ticket: &JobTicket, section: &str, fields: Vec<(&'static str, Value)>) -> bool {
        let committed = infallible(self.store.commit_if(
            || ticket.is_current(),
            |draft| {
                let target = draft.record_mut(section);
                for (key, value) in fields {
                    put(target, key, value);
                }
                Ok(())
            },
        ));
        if committed.is_none() {
            debug!("session"; "dropping stale {} #{} result", ticket.class().label(), ticket.generation());
        }
        committed.is_some()
    }
}

/// Set `key` unless the draft already holds an equal value, keeping its identity.
fn put(target: &mut Draft, key: &str, value: Value) {
    if target.get(key).is_none_or(|current| *current != value) {
        target.set(key, value);
    }
}

fn parsed_fields(output: &ParsedOutput) -> Vec<(&'static str, Value)> {
    vec![
        ("diagnostics", diagnostics_value(&output.diagnostics)),
        ("log", Value::from(output.log.as_str())),
    ]
}

fn diagnostics_value(diagnostics: &[Diagnostic]) -> Value {
    Value::from_items(diagnostics.iter().map(|d| {
        Value::from_fields([
            ("severity", Value::from(d.severity.as_str())),
            ("line", Value::from(d.line)),
            ("message", Value::from(d.message.as_str())),
            ("file", Value::from(d.file.as_str())),
        ])
    }))
}

fn exit_code_value(code: Option<i32>) -> Value {
    Value::from(code.map(i64::from))
}

fn infallible<T>(result: std::result::Result<T, Infallible>) -> T {
    match result {
        Ok(value) => value,
        Err(never) => match never {},
    }
}
