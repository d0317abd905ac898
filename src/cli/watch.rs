//! `watch` command: re-check and re-render on every save.
//!
//! ```text
//! notify ──▶ crossbeam ──▶ classify ──▶ Session::edit ──▶ spawned reporters ──▶ WatchStatus
//!                          └─ library ──▶ rescan libraries ──▶ check + render
//! ctrl+c ──▶ crossbeam ─────────────────▶ Session::cancel
//! ```
//!
//! The session owns debouncing, so every relevant event is forwarded as is.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use notify::{EventKind, RecursiveMode, Watcher};
use tokio::sync::broadcast::{self, error::RecvError};

use super::common::{Workspace, runtime, shutdown_channel};
use super::{Cli, JobArgs};
use crate::error::Error;
use crate::job::Abortable;
use crate::logger::{status_detach, status_error, status_success, status_unchanged, status_warning};
use crate::session::{CheckReport, LiveLine, RenderReport};
use crate::{debug, log};

/// What a file event touched.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Change {
    Source,
    Library(PathBuf),
}

pub fn watch(cli: &Cli, job: &JobArgs, output: Option<&Path>) -> Result<()> {
    let runtime = runtime()?;
    let _guard = runtime.enter();
    let ws = Arc::new(Workspace::open(cli, &job.file, Some(job))?);
    let out_dir = ws.output_dir(output);
    let shutdown = shutdown_channel()?;

    // Watcher first, so saves during the initial run are not lost
    let (tx, rx) = crossbeam::channel::unbounded();
    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = tx.send(res);
    })?;
    watcher.watch(&ws.dir, RecursiveMode::NonRecursive)?;
    runtime.spawn(echo_live_log(ws.session.live_log()));

    log!("watch"; "watching {} (ctrl+c to stop)", ws.logical);
    submit(&ws, &out_dir, &Change::Source);

    loop {
        crossbeam::channel::select! {
            recv(shutdown) -> _ => break,
            recv(rx) -> event => match event {
                Ok(Ok(event)) => {
                    if let Some(change) = classify(&event, &ws.source) {
                        submit(&ws, &out_dir, &change);
                    }
                }
                Ok(Err(e)) => log!("watch"; "notify error: {}", e),
                Err(_) => break,
            },
        }
    }

    ws.session.cancel();
    status_detach();
    log!("watch"; "shutting down...");
    Ok(())
}

/// Check if path is a temp/backup file (editor artifacts)
fn is_temp_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    matches!(ext, "bck" | "bak" | "backup" | "swp" | "swo" | "tmp") || name.ends_with('~') || name.starts_with('.')
}

fn classify(event: &notify::Event, source: &Path) -> Option<Change> {
    let removed = matches!(event.kind, EventKind::Remove(_));
    if !removed && !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return None;
    }
    if event.paths.iter().any(|p| p == source) {
        // A removed source is usually an editor saving by rename; the create follows
        return (!removed).then_some(Change::Source);
    }
    event
        .paths
        .iter()
        .find(|p| !is_temp_file(p) && p.extension().is_some_and(|e| e == "scad"))
        .map(|p| Change::Library(p.clone()))
}

fn submit(ws: &Arc<Workspace>, out_dir: &Path, change: &Change) {
    let source = match ws.read_source() {
        Ok(source) => source,
        Err(e) => {
            // Editors that save by rename leave a short window without the file
            debug!("watch"; "{:#}", e);
            return;
        }
    };

    let (check, render) = match change {
        Change::Source => match ws.session.edit(&source, &ws.logical) {
            Some(jobs) => (jobs.check, jobs.render),
            None => {
                debug!("watch"; "{} unchanged", ws.logical);
                return;
            }
        },
        Change::Library(path) => {
            debug!("watch"; "library {} changed", path.display());
            if let Err(e) = ws.refresh_libraries() {
                log!("watch"; "cannot rescan libraries: {:#}", e);
            }
            let args = ws.session.render_args(&source, &ws.logical);
            (ws.session.check_syntax(&source, &ws.logical), ws.session.render(args, false))
        }
    };

    tokio::spawn(report_check(Arc::clone(ws), check));
    tokio::spawn(report_render(Arc::clone(ws), out_dir.to_path_buf(), render));
}

async fn report_check(ws: Arc<Workspace>, check: Abortable<CheckReport>) {
    match check.await {
        Ok(report) if report.output.error_count() > 0 => {
            status_error(&format!("{}: syntax errors", ws.logical), &ws.summary(&report.output));
        }
        Ok(_) => status_unchanged(&format!("{} parsed, rendering...", ws.logical)),
        Err(e) if e.is_cancelled() => {}
        Err(e) => status_error("check failed", &e.to_string()),
    }
}

async fn report_render(ws: Arc<Workspace>, out_dir: PathBuf, render: Abortable<RenderReport>) {
    let report = match render.await {
        Ok(report) => report,
        Err(Error::Cancelled) => return,
        Err(e) => {
            let output = ws.session.diagnose(&e, &ws.logical);
            status_error(&format!("render failed: {e}"), &ws.summary(&output));
            return;
        }
    };

    let written = match ws.write_outputs(&report, &out_dir) {
        Ok(written) => written,
        Err(e) => {
            status_error("cannot write outputs", &format!("{e:#}"));
            return;
        }
    };
    let names: Vec<_> = written
        .iter()
        .filter_map(|p| p.file_name())
        .map(|n| n.to_string_lossy())
        .collect();
    let message = format!("rendered {} in {:.1}s", names.join(", "), report.elapsed.as_secs_f64());

    if report.output.diagnostics.is_empty() {
        status_success(&message);
    } else {
        status_warning(&format!("{message}\n{}", ws.summary(&report.output)));
    }
}

/// Compiler output as it streams, shown with --verbose.
async fn echo_live_log(mut live: broadcast::Receiver<LiveLine>) {
    loop {
        match live.recv().await {
            Ok(line) => debug!(line.class.label(); "{}", line.text),
            Err(RecvError::Lagged(n)) => debug!("watch"; "skipped {} live lines", n),
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind, RemoveKind};

    fn event(kind: EventKind, path: &str) -> notify::Event {
        notify::Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn test_classify() {
        let source = Path::new("/w/main.scad");
        let modify = EventKind::Modify(ModifyKind::Any);

        assert_eq!(classify(&event(modify, "/w/main.scad"), source), Some(Change::Source));
        assert_eq!(
            classify(&event(EventKind::Create(CreateKind::File), "/w/gears.scad"), source),
            Some(Change::Library(PathBuf::from("/w/gears.scad")))
        );
        assert_eq!(classify(&event(modify, "/w/.main.scad.swp"), source), None);
        assert_eq!(classify(&event(modify, "/w/main.stl"), source), None);
        assert_eq!(classify(&event(EventKind::Access(AccessKind::Any), "/w/main.scad"), source), None);
    }

    #[test]
    fn test_classify_removals() {
        let source = Path::new("/w/main.scad");
        let remove = EventKind::Remove(RemoveKind::File);

        assert_eq!(
            classify(&event(remove, "/w/gears.scad"), source),
            Some(Change::Library(PathBuf::from("/w/gears.scad")))
        );
        assert_eq!(classify(&event(remove, "/w/main.scad"), source), None);
    }

    #[test]
    fn test_is_temp_file() {
        assert!(is_temp_file(Path::new("main.scad~")));
        assert!(is_temp_file(Path::new("main.scad.bak")));
        assert!(!is_temp_file(Path::new("main.scad")));
    }
}
