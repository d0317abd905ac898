//! One-shot `render` and `check` commands.

use std::path::Path;

use anyhow::{Result, bail};

use super::common::{Workspace, runtime};
use super::{Cli, JobArgs};
use crate::diagnostics::{ParsedOutput, Severity};
use crate::log;

/// Render once, write outputs, fail on a failed render.
pub fn render(cli: &Cli, job: &JobArgs, output: Option<&Path>) -> Result<()> {
    let runtime = runtime()?;
    let _guard = runtime.enter();
    let ws = Workspace::open(cli, &job.file, Some(job))?;
    let source = ws.read_source()?;

    let args = ws.session.render_args(&source, &ws.logical);
    log!("render"; "rendering {} as {}", ws.logical, args.format);

    match runtime.block_on(ws.session.render(args, true)) {
        Ok(report) => {
            print_output(&ws, &report.output);
            for path in ws.write_outputs(&report, &ws.output_dir(output))? {
                log!("render"; "wrote {} in {:.1}s", path.display(), report.elapsed.as_secs_f64());
            }
            Ok(())
        }
        Err(e) => {
            print_output(&ws, &ws.session.diagnose(&e, &ws.logical));
            bail!("render failed: {e}")
        }
    }
}

/// Syntax-check once; diagnostics with errors fail the command.
pub fn check(cli: &Cli, file: &Path) -> Result<()> {
    let runtime = runtime()?;
    let _guard = runtime.enter();
    let ws = Workspace::open(cli, file, None)?;
    let source = ws.read_source()?;

    let report = match runtime.block_on(ws.session.check_syntax(&source, &ws.logical)) {
        Ok(report) => report.output,
        Err(e) => {
            print_output(&ws, &ws.session.diagnose(&e, &ws.logical));
            bail!("check failed: {e}")
        }
    };

    print_output(&ws, &report);
    match report.error_count() {
        0 => {
            log!("check"; "{} ok", ws.logical);
            Ok(())
        }
        n => bail!("{} in {}", Severity::Error.counted(n), ws.logical),
    }
}

/// Unclassified log lines, then the capped diagnostics.
fn print_output(ws: &Workspace, output: &ParsedOutput) {
    // The first log line is the counts banner when diagnostics exist
    let skip = usize::from(!output.diagnostics.is_empty());
    for line in output.log.lines().skip(skip) {
        eprintln!("{line}");
    }
    if !output.diagnostics.is_empty() {
        let banner = output.log.lines().next().unwrap_or_default();
        log!("diagnostics"; "{banner}");
        eprintln!("{}", ws.summary(output));
    }
}
