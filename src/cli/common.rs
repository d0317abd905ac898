//! Shared setup for the session-backed commands.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use crossbeam::channel::{self, Receiver};

use super::{Cli, JobArgs};
use crate::config::{LiveConfig, RenderConfig};
use crate::diagnostics::ParsedOutput;
use crate::session::{RenderReport, Session, SessionSettings};
use crate::debug;
use crate::worker::{FsSource, InputFile, WorkerHost};

/// One source file, its configuration and its live session.
pub struct Workspace {
    pub config: LiveConfig,
    pub session: Session,
    /// Canonical path of the source file.
    pub source: PathBuf,
    /// Source path inside the worker's scratch directory.
    pub logical: String,
    /// Directory holding the source and its libraries.
    pub dir: PathBuf,
}

impl Workspace {
    /// Load config, resolve the compiler and worker, and start a session for `file`.
    pub fn open(cli: &Cli, file: &Path, job: Option<&JobArgs>) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to get current working directory")?;
        let config = LiveConfig::load(&cwd, &cli.config)?;
        if let Some(path) = &config.config_path {
            debug!("config"; "using {}", path.display());
        }

        let compiler = config.compiler.resolve(&config.root)?;
        let command = config
            .worker
            .command(&compiler, &config.root)
            .context("cannot locate worker executable")?;
        debug!("config"; "compiler {}, worker {}", compiler.program.display(), command.program.display());

        let source = fs::canonicalize(cwd.join(file))
            .with_context(|| format!("source file `{}` not found", file.display()))?;
        if !source.is_file() {
            bail!("`{}` is not a file", file.display());
        }
        let dir = source.parent().map_or_else(|| cwd.clone(), Path::to_path_buf);
        let logical = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("source path has no file name")?;

        let mut settings = SessionSettings::from_config(&config).with_libraries(libraries(&dir, &logical)?);
        if let Some(job) = job {
            apply_job_args(job, &mut settings)?;
        }

        let host = WorkerHost::new(command, Arc::new(FsSource::new(&dir)));
        Ok(Self {
            config,
            session: Session::new(host, settings),
            source,
            logical,
            dir,
        })
    }

    /// Rescan sibling libraries, picking up created and dropping deleted files.
    pub fn refresh_libraries(&self) -> Result<()> {
        self.session.set_libraries(libraries(&self.dir, &self.logical)?);
        Ok(())
    }

    pub fn read_source(&self) -> Result<String> {
        fs::read_to_string(&self.source).with_context(|| format!("cannot read `{}`", self.source.display()))
    }

    pub fn output_dir(&self, output: Option<&Path>) -> PathBuf {
        output.map_or_else(|| self.dir.clone(), Path::to_path_buf)
    }

    /// Write each output as `<source stem>.<output extension>` into `dir`.
    pub fn write_outputs(&self, report: &RenderReport, dir: &Path) -> Result<Vec<PathBuf>> {
        let stem = self
            .source
            .file_stem()
            .map_or_else(|| "out".to_owned(), |s| s.to_string_lossy().into_owned());
        fs::create_dir_all(dir).with_context(|| format!("cannot create `{}`", dir.display()))?;

        report
            .outputs
            .iter()
            .map(|(path, bytes)| {
                let target = match Path::new(path).extension() {
                    Some(ext) => dir.join(format!("{stem}.{}", ext.to_string_lossy())),
                    None => dir.join(&stem),
                };
                fs::write(&target, bytes).with_context(|| format!("cannot write `{}`", target.display()))?;
                Ok(target)
            })
            .collect()
    }

    /// Diagnostics capped by `[diagnostics]` limits.
    pub fn summary(&self, output: &ParsedOutput) -> String {
        let limits = &self.config.diagnostics;
        output.summary(limits.max_errors, limits.max_warnings)
    }
}

/// Other `.scad` files next to the source, read from disk at each invocation.
fn libraries(dir: &Path, logical: &str) -> Result<Vec<InputFile>> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .with_context(|| format!("cannot list `{}`", dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.ends_with(".scad") && name != logical)
        .collect();
    names.sort();
    Ok(names
        .into_iter()
        .map(|name| InputFile::reference(name.clone(), name))
        .collect())
}

/// CLI flags layered over the config defaults.
fn apply_job_args(job: &JobArgs, settings: &mut SessionSettings) -> Result<()> {
    if let Some(format) = &job.format {
        RenderConfig {
            format: format.clone(),
            ..Default::default()
        }
        .validate()?;
        settings.format = format.clone();
    }
    for feature in &job.features {
        if !settings.features.contains(feature) {
            settings.features.push(feature.clone());
        }
    }
    settings.vars.extend(job.defines.iter().cloned());
    settings.extra_args.extend(job.extra.iter().cloned());
    settings.is_preview |= job.preview;
    Ok(())
}

pub fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

/// Ctrl+C as a channel message.
pub fn shutdown_channel() -> Result<Receiver<()>> {
    let (tx, rx) = channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })
    .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {}", e))?;
    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Commands;
    use clap::Parser;

    fn job(args: &[&str]) -> JobArgs {
        let argv = ["scad-live", "render"].iter().chain(args).copied();
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Render { job, .. } => job,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_job_args_extend_settings() {
        let mut settings = SessionSettings {
            features: vec!["manifold".into()],
            ..Default::default()
        };
        let args = job(&["a.scad", "-f", "off", "--enable", "manifold", "--enable", "roof", "-D", "n=3", "--preview"]);
        apply_job_args(&args, &mut settings).unwrap();

        assert_eq!(settings.format, "off");
        assert_eq!(settings.features, vec!["manifold", "roof"]);
        assert_eq!(settings.vars, vec![("n".to_owned(), "3".to_owned())]);
        assert!(settings.is_preview);
    }

    #[test]
    fn test_bad_format_is_rejected() {
        let mut settings = SessionSettings::default();
        assert!(apply_job_args(&job(&["a.scad", "-f", "../x"]), &mut settings).is_err());
    }

    #[test]
    fn test_libraries_skip_the_source() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["main.scad", "gears.scad", "bolts.scad", "notes.txt"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        let libs = libraries(dir.path(), "main.scad").unwrap();
        let names: Vec<_> = libs.iter().map(|l| l.path.as_str()).collect();
        assert_eq!(names, ["bolts.scad", "gears.scad"]);
    }

    #[test]
    fn test_library_rescan_follows_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.scad"), "").unwrap();
        fs::write(dir.path().join("old.scad"), "").unwrap();
        let names = |libs: Vec<InputFile>| libs.into_iter().map(|l| l.path).collect::<Vec<_>>();
        assert_eq!(names(libraries(dir.path(), "main.scad").unwrap()), ["old.scad"]);

        fs::remove_file(dir.path().join("old.scad")).unwrap();
        fs::write(dir.path().join("new.scad"), "").unwrap();
        assert_eq!(names(libraries(dir.path(), "main.scad").unwrap()), ["new.scad"]);
    }
}
