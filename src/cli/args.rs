//! Command-line interface definitions.

use std::path::PathBuf;

use clap::{ColorChoice, Parser, Subcommand};

/// Compile-on-edit front end for OpenSCAD-style batch compilers
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Control colored output (auto, always, never)
    #[arg(long, global = true, default_value = "auto")]
    pub color: ColorChoice,

    /// Config file path, searched upward from the working directory
    #[arg(short = 'C', long, default_value = "scad-live.toml", value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// Show scheduler, worker and session debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Watch a source file; check and render on every save
    #[command(visible_alias = "w")]
    Watch {
        #[command(flatten)]
        job: JobArgs,

        /// Directory for render outputs (default: next to the source)
        #[arg(short, long, value_hint = clap::ValueHint::DirPath)]
        output: Option<PathBuf>,
    },

    /// Render once and exit
    #[command(visible_alias = "r")]
    Render {
        #[command(flatten)]
        job: JobArgs,

        /// Directory for render outputs (default: next to the source)
        #[arg(short, long, value_hint = clap::ValueHint::DirPath)]
        output: Option<PathBuf>,
    },

    /// Syntax-check once and print diagnostics
    #[command(visible_alias = "c")]
    Check {
        /// Source file
        #[arg(value_hint = clap::ValueHint::FilePath)]
        file: PathBuf,
    },

    /// Worker process entry: one request on stdin, messages on stdout
    #[command(hide = true)]
    Worker {
        /// Compiler executable
        #[arg(long)]
        compiler: PathBuf,

        /// Argument placed before every invocation's own (repeatable)
        #[arg(long = "compiler-arg", allow_hyphen_values = true)]
        compiler_args: Vec<String>,
    },
}

/// Shared arguments for Watch and Render
#[derive(clap::Args, Debug, Clone)]
pub struct JobArgs {
    /// Source file
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub file: PathBuf,

    /// Override a variable (repeatable)
    #[arg(short = 'D', long = "define", value_name = "NAME=VALUE", value_parser = parse_define)]
    pub defines: Vec<(String, String)>,

    /// Enable an experimental compiler feature, in addition to [render].features
    #[arg(long = "enable", value_name = "FEATURE")]
    pub features: Vec<String>,

    /// Export format (overrides [render].format)
    #[arg(short, long)]
    pub format: Option<String>,

    /// Render with `$preview = true`
    #[arg(long)]
    pub preview: bool,

    /// Extra compiler arguments, after `--`
    #[arg(last = true)]
    pub extra: Vec<String>,
}

fn parse_define(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim().to_owned(), value.to_owned())),
        _ => Err(format!("expected NAME=VALUE, got `{s}`")),
    }
}
