//! scad-live - compile-on-edit front end for OpenSCAD-style compilers.

use anyhow::Result;
use clap::{ColorChoice, Parser};
use scad_live::cli::{self, Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set global color override based on CLI option
    match cli.color {
        ColorChoice::Always => owo_colors::set_override(true),
        ColorChoice::Never => owo_colors::set_override(false),
        ColorChoice::Auto => {} // owo-colors auto-detects TTY
    }
    scad_live::logger::set_verbose(cli.verbose);

    match &cli.command {
        Commands::Watch { job, output } => cli::watch::watch(&cli, job, output.as_deref()),
        Commands::Render { job, output } => cli::render::render(&cli, job, output.as_deref()),
        Commands::Check { file } => cli::render::check(&cli, file),
        Commands::Worker {
            compiler,
            compiler_args,
        } => cli::worker::run(compiler, compiler_args),
    }
}
