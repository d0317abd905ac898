//! Hidden `worker` subcommand.
//!
//! Reads one request from stdin and writes protocol messages to stdout.
//! Stdin closing before the result is written cancels the compile.
//! Logging goes to stderr, which the host keeps as a failure tail.

use std::path::Path;

use anyhow::{Context, Result};
use tokio::io::BufReader;

use crate::worker::{Compiler, runner};

pub fn run(compiler: &Path, compiler_args: &[String]) -> Result<()> {
    let compiler = Compiler::new(compiler).with_args(compiler_args.iter().cloned());
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let served = runtime.block_on(runner::serve(
        BufReader::new(tokio::io::stdin()),
        std::io::stdout().lock(),
        &compiler,
    ));
    // The stdin watch may still sit in a blocking read
    runtime.shutdown_background();
    served.context("worker protocol stream failed")
}
