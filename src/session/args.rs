//! Job arguments → worker invocations.
//!
//! ```text
//! render: <path> -o out.<fmt> --export-format=<fmt> [-D k=v]... [--enable=f]... [-D $preview=true] [extra]...
//! check:  <path> -o out.ast
//! ```

use crate::diagnostics::Remap;
use crate::worker::{InputFile, Invocation};

/// Output file requested by a syntax check. Never read back.
const CHECK_OUTPUT: &str = "out.ast";

/// One render request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderArgs {
    pub source: String,
    /// Logical path of the source inside the worker's scratch directory.
    pub path: String,
    /// `-D name=value` overrides, in order.
    pub vars: Vec<(String, String)>,
    pub features: Vec<String>,
    pub extra_args: Vec<String>,
    pub is_preview: bool,
    /// Export format, also the output file's extension.
    pub format: String,
}

impl RenderArgs {
    pub fn new(source: impl Into<String>, path: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            path: path.into(),
            vars: Vec::new(),
            features: Vec::new(),
            extra_args: Vec::new(),
            is_preview: false,
            format: format.into(),
        }
    }

    pub fn output_path(&self) -> String {
        format!("out.{}", self.format)
    }
}

/// One syntax-check request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckArgs {
    pub source: String,
    pub path: String,
}

/// Invocation plus the remap undoing the preamble.
#[derive(Debug, Clone)]
pub(crate) struct Plan {
    pub invocation: Invocation,
    pub remap: Remap,
}

/// Prepend `preamble` and attach `libraries` next to the main source.
fn inputs(path: &str, source: &str, preamble: &str, libraries: &[InputFile]) -> Vec<InputFile> {
    let text = if preamble.is_empty() {
        source.to_owned()
    } else if preamble.ends_with('\n') {
        format!("{preamble}{source}")
    } else {
        format!("{preamble}\n{source}")
    };

    std::iter::once(InputFile::inline(path, text))
        .chain(libraries.iter().filter(|lib| lib.path != path).cloned())
        .collect()
}

pub(crate) fn render_plan(args: &RenderArgs, preamble: &str, libraries: &[InputFile]) -> Plan {
    let output = args.output_path();
    let mut argv = vec![
        args.path.clone(),
        "-o".to_owned(),
        output.clone(),
        format!("--export-format={}", args.format),
    ];
    for (name, value) in &args.vars {
        argv.push("-D".to_owned());
        argv.push(format!("{name}={value}"));
    }
    argv.extend(args.features.iter().map(|f| format!("--enable={f}")));
    if args.is_preview {
        argv.push("-D".to_owned());
        argv.push("$preview=true".to_owned());
    }
    argv.extend(args.extra_args.iter().cloned());

    Plan {
        invocation: Invocation {
            inputs: inputs(&args.path, &args.source, preamble, libraries),
            args: argv,
            output_paths: Some(vec![output]),
        },
        remap: Remap::for_preamble(&args.path, preamble),
    }
}

pub(crate) fn check_plan(args: &CheckArgs, preamble: &str, libraries: &[InputFile]) -> Plan {
    Plan {
        invocation: Invocation {
            inputs: inputs(&args.path, &args.source, preamble, libraries),
            args: vec![args.path.clone(), "-o".to_owned(), CHECK_OUTPUT.to_owned()],
            output_paths: None,
        },
        remap: Remap::for_preamble(&args.path, preamble),
    }
}
