//! Configuration section definitions.
//!
//! | Section         | Purpose                                   |
//! |-----------------|-------------------------------------------|
//! | `[compiler]`    | Batch compiler program and leading args   |
//! | `[worker]`      | Worker process command                    |
//! | `[schedule]`    | Debounce windows and run timeout          |
//! | `[render]`      | Export format, features, source preamble  |
//! | `[diagnostics]` | Display limits and log denylist           |

mod compiler;
mod diagnostics;
mod render;
mod schedule;
mod worker;

pub use compiler::CompilerConfig;
pub use diagnostics::DiagnosticsConfig;
pub use render::RenderConfig;
pub use schedule::ScheduleConfig;
pub use worker::WorkerConfig;
