//! Compute worker protocol.
//!
//! Every compiler run happens in its own worker process so nothing leaks
//! between runs:
//!
//! - [`host`]: spawns the worker, streams its lines, settles the result
//! - [`runner`]: the worker side, running the compiler in a scratch directory
//! - [`protocol`]: the JSON-lines messages between the two
//! - [`source`]: invocation descriptors and input resolution

pub mod host;
pub mod protocol;
pub mod runner;
pub mod source;

pub use host::{InvocationHandle, LineStream, WorkerCommand, WorkerHost};
pub use protocol::{InvocationResult, OutputLine, Request, WorkerMessage};
pub use runner::Compiler;
pub use source::{FileSource, FsSource, InputFile, InputSource, Invocation, MemorySource};
