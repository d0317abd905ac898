//! Cancellable jobs and their per-class scheduling.
//!
//! - [`Abortable`]: a deferred result that can be killed from outside
//! - [`Scheduler`]: debounced, single-flight execution of one job class

mod abortable;
mod scheduler;

pub use abortable::{Abortable, KillHandle, Settle};
pub use scheduler::{JobClass, JobSpec, JobTicket, Scheduler};
