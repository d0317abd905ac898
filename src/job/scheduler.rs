//! Debounced single-flight scheduler.
//!
//! One scheduler per job class. Every request supersedes the previous one:
//!
//! ```text
//! request ──▶ clear pending timer ──▶ kill running execution
//!                                        │
//!                  immediate? ──yes──▶ start factory now
//!                      │
//!                      no ──▶ sleep(debounce) ──▶ start factory
//! ```
//!
//! There is no queueing inside a class: only the latest request can run to
//! completion. Stale work is killed, and consumers can additionally check
//! [`JobTicket::is_current`] right before committing anything.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::abortable::{Abortable, KillHandle, Settle};
use crate::error::Error;

/// Kind of job. Each class owns one independent scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobClass {
    SyntaxCheck,
    Render,
}

impl JobClass {
    pub const fn label(self) -> &'static str {
        match self {
            Self::SyntaxCheck => "check",
            Self::Render => "render",
        }
    }
}

/// Timing policy for one class.
#[derive(Debug, Clone, Copy)]
pub struct JobSpec {
    pub class: JobClass,
    pub debounce: Duration,
    /// Wall-clock limit for one execution. `None` runs until superseded.
    pub timeout: Option<Duration>,
}

impl JobSpec {
    pub const fn new(class: JobClass, debounce: Duration) -> Self {
        Self {
            class,
            debounce,
            timeout: None,
        }
    }

    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Identifies one request; stays current until a newer request arrives.
#[derive(Debug, Clone)]
pub struct JobTicket {
    class: JobClass,
    generation: u64,
    latest: Arc<AtomicU64>,
}

impl JobTicket {
    pub fn class(&self) -> JobClass {
        self.class
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// False once a newer request for the same class was made.
    pub fn is_current(&self) -> bool {
        self.latest.load(Ordering::Acquire) == self.generation
    }
}

type Factory<A, T> = dyn Fn(A, JobTicket) -> Abortable<T> + Send + Sync;

/// What a request's kill fn has to stop.
#[derive(Default)]
enum Execution {
    /// Still in the debounce window.
    #[default]
    Waiting,
    Running(KillHandle),
    /// The request was killed; a late timer must not start it.
    Killed,
}

/// Per-class bookkeeping. At most one request is live at a time.
#[derive(Default)]
struct Slot {
    /// Caller-visible operation of the live request (timer or execution).
    request: Option<KillHandle>,
    /// Execution started by the live request, once the timer fired.
    running: Option<KillHandle>,
}

struct Inner<A, T> {
    spec: JobSpec,
    factory: Box<Factory<A, T>>,
    latest: Arc<AtomicU64>,
    slot: Mutex<Slot>,
}

/// Coalesces requests of one class into at most one pending and one running execution.
pub struct Scheduler<A, T> {
    inner: Arc<Inner<A, T>>,
}

impl<A, T> Clone for Scheduler<A, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, T> Scheduler<A, T>
where
    A: Send + 'static,
    T: Send + 'static,
{
    pub fn new<F>(spec: JobSpec, factory: F) -> Self
    where
        F: Fn(A, JobTicket) -> Abortable<T> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                spec,
                factory: Box::new(factory),
                latest: Arc::new(AtomicU64::new(0)),
                slot: Mutex::new(Slot::default()),
            }),
        }
    }

    pub fn spec(&self) -> JobSpec {
        self.inner.spec
    }

    /// Request a run, superseding anything pending or running for this class.
    ///
    /// With `immediate` the factory is called before this returns; otherwise
    /// after the debounce window, unless a newer request arrives first.
    pub fn schedule(&self, args: A, immediate: bool) -> Abortable<T> {
        let inner = Arc::clone(&self.inner);
        let class = inner.spec.class;

        // Preempt under the slot lock so two requests never interleave.
        // Kill fns must not call back into this scheduler.
        let mut slot = inner.slot.lock();
        let generation = inner.latest.fetch_add(1, Ordering::AcqRel) + 1;
        let ticket = JobTicket {
            class,
            generation,
            latest: Arc::clone(&inner.latest),
        };
        if let Some(request) = slot.request.take() {
            crate::debug!("schedule"; "{} #{} supersedes previous request", class.label(), generation);
            request.kill();
        }
        if let Some(running) = slot.running.take() {
            running.kill();
        }

        let op = Abortable::new(|settle: Settle<T>| {
            let execution: Arc<Mutex<Execution>> = Arc::default();

            let task = if immediate {
                let started = (inner.factory)(args, ticket.clone());
                let handle = started.kill_handle();
                *execution.lock() = Execution::Running(handle.clone());
                slot.running = Some(handle);
                crate::debug!("schedule"; "{} #{} started immediately", class.label(), generation);
                tokio::spawn(drive(Arc::clone(&inner), ticket, started, settle))
            } else {
                let inner = Arc::clone(&inner);
                let execution = Arc::clone(&execution);
                crate::debug!("schedule"; "{} #{} armed for {:?}", class.label(), generation, inner.spec.debounce);
                tokio::spawn(async move {
                    tokio::time::sleep(inner.spec.debounce).await;
                    let Some(started) = start(&inner, args, &ticket, &execution) else {
                        return;
                    };
                    drive(inner, ticket, started, settle).await;
                })
            };

            move || {
                task.abort();
                // A timer that already fired sees `Killed` and never starts
                let previous = std::mem::replace(&mut *execution.lock(), Execution::Killed);
                if let Execution::Running(running) = previous {
                    running.kill();
                }
            }
        });

        slot.request = Some(op.kill_handle());

        op
    }

    /// Kill whatever is pending or running for this class.
    pub fn cancel(&self) {
        let previous = {
            let mut slot = self.inner.slot.lock();
            self.inner.latest.fetch_add(1, Ordering::AcqRel);
            (slot.request.take(), slot.running.take())
        };
        if let Some(request) = previous.0 {
            request.kill();
        }
        if let Some(running) = previous.1 {
            running.kill();
        }
    }

    /// Nothing pending and nothing running.
    pub fn is_idle(&self) -> bool {
        let slot = self.inner.slot.lock();
        slot.request.as_ref().is_none_or(|r| !r.is_pending())
            && slot.running.as_ref().is_none_or(|r| !r.is_pending())
    }
}

/// Timer fired: start the factory if this request is still the live one.
fn start<A, T>(
    inner: &Inner<A, T>,
    args: A,
    ticket: &JobTicket,
    execution: &Mutex<Execution>,
) -> Option<Abortable<T>>
where
    A: Send + 'static,
    T: Send + 'static,
{
    let mut slot = inner.slot.lock();
    if !ticket.is_current() || matches!(*execution.lock(), Execution::Killed) {
        return None;
    }
    let started = (inner.factory)(args, ticket.clone());
    let handle = started.kill_handle();
    {
        let mut execution = execution.lock();
        // Killed while the factory ran
        if matches!(*execution, Execution::Killed) {
            drop(execution);
            handle.kill();
            return None;
        }
        *execution = Execution::Running(handle.clone());
    }
    slot.running = Some(handle);
    crate::debug!("schedule"; "{} #{} started", ticket.class.label(), ticket.generation);
    Some(started)
}

/// Await one execution, apply the timeout, forward its result, clear the record.
async fn drive<A, T>(inner: Arc<Inner<A, T>>, ticket: JobTicket, started: Abortable<T>, settle: Settle<T>)
where
    A: Send + 'static,
    T: Send + 'static,
{
    let kill = started.kill_handle();
    let result = match inner.spec.timeout {
        Some(limit) => match tokio::time::timeout(limit, started).await {
            Ok(result) => result,
            Err(_) => {
                kill.kill();
                crate::debug!("schedule"; "{} #{} timed out after {:?}", ticket.class.label(), ticket.generation, limit);
                Err(Error::Timeout(limit))
            }
        },
        None => started.await,
    };

    {
        let mut slot = inner.slot.lock();
        if ticket.is_current() {
            slot.running = None;
            slot.request = None;
        }
    }

    settle.settle(result);
}

#[cfg(test)]
mod tests;
