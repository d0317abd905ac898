//! Result-producing operation paired with a kill callback.
//!
//! ```ignore
//! let op = Abortable::new(|settle| {
//!     let child = spawn_something(settle);
//!     move || child.kill()
//! });
//! op.kill();              // runs the kill fn once, op resolves to Cancelled
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{Error, Result};

type KillFn = Box<dyn FnOnce() + Send>;

enum Phase<T> {
    /// Not settled yet. The kill fn arrives right after construction.
    Pending {
        tx: oneshot::Sender<Result<T>>,
        kill: Option<KillFn>,
    },
    Settled,
    Killed,
}

struct Shared<T> {
    phase: Mutex<Phase<T>>,
}

impl<T> Shared<T> {
    fn settle(&self, result: Result<T>) -> bool {
        let mut phase = self.phase.lock();
        match std::mem::replace(&mut *phase, Phase::Settled) {
            Phase::Pending { tx, .. } => {
                let _ = tx.send(result);
                true
            }
            other => {
                *phase = other;
                false
            }
        }
    }

    fn kill(&self) {
        let kill = {
            let mut phase = self.phase.lock();
            match std::mem::replace(&mut *phase, Phase::Killed) {
                Phase::Pending { tx, kill } => {
                    let _ = tx.send(Err(Error::Cancelled));
                    kill
                }
                other => {
                    *phase = other;
                    return;
                }
            }
        };
        // Outside the lock: the kill fn may settle or kill other operations.
        if let Some(kill) = kill {
            kill();
        }
    }

    fn is_pending(&self) -> bool {
        matches!(*self.phase.lock(), Phase::Pending { .. })
    }
}

/// Settles an [`Abortable`]. Only the first call wins; calls after a kill are dropped.
pub struct Settle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Settle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Settle<T> {
    pub fn resolve(&self, value: T) -> bool {
        self.shared.settle(Ok(value))
    }

    pub fn reject(&self, error: Error) -> bool {
        self.shared.settle(Err(error))
    }

    pub fn settle(&self, result: Result<T>) -> bool {
        self.shared.settle(result)
    }

    /// Still waiting for a result (neither settled nor killed).
    pub fn is_pending(&self) -> bool {
        self.shared.is_pending()
    }
}

/// Cloneable handle that kills an [`Abortable`] from elsewhere.
#[derive(Clone)]
pub struct KillHandle {
    kill: Arc<dyn Fn() + Send + Sync>,
    pending: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl KillHandle {
    pub fn kill(&self) {
        (self.kill)();
    }

    pub fn is_pending(&self) -> bool {
        (self.pending)()
    }
}

impl fmt::Debug for KillHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KillHandle").field("pending", &self.is_pending()).finish()
    }
}

/// A deferred result with an exposed `kill()`.
///
/// Awaiting yields the settled result, or `Err(Error::Cancelled)` once killed.
/// `kill()` after settlement is a no-op.
#[must_use = "dropping an Abortable does not kill it; call kill()"]
pub struct Abortable<T> {
    shared: Arc<Shared<T>>,
    rx: oneshot::Receiver<Result<T>>,
}

impl<T: Send + 'static> Abortable<T> {
    /// Start an operation. `start` receives the settle handle and returns the kill fn.
    pub fn new<F, K>(start: F) -> Self
    where
        F: FnOnce(Settle<T>) -> K,
        K: FnOnce() + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let shared = Arc::new(Shared {
            phase: Mutex::new(Phase::Pending { tx, kill: None }),
        });

        let kill = start(Settle {
            shared: Arc::clone(&shared),
        });

        // Settled while starting: nothing is left to release, drop the kill fn.
        if let Phase::Pending { kill: slot, .. } = &mut *shared.phase.lock() {
            *slot = Some(Box::new(kill));
        }

        Self { shared, rx }
    }

    /// Run a future on the tokio runtime; `kill()` aborts the task.
    pub fn spawn<Fut>(fut: Fut) -> Self
    where
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self::new(|settle| {
            let task = tokio::spawn(async move {
                let result = fut.await;
                settle.settle(result);
            });
            move || task.abort()
        })
    }

    /// Already-settled operation.
    pub fn ready(result: Result<T>) -> Self {
        Self::new(|settle| {
            settle.settle(result);
            || {}
        })
    }

    pub fn kill(&self) {
        self.shared.kill();
    }

    pub fn kill_handle(&self) -> KillHandle {
        let kill = Arc::clone(&self.shared);
        let pending = Arc::clone(&self.shared);
        KillHandle {
            kill: Arc::new(move || kill.kill()),
            pending: Arc::new(move || pending.is_pending()),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.shared.is_pending()
    }
}

impl<T> Future for Abortable<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(Error::Cancelled)))
    }
}

impl<T> fmt::Debug for Abortable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Abortable")
            .field("pending", &self.shared.is_pending())
            .finish()
    }
}
