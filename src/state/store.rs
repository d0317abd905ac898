use parking_lot::Mutex;
use tokio::sync::watch;

use super::{Commit, Draft, StateTree, Value, commit};

/// Single-writer owner of the current state root.
///
/// Commits are serialized: the snapshot/rebuild pass runs under the lock, so
/// two writers never interleave over the same generation. Every changed root
/// is published to subscribers.
pub struct StateStore {
    current: Mutex<StateTree>,
    tx: watch::Sender<StateTree>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(Value::record())
    }
}

impl StateStore {
    pub fn new(initial: StateTree) -> Self {
        let (tx, _) = watch::channel(initial.clone());
        Self {
            current: Mutex::new(initial),
            tx,
        }
    }

    /// Current root. Cheap: clones an `Arc`.
    pub fn snapshot(&self) -> StateTree {
        self.current.lock().clone()
    }

    /// Receiver that observes every changed root.
    pub fn subscribe(&self) -> watch::Receiver<StateTree> {
        self.tx.subscribe()
    }

    pub fn commit<E>(&self, mutate: impl FnOnce(&mut Draft) -> Result<(), E>) -> Result<Commit, E> {
        let mut current = self.current.lock();
        let result = commit(&current, mutate)?;
        if result.changed {
            *current = result.root.clone();
            self.tx.send_replace(result.root.clone());
        }
        Ok(result)
    }

    /// Commit only while `guard` holds, evaluated under the writer lock.
    ///
    /// Returns `Ok(None)` when the guard refused.
    pub fn commit_if<E>(
        &self,
        guard: impl FnOnce() -> bool,
        mutate: impl FnOnce(&mut Draft) -> Result<(), E>,
    ) -> Result<Option<Commit>, E> {
        let mut current = self.current.lock();
        if !guard() {
            return Ok(None);
        }
        let result = commit(&current, mutate)?;
        if result.changed {
            *current = result.root.clone();
            self.tx.send_replace(result.root.clone());
        }
        Ok(Some(result))
    }
}
