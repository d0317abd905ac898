//! Snapshot / mutate / rebuild.
//!
//! ```text
//! original ──snapshot──▶ FxHashMap<NodeId, Arc<Node>>
//!    │
//!    └──copy──▶ Draft ──mutate──▶ Draft' ──rebuild──▶ new root
//!                                              │
//!              unchanged nodes come back as the original Arc
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::{Draft, Node, NodeId, Value};

/// Identity index of every container reachable from the original root.
///
/// Nodes are immutable, so the node itself is its snapshot. Holding the `Arc`
/// also keeps the address (and therefore the `NodeId`) from being reused
/// while the commit is running.
type Snapshots = FxHashMap<NodeId, Arc<Node>>;

/// Outcome of a commit.
#[derive(Debug, Clone)]
pub struct Commit {
    pub root: Value,
    pub changed: bool,
}

/// Apply `mutate` to a working copy of `root` and rebuild with sharing.
///
/// On `Err` the original tree is untouched and the error is returned as is.
pub fn commit<E>(root: &Value, mutate: impl FnOnce(&mut Draft) -> Result<(), E>) -> Result<Commit, E> {
    let snapshots = snapshot(root);
    let mut draft = Draft::from(root.clone());

    mutate(&mut draft)?;

    let new_root = rebuild(draft, &snapshots);
    let changed = !new_root.same(root);
    Ok(Commit {
        root: new_root,
        changed,
    })
}

/// Record every container once, keyed by identity.
///
/// Iterative so deep trees cannot overflow the stack; the visited check makes
/// aliased subtrees cost one visit.
fn snapshot(root: &Value) -> Snapshots {
    let mut snapshots = Snapshots::default();
    let mut stack: Vec<&Value> = vec![root];

    while let Some(value) = stack.pop() {
        let Value::Node(node) = value else {
            continue;
        };
        let id = NodeId::of(node);
        if snapshots.contains_key(&id) {
            continue;
        }
        snapshots.insert(id, Arc::clone(node));
        stack.extend(node.children());
    }

    snapshots
}

fn rebuild(draft: Draft, snapshots: &Snapshots) -> Value {
    match draft {
        Draft::Leaf(value) => value,
        Draft::Record { origin, fields } => {
            let fields: BTreeMap<String, Value> = fields
                .into_iter()
                .map(|(k, d)| (k, rebuild(d, snapshots)))
                .collect();

            if let Some(original) = snapshot_of(origin, snapshots)
                && let Node::Record(old) = &**original
                && old.len() == fields.len()
                && old
                    .iter()
                    .zip(&fields)
                    .all(|((ka, va), (kb, vb))| ka == kb && va.same(vb))
            {
                return Value::Node(Arc::clone(original));
            }
            Value::Node(Arc::new(Node::Record(fields)))
        }
        Draft::List { origin, items } => {
            let items: Vec<Value> = items.into_iter().map(|d| rebuild(d, snapshots)).collect();

            if let Some(original) = snapshot_of(origin, snapshots)
                && let Node::List(old) = &**original
                && old.len() == items.len()
                && old.iter().zip(&items).all(|(a, b)| a.same(b))
            {
                return Value::Node(Arc::clone(original));
            }
            Value::Node(Arc::new(Node::List(items)))
        }
    }
}

/// Original node for a draft, if it came from the tree being committed.
///
/// Drafts copied from nodes outside that tree are treated as new.
fn snapshot_of(origin: Option<NodeId>, snapshots: &Snapshots) -> Option<&Arc<Node>> {
    origin.and_then(|id| snapshots.get(&id))
}

#[cfg(test)]
pub(super) mod tests_support {
    use super::{Value, snapshot};

    pub fn snapshot_len(root: &Value) -> usize {
        snapshot(root).len()
    }
}
