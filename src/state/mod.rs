//! Immutable application state with structural sharing.
//!
//! The state is a tree of [`Value`]s. Container nodes live behind `Arc`, and
//! the `Arc` address is the node's identity. Every change goes through
//! [`commit`], which rebuilds only the path from the root to the changed
//! leaves; untouched subtrees keep their identity, so consumers can answer
//! "did anything I render change?" with a pointer comparison.
//!
//! # Module Structure
//!
//! - `draft` - Mutable working copy handed to mutation closures
//! - `commit` - Snapshot / mutate / rebuild pass
//! - `store` - Single-writer store publishing new roots

mod commit;
mod draft;
mod store;


use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub use commit::{Commit, commit};
pub use draft::Draft;
pub use store::StateStore;

/// Root of the application state.
pub type StateTree = Value;

/// Identity of a container node, valid while the node is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub(crate) fn of(node: &Arc<Node>) -> Self {
        Self(Arc::as_ptr(node).cast::<()>() as usize)
    }
}

/// A leaf that is never recursed into and compares by identity only.
#[derive(Clone)]
pub struct Opaque(Arc<dyn Any + Send + Sync>);

impl Opaque {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Wrap raw bytes (compiler outputs, imported files).
    pub fn blob(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(bytes.into())
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Bytes of a blob created with [`Opaque::blob`].
    pub fn as_bytes(&self) -> Option<&[u8]> {
        self.downcast_ref::<Vec<u8>>().map(Vec::as_slice)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_bytes() {
            Some(bytes) => write!(f, "Opaque(<{} bytes>)", bytes.len()),
            None => f.write_str("Opaque(..)"),
        }
    }
}

/// A container node. Immutable once wrapped in an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Record(BTreeMap<String, Value>),
    List(Vec<Value>),
}

impl Node {
    pub fn len(&self) -> usize {
        match self {
            Self::Record(fields) => fields.len(),
            Self::List(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Child values in key (or index) order.
    pub(crate) fn children(&self) -> Box<dyn Iterator<Item = &Value> + '_> {
        match self {
            Self::Record(fields) => Box::new(fields.values()),
            Self::List(items) => Box::new(items.iter()),
        }
    }
}

/// One value in the state tree.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(Arc<str>),
    Opaque(Opaque),
    Node(Arc<Node>),
}

impl Value {
    /// Empty record.
    pub fn record() -> Self {
        Self::Node(Arc::new(Node::Record(BTreeMap::new())))
    }

    pub fn from_fields<K: Into<String>>(fields: impl IntoIterator<Item = (K, Value)>) -> Self {
        let fields = fields.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self::Node(Arc::new(Node::Record(fields)))
    }

    pub fn from_items(items: impl IntoIterator<Item = Value>) -> Self {
        Self::Node(Arc::new(Node::List(items.into_iter().collect())))
    }

    /// Identity equality: scalars by value, opaque leaves and nodes by address.
    pub fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a.to_bits() == b.to_bits(),
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Opaque(a), Self::Opaque(b)) => a.ptr_eq(b),
            (Self::Node(a), Self::Node(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            Self::Node(node) => Some(NodeId::of(node)),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Node(node) => match &**node {
                Node::Record(fields) => fields.get(key),
                Node::List(_) => None,
            },
            _ => None,
        }
    }

    pub fn index(&self, i: usize) -> Option<&Value> {
        match self {
            Self::Node(node) => match &**node {
                Node::List(items) => items.get(i),
                Node::Record(_) => None,
            },
            _ => None,
        }
    }

    /// Follow a chain of record keys.
    pub fn at(&self, path: &[&str]) -> Option<&Value> {
        path.iter().try_fold(self, |value, key| value.get(key))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_opaque(&self) -> Option<&Opaque> {
        match self {
            Self::Opaque(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Self::Node(node) => Some(node),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// Deep equality: containers by content, opaque leaves by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Node(a), Self::Node(b)) => Arc::ptr_eq(a, b) || a == b,
            _ => self.same(other),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i64> for Value {
    #[allow(clippy::cast_precision_loss)]
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s.into())
    }
}

impl From<Opaque> for Value {
    fn from(o: Opaque) -> Self {
        Self::Opaque(o)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Bridge for serde-serializable payloads (diagnostics, reports).
impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(b),
            Json::Number(n) => n.as_f64().map_or(Self::Null, Self::Number),
            Json::String(s) => Self::from(s),
            Json::Array(items) => Self::from_items(items.into_iter().map(Self::from)),
            Json::Object(map) => Self::from_fields(map.into_iter().map(|(k, v)| (k, Self::from(v)))),
        }
    }
}
