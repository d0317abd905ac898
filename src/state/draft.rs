use std::collections::BTreeMap;
use std::sync::Arc;

use super::{Node, NodeId, Value};

/// Owned, mutable working copy of a [`Value`].
///
/// Container drafts remember the identity of the node they were copied from,
/// which is what lets the rebuild pass hand back the original node when
/// nothing underneath it changed.
#[derive(Debug, Clone)]
pub enum Draft {
    /// Scalar or opaque leaf.
    Leaf(Value),
    Record {
        origin: Option<NodeId>,
        fields: BTreeMap<String, Draft>,
    },
    List {
        origin: Option<NodeId>,
        items: Vec<Draft>,
    },
}

impl Default for Draft {
    fn default() -> Self {
        Self::Leaf(Value::Null)
    }
}

impl Draft {
    /// Fresh record with no origin.
    pub fn record() -> Self {
        Self::Record {
            origin: None,
            fields: BTreeMap::new(),
        }
    }

    /// Fresh list with no origin.
    pub fn list() -> Self {
        Self::List {
            origin: None,
            items: Vec::new(),
        }
    }

    pub fn origin(&self) -> Option<NodeId> {
        match self {
            Self::Record { origin, .. } | Self::List { origin, .. } => *origin,
            Self::Leaf(_) => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Draft> {
        match self {
            Self::Record { fields, .. } => fields.get(key),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Draft> {
        match self {
            Self::Record { fields, .. } => fields.get_mut(key),
            _ => None,
        }
    }

    /// Follow a chain of record keys.
    pub fn at_mut(&mut self, path: &[&str]) -> Option<&mut Draft> {
        path.iter().try_fold(self, |draft, key| draft.get_mut(key))
    }

    /// Set a field, turning a non-record draft into an empty record first.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Draft>) {
        self.ensure_record().insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Draft> {
        match self {
            Self::Record { fields, .. } => fields.remove(key),
            _ => None,
        }
    }

    /// Child record at `key`, created empty when missing or not a record.
    pub fn record_mut(&mut self, key: &str) -> &mut Draft {
        let fields = self.ensure_record();
        let child = fields.entry(key.to_string()).or_insert_with(Draft::record);
        if !matches!(child, Draft::Record { .. }) {
            *child = Draft::record();
        }
        child
    }

    pub fn push(&mut self, item: impl Into<Draft>) {
        if !matches!(self, Self::List { .. }) {
            *self = Self::list();
        }
        if let Self::List { items, .. } = self {
            items.push(item.into());
        }
    }

    pub fn items_mut(&mut self) -> Option<&mut Vec<Draft>> {
        match self {
            Self::List { items, .. } => Some(items),
            _ => None,
        }
    }

    pub fn as_leaf(&self) -> Option<&Value> {
        match self {
            Self::Leaf(v) => Some(v),
            _ => None,
        }
    }

    fn ensure_record(&mut self) -> &mut BTreeMap<String, Draft> {
        if !matches!(self, Self::Record { .. }) {
            *self = Self::record();
        }
        match self {
            Self::Record { fields, .. } => fields,
            _ => unreachable!("draft was just turned into a record"),
        }
    }
}

impl From<Value> for Draft {
    fn from(value: Value) -> Self {
        match value {
            Value::Node(node) => Self::from_node(&node),
            leaf => Self::Leaf(leaf),
        }
    }
}

impl Draft {
    fn from_node(node: &Arc<Node>) -> Self {
        let origin = Some(NodeId::of(node));
        match &**node {
            Node::Record(fields) => Self::Record {
                origin,
                fields: fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Draft::from(v.clone())))
                    .collect(),
            },
            Node::List(items) => Self::List {
                origin,
                items: items.iter().cloned().map(Draft::from).collect(),
            },
        }
    }
}

/// Deep comparison against a committed value; node identity is ignored.
impl PartialEq<Value> for Draft {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Leaf(leaf), value) => leaf == value,
            (Self::Record { fields, .. }, Value::Node(node)) => match &**node {
                Node::Record(committed) => {
                    fields.len() == committed.len()
                        && fields.iter().zip(committed).all(|((ka, a), (kb, b))| ka == kb && a == b)
                }
                Node::List(_) => false,
            },
            (Self::List { items, .. }, Value::Node(node)) => match &**node {
                Node::List(committed) => {
                    items.len() == committed.len() && items.iter().zip(committed).all(|(a, b)| a == b)
                }
                Node::Record(_) => false,
            },
            _ => false,
        }
    }
}

macro_rules! leaf_from {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Draft {
            fn from(v: $ty) -> Self {
                Self::from(Value::from(v))
            }
        })*
    };
}

leaf_from!(bool, f64, i64, u32, &str, String, super::Opaque, serde_json::Value);

impl<T: Into<Value>> From<Option<T>> for Draft {
    fn from(v: Option<T>) -> Self {
        Self::from(Value::from(v))
    }
}
