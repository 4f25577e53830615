//! Parse-tree nodes and the arena that owns them.
//!
//! The parser emits one [`Node`] per JSON object or array and plain [`Scalar`]s
//! for everything else. Nodes never point at each other directly; they hold
//! [`NodeId`] handles into a [`NodeArena`], which is what lets the resolver
//! express cyclic graphs and patch cells in place after the walk.

use indexmap::IndexMap;
use ordered_float::OrderedFloat;

use crate::types::TypeRef;
use crate::value::Value;

/// Stable handle of a node inside its document's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub(crate) fn new(index: usize) -> Self {
        NodeId(index as u32)
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// A leaf produced by the parser. Floats are wrapped so scalars can live in
/// hash-based containers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
    Str(String),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Human-readable kind tag for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Scalar::Null => "null",
            Scalar::Bool(_) => "boolean",
            Scalar::Int(_) => "integer",
            Scalar::Float(_) => "floating point",
            Scalar::Str(_) => "string",
        }
    }
}

/// One slot of a field map, keys array, or items array.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Child {
    Scalar(Scalar),
    Node(NodeId),
}

impl Child {
    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Child::Node(id) => Some(*id),
            Child::Scalar(_) => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Child::Scalar(Scalar::Null))
    }
}

/// Tagged value produced by the parser: scalar slot, array node, or object
/// node with optional identity markers.
///
/// Invariants (enforced at parse time, violations are `CorruptNode`):
/// - a node with `ref_id` carries no fields, keys, items, or value;
/// - `keys` present implies `items` present with equal length;
/// - `id` is unique per document.
#[derive(Debug, Clone, Default)]
pub struct Node {
    pub id: Option<u64>,
    pub ref_id: Option<u64>,
    /// Declared `@type`, later overwritten with the resolved/coerced type.
    pub declared: Option<TypeRef>,
    /// Type supplied by the surrounding context (field type, component type).
    pub hint: Option<TypeRef>,
    pub fields: IndexMap<String, Child>,
    pub keys: Option<Vec<Child>>,
    pub items: Option<Vec<Child>>,
    /// Scalar payload of a typed wrapper such as `{"@type":"long","value":7}`.
    pub value: Option<Scalar>,
    /// The under-construction resolved object.
    pub target: Option<Value>,
    pub finished: bool,
}

impl Node {
    /// A pure alias: `{"@ref": n}` possibly carrying its own `@id`.
    pub fn is_reference(&self) -> bool {
        self.ref_id.is_some()
    }

    /// Structural map shape: `@keys` present. Nodes whose *declared type* is a
    /// map kind are also treated as maps by the resolver, with keys
    /// synthesized from the field names.
    pub fn has_keys(&self) -> bool {
        self.keys.is_some()
    }

    pub fn has_items(&self) -> bool {
        self.items.is_some()
    }

    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
            && self.keys.is_none()
            && self.items.is_none()
            && self.value.is_none()
    }

    /// Synthetic array node wrapping an existing run of children. Used by map
    /// traversal to walk `@keys` and `@items` as two ordinary arrays.
    pub(crate) fn synthetic_array(children: Vec<Child>) -> Self {
        let len = children.len();
        Node {
            items: Some(children),
            target: Some(Value::List(vec![Value::Null; len])),
            ..Node::default()
        }
    }

    pub(crate) fn set_finished_target(&mut self, value: Value) -> &Value {
        self.target = Some(value);
        self.finished = true;
        self.target.as_ref().unwrap()
    }
}

/// Flat storage for every node of one document.
#[derive(Debug, Default)]
pub struct NodeArena {
    nodes: Vec<Node>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        self.nodes.push(node);
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.as_usize()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.as_usize()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Tear the arena down into its target cells, in handle order.
    pub(crate) fn into_targets(self) -> Vec<Option<Value>> {
        self.nodes.into_iter().map(|n| n.target).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_stable_and_distinct() {
        let mut arena = NodeArena::new();
        let a = arena.alloc(Node::default());
        let b = arena.alloc(Node {
            id: Some(7),
            ..Node::default()
        });
        assert_ne!(a, b);
        assert_eq!(arena.node(b).id, Some(7));
        arena.node_mut(a).finished = true;
        assert!(arena.node(a).finished);
        assert!(!arena.node(b).finished);
    }

    #[test]
    fn reference_nodes_are_empty() {
        let n = Node {
            ref_id: Some(3),
            ..Node::default()
        };
        assert!(n.is_reference());
        assert!(n.is_empty());
    }

    #[test]
    fn synthetic_array_presizes_its_target() {
        let n = Node::synthetic_array(vec![
            Child::Scalar(Scalar::Int(1)),
            Child::Scalar(Scalar::Int(2)),
        ]);
        match n.target {
            Some(Value::List(ref xs)) => assert_eq!(xs.len(), 2),
            ref other => panic!("expected list target, got {other:?}"),
        }
    }
}
