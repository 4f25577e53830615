//! Resolved target representation.
//!
//! A [`Value`] is what a node resolves to. Object identity is expressed
//! through [`Value::Ref`] handles rather than owning pointers: whenever the
//! source graph shares an object (or cycles back to one), the sharing side
//! holds the `NodeId` of the defining node and the one real value lives in
//! that node's target cell. Container wrappers hash and compare entry-wise in
//! insertion order so containers can themselves serve as map keys.

use std::hash::{Hash, Hasher};

use indexmap::{IndexMap, IndexSet};
use ordered_float::OrderedFloat;

use crate::node::{NodeId, Scalar};
use crate::types::TypeRef;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
    Str(String),
    Enum(EnumValue),
    /// Typed, fixed-length array.
    Array(ArrayValue),
    /// Append-style collection (also the staging buffer for sets).
    List(Vec<Value>),
    Set(SetValue),
    Map(MapValue),
    /// Typed record, or a generic map-of-maps when `class` is `None`.
    Object(ObjectValue),
    /// Handle to another node's target cell.
    Ref(NodeId),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumValue {
    pub class: String,
    pub variant: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArrayValue {
    pub component: TypeRef,
    pub items: Vec<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct ObjectValue {
    pub class: Option<String>,
    pub fields: IndexMap<String, Value>,
}

#[derive(Debug, Clone, Default)]
pub struct MapValue {
    pub entries: IndexMap<Value, Value>,
}

#[derive(Debug, Clone, Default)]
pub struct SetValue {
    pub elements: IndexSet<Value>,
}

impl Value {
    pub fn from_scalar(s: &Scalar) -> Value {
        match s {
            Scalar::Null => Value::Null,
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Int(i) => Value::Int(*i),
            Scalar::Float(f) => Value::Float(*f),
            Scalar::Str(s) => Value::Str(s.clone()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_ref_id(&self) -> Option<NodeId> {
        match self {
            Value::Ref(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectValue> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(xs) => Some(xs),
            Value::Array(a) => Some(&a.items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&MapValue> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&SetValue> {
        match self {
            Value::Set(s) => Some(s),
            _ => None,
        }
    }

    /// Field of an object value, `None` on any other shape.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.as_object().and_then(|o| o.fields.get(name))
    }

    /// Kind tag for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "floating point",
            Value::Str(_) => "string",
            Value::Enum(_) => "enum",
            Value::Array(_) => "array",
            Value::List(_) => "collection",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
            Value::Object(_) => "object",
            Value::Ref(_) => "reference",
        }
    }
}

// Entry-wise, order-sensitive equality keeps Eq consistent with the manual
// Hash impls below. IndexMap's own PartialEq ignores order, which would let
// equal keys hash differently.

impl PartialEq for ObjectValue {
    fn eq(&self, other: &Self) -> bool {
        self.class == other.class
            && self.fields.len() == other.fields.len()
            && self.fields.iter().eq(other.fields.iter())
    }
}

impl Eq for ObjectValue {}

impl Hash for ObjectValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.class.hash(state);
        for (k, v) in &self.fields {
            k.hash(state);
            v.hash(state);
        }
    }
}

impl PartialEq for MapValue {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len() && self.entries.iter().eq(other.entries.iter())
    }
}

impl Eq for MapValue {}

impl Hash for MapValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for (k, v) in &self.entries {
            k.hash(state);
            v.hash(state);
        }
    }
}

impl PartialEq for SetValue {
    fn eq(&self, other: &Self) -> bool {
        self.elements.len() == other.elements.len()
            && self.elements.iter().eq(other.elements.iter())
    }
}

impl Eq for SetValue {}

impl Hash for SetValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for v in &self.elements {
            v.hash(state);
        }
    }
}
