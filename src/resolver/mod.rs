//! Reference-resolving graph reconstruction.
//!
//! One [`resolve`] call owns its document exclusively: the node arena, the
//! reference table, a LIFO work stack, and three bookkeeping lists (forward
//! references, containers to rehash, missing fields). Traversal never
//! recurses into the drain loop; parents instantiate their children, store
//! handles to the still-empty target cells, and push the children for later.
//! Cleanup then runs the load-bearing sequence: patch forward references,
//! rehash hash-based containers, fire missing-field callbacks, clear.

mod map;
mod object;

pub(crate) use map::MapStrategy;
pub(crate) use object::ObjectStrategy;

use std::collections::HashSet;
use std::marker::PhantomData;

use crate::convert::{Converter, SimpleKind};
use crate::error::{Error, Result};
use crate::factory::SubtreeResolver;
use crate::graph::Graph;
use crate::node::{Child, Node, NodeArena, NodeId, Scalar};
use crate::options::{Mode, ReadOptions};
use crate::parse::Document;
use crate::refs::ReferenceTable;
use crate::types::{self, TypeRef};
use crate::value::{ArrayValue, MapValue, SetValue, Value};

/// Resolve a parsed document into an object graph.
pub fn resolve(doc: Document, root_type: Option<TypeRef>, options: ReadOptions) -> Result<Graph> {
    match options.mode {
        Mode::Typed => Resolver::<ObjectStrategy>::new(doc, options).run(root_type),
        Mode::Maps => Resolver::<MapStrategy>::new(doc, options).run(root_type),
    }
}

// --------------------------- bookkeeping ---------------------------------- //

/// Logical pointer to a slot that must be patched once the referenced
/// object's target exists. Created at traversal time, consumed exactly once
/// at patch time.
#[derive(Debug)]
struct UnresolvedReference {
    node: NodeId,
    slot: Slot,
    ref_id: u64,
}

#[derive(Debug)]
enum Slot {
    /// Field of a record or generic map target.
    Field(String),
    /// Placeholder at a fixed position of an array or random-access list.
    Index(usize),
    /// Element of a non-indexable collection, appended after traversal.
    Append,
}

#[derive(Debug)]
struct MissingFieldRecord {
    node: NodeId,
    field: String,
    value: Child,
}

/// Hash-based containers are only filled after patching, when element
/// identities are final.
#[derive(Debug)]
enum Rehash {
    Map {
        node: NodeId,
        keys: NodeId,
        items: NodeId,
    },
    Set {
        node: NodeId,
    },
}

// ---------------------------- strategies ---------------------------------- //

/// The decisions that differ between typed and map output: how to make a
/// record shell and how to place its fields. Arrays, collections, maps,
/// references, and cleanup are shared.
pub(crate) trait Strategy: Sized {
    fn create_record(r: &mut Resolver<Self>, node: NodeId, ty: &TypeRef) -> Result<Value>;
    fn traverse_fields(r: &mut Resolver<Self>, node: NodeId) -> Result<()>;
}

// ------------------------------ resolver ---------------------------------- //

pub(crate) struct Resolver<S: Strategy> {
    arena: NodeArena,
    refs: ReferenceTable,
    root: Child,
    options: ReadOptions,
    converter: Converter,
    stack: Vec<NodeId>,
    visited: HashSet<NodeId>,
    unresolved: Vec<UnresolvedReference>,
    rehash: Vec<Rehash>,
    missing: Vec<MissingFieldRecord>,
    _strategy: PhantomData<S>,
}

impl<S: Strategy> Resolver<S> {
    fn new(doc: Document, options: ReadOptions) -> Self {
        Resolver {
            arena: doc.arena,
            refs: doc.refs,
            root: doc.root,
            options,
            converter: Converter::new(),
            stack: Vec::new(),
            visited: HashSet::new(),
            unresolved: Vec::new(),
            rehash: Vec::new(),
            missing: Vec::new(),
            _strategy: PhantomData,
        }
    }

    fn run(mut self, root_type: Option<TypeRef>) -> Result<Graph> {
        if self.options.mode == Mode::Maps {
            if let Some(want) = &root_type {
                verify_maps_root_type(want)?;
            }
        }
        let root_value = match self.root.clone() {
            Child::Scalar(s) => Value::from_scalar(&s),
            Child::Node(id) => {
                let id = if self.arena.node(id).is_reference() {
                    let ref_id = self.arena.node(id).ref_id.unwrap();
                    self.refs.resolve_or_err(&self.arena, ref_id)?
                } else {
                    id
                };
                if !self.arena.node(id).finished {
                    if let Some(ty) = &root_type {
                        self.arena.node_mut(id).hint = Some(ty.clone());
                    }
                    self.create_instance(id)?;
                    if !self.arena.node(id).finished {
                        self.push(id);
                        self.drain()?;
                    }
                }
                Value::Ref(id)
            }
        };

        let ids = self.refs.snapshot();
        self.cleanup()?;

        let root_value = match &root_type {
            Some(want) => self.check_root_type(root_value, want)?,
            None => root_value,
        };
        Ok(Graph::new(self.arena.into_targets(), ids, root_value))
    }

    fn push(&mut self, node: NodeId) {
        self.stack.push(node);
    }

    /// Pop until empty. Each node is traversed at most once; a node seen a
    /// second time is complete by construction and marked finished.
    fn drain(&mut self) -> Result<()> {
        while let Some(id) = self.stack.pop() {
            let node = self.arena.node(id);
            if node.is_reference() || node.finished {
                continue;
            }
            if !self.visited.insert(id) {
                self.arena.node_mut(id).finished = true;
                continue;
            }
            self.traverse(id)?;
        }
        Ok(())
    }

    fn traverse(&mut self, id: NodeId) -> Result<()> {
        let node = self.arena.node(id);
        let ty = node.declared.clone().unwrap_or(TypeRef::Any);
        if node.has_keys() || ty.is_map_kind() {
            self.traverse_map(id)
        } else if node.has_items() {
            if ty.is_collection_kind() {
                self.traverse_collection(id, &ty)
            } else {
                self.traverse_array(id, &ty)
            }
        } else {
            S::traverse_fields(self, id)
        }
    }

    // -------------------------- instantiation ----------------------------- //

    /// Make the shell for a node's target, never populating children.
    ///
    /// Attempt order: coerced type, enum/enum-set, user factory, scalar
    /// conversion, array allocation, record default.
    fn create_instance(&mut self, id: NodeId) -> Result<()> {
        if self.arena.node(id).target.is_some() {
            return Ok(());
        }
        let ty = self.resolve_target_type(id)?;

        let enum_class = self
            .options
            .registry
            .enum_class(&ty)
            .map(|(class, _)| class.to_string());
        if let Some(class) = enum_class {
            let value = self.instantiate_enum(id, &class)?;
            self.arena.node_mut(id).set_finished_target(value);
            return Ok(());
        }

        if let Some(factory) = self.options.factories.get(&ty) {
            let factory = factory.clone();
            let value = (factory.create)(&ty, id, self)?;
            let node = self.arena.node_mut(id);
            if factory.object_final {
                node.set_finished_target(value);
            } else if node.target.is_none() {
                node.target = Some(value);
            }
            return Ok(());
        }

        let node = self.arena.node(id);
        if let (Some(source), Some(kind)) = (node.value.clone(), SimpleKind::of(&ty)) {
            if self.converter.is_supported(&source, kind) {
                match self.converter.convert(&source, kind) {
                    Ok(v) => {
                        self.arena.node_mut(id).set_finished_target(v);
                        return Ok(());
                    }
                    Err(e) => {
                        log::debug!("conversion probe to `{ty}` failed, continuing: {e}");
                    }
                }
            }
        }

        let item_len = self.arena.node(id).items.as_ref().map_or(0, Vec::len);
        let has_keys = self.arena.node(id).has_keys();
        let has_items = self.arena.node(id).items.is_some();

        if ty.is_map_kind() || has_keys {
            self.arena.node_mut(id).target = Some(Value::Map(MapValue::default()));
            return Ok(());
        }
        if ty.is_array() {
            let value = Value::Array(ArrayValue {
                component: ty.component(),
                items: vec![Value::Null; item_len],
            });
            self.arena.node_mut(id).target = Some(value);
            return Ok(());
        }
        if ty == TypeRef::Any && has_items {
            // untyped array: index-addressed like a real one
            self.arena.node_mut(id).target = Some(Value::List(vec![Value::Null; item_len]));
            return Ok(());
        }
        if ty.is_collection_kind() {
            self.arena.node_mut(id).target = Some(Value::List(Vec::new()));
            return Ok(());
        }

        let value = S::create_record(self, id, &ty)?;
        self.arena.node_mut(id).target = Some(value);
        Ok(())
    }

    /// Effective target type: declared `@type`, else the caller-supplied
    /// hint; pushed through the user coercion table and the sorted-container
    /// downgrade, then persisted back onto the node so every later pass
    /// agrees.
    fn resolve_target_type(&mut self, id: NodeId) -> Result<TypeRef> {
        let node = self.arena.node(id);
        let ty = node
            .declared
            .clone()
            .or_else(|| node.hint.clone())
            .unwrap_or(TypeRef::Any);
        let ty = types::coerce(ty, &self.options.coercions)?;
        let ty = ty.insertion_ordered_fallback();
        self.arena.node_mut(id).declared = Some(ty.clone());
        Ok(ty)
    }

    /// Single enum constant, or an enum-set when the node carries `@items`.
    fn instantiate_enum(&mut self, id: NodeId, class: &str) -> Result<Value> {
        let node = self.arena.node(id);
        if let Some(items) = node.items.clone() {
            let mut elements = indexmap::IndexSet::new();
            for (i, child) in items.iter().enumerate() {
                let variant = self.enum_variant_of_child(class, child).map_err(|found| {
                    Error::ArrayElementMismatch {
                        component: class.to_string(),
                        index: i,
                        found,
                    }
                })?;
                elements.insert(Value::Enum(crate::value::EnumValue {
                    class: class.to_string(),
                    variant,
                }));
            }
            return Ok(Value::Set(SetValue { elements }));
        }

        let variant = match (&node.value, node.fields.get("name")) {
            (Some(Scalar::Str(s)), _) => s.clone(),
            (_, Some(Child::Scalar(Scalar::Str(s)))) => s.clone(),
            _ => {
                return Err(Error::Instantiation {
                    ty: class.to_string(),
                    reason: "enum constant requires a string value or `name` field".into(),
                })
            }
        };
        self.checked_variant(class, &variant)
            .map_err(|reason| Error::Instantiation {
                ty: class.to_string(),
                reason,
            })
    }

    fn enum_variant_of_child(&self, class: &str, child: &Child) -> std::result::Result<String, String> {
        let name = match child {
            Child::Scalar(Scalar::Str(s)) => s.clone(),
            Child::Node(n) => match self.arena.node(*n).fields.get("name") {
                Some(Child::Scalar(Scalar::Str(s))) => s.clone(),
                _ => return Err("enum-set element is not a variant name".into()),
            },
            other => return Err(format!("enum-set element is {other:?}")),
        };
        match self.checked_variant(class, &name) {
            Ok(_) => Ok(name),
            Err(e) => Err(e),
        }
    }

    fn checked_variant(&self, class: &str, variant: &str) -> std::result::Result<Value, String> {
        let Some((_, desc)) = self
            .options
            .registry
            .enum_class(&TypeRef::Named(class.to_string()))
        else {
            return Err(format!("`{class}` is not an enum"));
        };
        if !desc.has_variant(variant) {
            return Err(format!("no variant `{variant}` on enum `{class}`"));
        }
        Ok(Value::Enum(crate::value::EnumValue {
            class: class.to_string(),
            variant: variant.to_string(),
        }))
    }

    // ---------------------------- traversals ------------------------------ //

    fn traverse_array(&mut self, id: NodeId, ty: &TypeRef) -> Result<()> {
        let component = ty.component();
        let comp_kind = SimpleKind::of(&component);
        let items: Vec<Child> = self.arena.node(id).items.clone().unwrap_or_default();

        for (i, child) in items.iter().enumerate() {
            let slot_value = match child {
                Child::Scalar(s) => {
                    self.coerce_scalar(s, &component, comp_kind)
                        .map_err(|found| Error::ArrayElementMismatch {
                            component: component.to_string(),
                            index: i,
                            found,
                        })?
                }
                Child::Node(c) => match self.child_node_value(id, *c, &component, Slot::Index(i))? {
                    Some(v) => v,
                    None => Value::Null, // placeholder awaiting patch
                },
            };
            self.store_indexed(id, i, slot_value)?;
        }
        Ok(())
    }

    fn traverse_collection(&mut self, id: NodeId, ty: &TypeRef) -> Result<()> {
        let component = ty.component();
        let comp_kind = SimpleKind::of(&component);
        let is_set = ty.is_set_kind();
        if is_set {
            self.rehash.push(Rehash::Set { node: id });
        }
        let items: Vec<Child> = self.arena.node(id).items.clone().unwrap_or_default();

        for (i, child) in items.iter().enumerate() {
            match child {
                Child::Scalar(s) => {
                    let v = self.coerce_scalar(s, &component, comp_kind).map_err(|found| {
                        Error::ArrayElementMismatch {
                            component: component.to_string(),
                            index: i,
                            found,
                        }
                    })?;
                    self.store_append(id, v)?;
                }
                Child::Node(c) => {
                    // sets cannot hold a positional placeholder; lists can
                    let slot = if is_set {
                        Slot::Append
                    } else {
                        Slot::Index(self.list_len(id))
                    };
                    match self.child_node_value(id, *c, &component, slot)? {
                        Some(v) => self.store_append(id, v)?,
                        None if is_set => {}
                        None => self.store_append(id, Value::Null)?,
                    }
                }
            }
        }
        Ok(())
    }

    /// Maps defer their own population: walk `@keys` and `@items` as two
    /// synthetic arrays now, zip them into the container in the rehash pass.
    fn traverse_map(&mut self, id: NodeId) -> Result<()> {
        let node = self.arena.node(id);
        let (keys, items) = match (&node.keys, &node.items) {
            (Some(k), Some(v)) => (k.clone(), v.clone()),
            (None, _) => {
                // string-keyed map written as a plain object
                let keys = node
                    .fields
                    .keys()
                    .map(|k| Child::Scalar(Scalar::Str(k.clone())))
                    .collect::<Vec<_>>();
                let items = node.fields.values().cloned().collect::<Vec<_>>();
                (keys, items)
            }
            _ => return Err(Error::corrupt("@keys present but @items missing")),
        };
        if keys.is_empty() {
            return Ok(());
        }

        let keys_node = self.arena.alloc(Node::synthetic_array(keys));
        let items_node = self.arena.alloc(Node::synthetic_array(items));
        self.push(keys_node);
        self.push(items_node);
        self.rehash.push(Rehash::Map {
            node: id,
            keys: keys_node,
            items: items_node,
        });
        Ok(())
    }

    // ------------------------- shared child logic ------------------------- //

    /// Value for a node-valued child, instantiating and scheduling it as
    /// needed. `None` means the child is a forward reference that was
    /// recorded for the patch pass.
    fn child_node_value(
        &mut self,
        parent: NodeId,
        child: NodeId,
        hint: &TypeRef,
        slot: Slot,
    ) -> Result<Option<Value>> {
        let cnode = self.arena.node(child);
        if cnode.is_reference() {
            let ref_id = cnode.ref_id.unwrap();
            return match self.refs.resolve(&self.arena, ref_id) {
                Some(def) if self.arena.node(def).target.is_some() => Ok(Some(Value::Ref(def))),
                _ => {
                    self.unresolved.push(UnresolvedReference {
                        node: parent,
                        slot,
                        ref_id,
                    });
                    Ok(None)
                }
            };
        }
        if !cnode.finished {
            if self.arena.node(child).target.is_none() {
                self.arena.node_mut(child).hint = Some(hint.clone());
            }
            self.create_instance(child)?;
            if !self.arena.node(child).finished {
                self.push(child);
            }
        }
        Ok(Some(Value::Ref(child)))
    }

    /// Scalar into a slot of declared type. Errors carry only the reason; the
    /// caller wraps them with slot context.
    fn coerce_scalar(
        &self,
        s: &Scalar,
        want: &TypeRef,
        want_kind: Option<SimpleKind>,
    ) -> std::result::Result<Value, String> {
        if s.is_null() {
            return Ok(Value::Null);
        }
        if let Some(kind) = want_kind {
            if self.converter.matches(s, kind) {
                return Ok(Value::from_scalar(s));
            }
            return self.converter.convert(s, kind);
        }
        match want {
            TypeRef::Any => Ok(Value::from_scalar(s)),
            TypeRef::Named(n) if self.options.registry.enum_class(want).is_some() => match s {
                Scalar::Str(v) => self.checked_variant(n, v),
                other => Err(format!("{} is not an enum variant name", other.kind())),
            },
            other => Err(format!("no coercion from {} to `{other}`", s.kind())),
        }
    }

    fn list_len(&self, id: NodeId) -> usize {
        match self.arena.node(id).target.as_ref() {
            Some(Value::List(xs)) => xs.len(),
            _ => 0,
        }
    }

    fn store_indexed(&mut self, id: NodeId, index: usize, value: Value) -> Result<()> {
        match self.arena.node_mut(id).target.as_mut() {
            Some(Value::Array(a)) if index < a.items.len() => {
                a.items[index] = value;
                Ok(())
            }
            Some(Value::List(xs)) if index < xs.len() => {
                xs[index] = value;
                Ok(())
            }
            other => Err(Error::corrupt(format!(
                "indexed store into non-indexable target {:?}",
                other.as_ref().map(|v| v.kind())
            ))),
        }
    }

    fn store_append(&mut self, id: NodeId, value: Value) -> Result<()> {
        match self.arena.node_mut(id).target.as_mut() {
            Some(Value::List(xs)) => {
                xs.push(value);
                Ok(())
            }
            other => Err(Error::corrupt(format!(
                "append into non-collection target {:?}",
                other.as_ref().map(|v| v.kind())
            ))),
        }
    }

    /// Write one resolved field, shared by both strategies and the patch
    /// pass.
    fn insert_field(&mut self, id: NodeId, name: String, value: Value) -> Result<()> {
        match self.arena.node_mut(id).target.as_mut() {
            Some(Value::Object(o)) => {
                o.fields.insert(name, value);
                Ok(())
            }
            other => Err(Error::FieldAccess {
                ty: other
                    .as_ref()
                    .map_or("missing target", |v| v.kind())
                    .to_string(),
                field: name,
                reason: "target does not accept fields".into(),
            }),
        }
    }

    fn has_field(&self, id: NodeId, name: &str) -> bool {
        self.arena
            .node(id)
            .target
            .as_ref()
            .and_then(Value::as_object)
            .is_some_and(|o| o.fields.contains_key(name))
    }

    fn record_missing(&mut self, node: NodeId, field: String, value: Child) {
        self.missing.push(MissingFieldRecord { node, field, value });
    }

    // ------------------------------ cleanup ------------------------------- //

    /// Patch, rehash, notify, clear. The order is load-bearing: rehash must
    /// see patched identities, and missing-field callbacks fire only once
    /// the graph is whole.
    fn cleanup(&mut self) -> Result<()> {
        self.patch_unresolved()?;
        self.rehash_containers();
        self.notify_missing_fields();
        self.refs.clear();
        self.rehash.clear();
        self.missing.clear();
        self.stack.clear();
        self.visited.clear();
        Ok(())
    }

    fn patch_unresolved(&mut self) -> Result<()> {
        let unresolved = std::mem::take(&mut self.unresolved);
        for ur in unresolved {
            let def = self.refs.resolve_or_err(&self.arena, ur.ref_id)?;
            if self.arena.node(def).target.is_none() {
                return Err(Error::UnknownReference(ur.ref_id));
            }
            let value = Value::Ref(def);
            match ur.slot {
                Slot::Field(name) => self.insert_field(ur.node, name, value)?,
                Slot::Index(i) => self.store_indexed(ur.node, i, value)?,
                Slot::Append => self.store_append(ur.node, value)?,
            }
        }
        Ok(())
    }

    fn rehash_containers(&mut self) {
        let entries = std::mem::take(&mut self.rehash);
        for entry in entries {
            match entry {
                Rehash::Map { node, keys, items } => {
                    let keys = self.take_list(keys);
                    let values = self.take_list(items);
                    let mut map = MapValue::default();
                    for (k, v) in keys.into_iter().zip(values) {
                        map.entries.insert(k, v);
                    }
                    self.arena.node_mut(node).set_finished_target(Value::Map(map));
                }
                Rehash::Set { node } => {
                    let elements = self.take_list(node).into_iter().collect();
                    self.arena
                        .node_mut(node)
                        .set_finished_target(Value::Set(SetValue { elements }));
                }
            }
        }
    }

    fn take_list(&self, id: NodeId) -> Vec<Value> {
        match self.arena.node(id).target.as_ref() {
            Some(Value::List(xs)) => xs.clone(),
            _ => Vec::new(),
        }
    }

    fn notify_missing_fields(&self) {
        let Some(handler) = &self.options.missing_field_handler else {
            return;
        };
        for mf in &self.missing {
            if let Some(target) = self.arena.node(mf.node).target.as_ref() {
                handler(target, &mf.field, &mf.value);
            }
        }
    }

    // ----------------------------- root type ------------------------------ //

    fn check_root_type(&self, value: Value, want: &TypeRef) -> Result<Value> {
        let actual = self.deref_value(&value);
        if value_matches(actual, want) {
            return Ok(value);
        }
        if let Some(kind) = SimpleKind::of(want) {
            match self.converter.convert_value(actual, kind) {
                Ok(v) => return Ok(v),
                Err(e) => log::debug!("root conversion to `{want}` failed: {e}"),
            }
        }
        Err(Error::RootTypeMismatch {
            expected: want.to_string(),
            found: actual.kind().to_string(),
        })
    }

    fn deref_value<'a>(&'a self, value: &'a Value) -> &'a Value {
        let mut v = value;
        for _ in 0..self.arena.len().max(1) {
            match v {
                Value::Ref(id) => match self.arena.node(*id).target.as_ref() {
                    Some(next) => v = next,
                    None => return v,
                },
                other => return other,
            }
        }
        v
    }
}

/// Map mode can only promise roots it can actually build: simple types,
/// container kinds, and arrays of those. Registered records require the typed
/// strategy.
fn verify_maps_root_type(want: &TypeRef) -> Result<()> {
    fn ok(t: &TypeRef) -> bool {
        match t {
            TypeRef::Array(c) => ok(c),
            TypeRef::Named(_) => false,
            _ => true,
        }
    }
    if ok(want) {
        Ok(())
    } else {
        Err(Error::RootTypeMismatch {
            expected: "a simple, collection, map, or array root type".into(),
            found: want.to_string(),
        })
    }
}

/// Kind-level assignability used for the root-type contract.
fn value_matches(value: &Value, want: &TypeRef) -> bool {
    match want {
        TypeRef::Any => true,
        TypeRef::Bool => matches!(value, Value::Bool(_)),
        TypeRef::Int => matches!(value, Value::Int(_)),
        TypeRef::Float => matches!(value, Value::Float(_)),
        TypeRef::Str => matches!(value, Value::Str(_)),
        TypeRef::Array(_) => matches!(value, Value::Array(_) | Value::List(_)),
        TypeRef::List(_) => matches!(value, Value::List(_) | Value::Array(_)),
        TypeRef::Set(_) | TypeRef::SortedSet(_) => {
            matches!(value, Value::Set(_) | Value::List(_))
        }
        TypeRef::Map(_, _) | TypeRef::SortedMap(_, _) => match value {
            Value::Map(_) => true,
            Value::Object(o) => o.class.is_none(),
            _ => false,
        },
        TypeRef::Named(n) => match value {
            Value::Object(o) => o.class.as_deref() == Some(n.as_str()),
            Value::Enum(e) => e.class == *n,
            _ => false,
        },
    }
}

impl<S: Strategy> SubtreeResolver for Resolver<S> {
    fn arena(&self) -> &NodeArena {
        &self.arena
    }

    fn converter(&self) -> &Converter {
        &self.converter
    }

    fn resolve_subtree(&mut self, node: NodeId) -> Result<Value> {
        let n = self.arena.node(node);
        if n.is_reference() {
            let ref_id = n.ref_id.unwrap();
            let def = self.refs.resolve_or_err(&self.arena, ref_id)?;
            return Ok(Value::Ref(def));
        }
        if !n.finished {
            self.create_instance(node)?;
            if !self.arena.node(node).finished {
                self.push(node);
                self.drain()?;
            }
        }
        // hand scalars back by value; factories feed them to constructors
        match self.arena.node(node).target.as_ref() {
            Some(v @ (Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_))) => {
                Ok(v.clone())
            }
            _ => Ok(Value::Ref(node)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet as StdHashSet;
    use std::sync::{Arc, Mutex};

    use indexmap::IndexMap;
    use serde_json::json;

    use crate::factory::{gather_remaining_values, FactoryRegistry};
    use crate::from_value;
    use crate::node::{Child, Scalar};
    use crate::options::ReadOptions;
    use crate::types::{TypeRef, TypeRegistry};
    use crate::value::{ObjectValue, Value};
    use crate::Error;

    fn point_registry() -> TypeRegistry {
        let mut reg = TypeRegistry::new();
        reg.register_record("Point", [("x", TypeRef::Int), ("y", TypeRef::Int)]);
        reg
    }

    fn typed(reg: TypeRegistry) -> ReadOptions {
        ReadOptions::new().with_registry(reg)
    }

    // ------------------------- arrays and roots --------------------------- //

    #[test]
    fn array_of_primitives_with_coercion() {
        let g = from_value(
            &json!([1, "2", 3.0]),
            Some(TypeRef::parse("int[]").unwrap()),
            ReadOptions::new(),
        )
        .unwrap();
        match g.root() {
            Value::Array(a) => {
                assert_eq!(a.component, TypeRef::Int);
                assert_eq!(a.items, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
            }
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn array_element_mismatch_aborts() {
        let err = from_value(
            &json!(["nope"]),
            Some(TypeRef::parse("int[]").unwrap()),
            ReadOptions::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::ArrayElementMismatch { index: 0, .. }), "{err}");
    }

    #[test]
    fn scalar_root_converts_to_requested_type() {
        let g = from_value(&json!("42"), Some(TypeRef::Int), ReadOptions::new()).unwrap();
        assert_eq!(g.root(), &Value::Int(42));
    }

    #[test]
    fn incompatible_root_type_faults() {
        let err = from_value(
            &json!(5),
            Some(TypeRef::parse("List<int>").unwrap()),
            ReadOptions::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::RootTypeMismatch { .. }), "{err}");
    }

    #[test]
    fn maps_mode_rejects_record_roots() {
        let err = from_value(
            &json!({"x": 1}),
            Some(TypeRef::Named("Point".into())),
            ReadOptions::maps(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::RootTypeMismatch { .. }), "{err}");
    }

    // ------------------------------ records ------------------------------- //

    #[test]
    fn typed_record_from_declared_type() {
        let g = from_value(
            &json!({"@type": "Point", "x": 3, "y": 4}),
            None,
            typed(point_registry()),
        )
        .unwrap();
        let root = g.root();
        assert_eq!(root.field("x"), Some(&Value::Int(3)));
        assert_eq!(root.field("y"), Some(&Value::Int(4)));
        assert_eq!(root.as_object().unwrap().class.as_deref(), Some("Point"));
    }

    #[test]
    fn typed_record_from_root_hint() {
        let g = from_value(
            &json!({"x": 3, "y": 4}),
            Some(TypeRef::Named("Point".into())),
            typed(point_registry()),
        )
        .unwrap();
        assert_eq!(g.root().as_object().unwrap().class.as_deref(), Some("Point"));
    }

    #[test]
    fn unregistered_type_fails_in_typed_mode() {
        let err = from_value(&json!({"@type": "Mystery", "x": 1}), None, ReadOptions::new())
            .unwrap_err();
        assert!(matches!(err, Error::Instantiation { .. }), "{err}");
    }

    #[test]
    fn unknown_type_policy_substitutes_a_class() {
        let opts = typed(point_registry()).with_unknown_type("Point");
        let g = from_value(&json!({"x": "1", "y": 2}), None, opts).unwrap();
        let root = g.root();
        assert_eq!(root.as_object().unwrap().class.as_deref(), Some("Point"));
        assert_eq!(root.field("x"), Some(&Value::Int(1)));
    }

    #[test]
    fn untyped_record_stays_a_generic_map() {
        let g = from_value(&json!({"x": "1"}), None, ReadOptions::new()).unwrap();
        let root = g.root();
        assert!(root.as_object().unwrap().class.is_none());
        assert_eq!(root.field("x"), Some(&Value::Str("1".into())));
    }

    #[test]
    fn typed_scalar_wrapper_converts_and_finishes() {
        let g = from_value(&json!({"@type": "long", "value": "7"}), None, ReadOptions::new())
            .unwrap();
        assert_eq!(g.root(), &Value::Int(7));
    }

    #[test]
    fn coercion_table_applies_at_resolve_time() {
        let opts = typed(point_registry()).with_coercion("LegacyPoint", "Point");
        let g = from_value(&json!({"@type": "LegacyPoint", "x": 1, "y": 2}), None, opts).unwrap();
        assert_eq!(g.root().as_object().unwrap().class.as_deref(), Some("Point"));
    }

    // ---------------------------- references ------------------------------ //

    #[test]
    fn two_node_cycle_preserves_identity() {
        let g = from_value(
            &json!([
                {"@id": 1, "peer": {"@ref": 2}},
                {"@id": 2, "peer": {"@ref": 1}}
            ]),
            None,
            ReadOptions::new(),
        )
        .unwrap();
        let n1 = g.node_for_id(1).unwrap();
        let n2 = g.node_for_id(2).unwrap();
        assert_eq!(g.target(n1).unwrap().field("peer"), Some(&Value::Ref(n2)));
        assert_eq!(g.target(n2).unwrap().field("peer"), Some(&Value::Ref(n1)));
    }

    #[test]
    fn forward_reference_lands_in_the_right_field() {
        let g = from_value(
            &json!([
                {"hold": {"@id": 9, "name": "x"}},
                {"peer": {"@ref": 9}}
            ]),
            None,
            ReadOptions::new(),
        )
        .unwrap();
        let n9 = g.node_for_id(9).unwrap();
        let Value::List(xs) = g.root() else {
            panic!("expected list root");
        };
        let referrer = g.deref(&xs[1]);
        assert_eq!(referrer.field("peer"), Some(&Value::Ref(n9)));
        assert_eq!(g.target(n9).unwrap().field("name"), Some(&Value::Str("x".into())));
    }

    #[test]
    fn forward_reference_in_list_keeps_its_position() {
        let g = from_value(
            &json!([
                {"hold": {"@id": 7, "v": 1}},
                {"@type": "List<any>", "@items": [{"@ref": 7}, "tail"]}
            ]),
            None,
            ReadOptions::new(),
        )
        .unwrap();
        let n7 = g.node_for_id(7).unwrap();
        let Value::List(xs) = g.root() else {
            panic!("expected list root");
        };
        let list = g.deref(&xs[1]).as_list().unwrap();
        assert_eq!(list[0], Value::Ref(n7));
        assert_eq!(list[1], Value::Str("tail".into()));
    }

    #[test]
    fn forward_reference_appends_into_sets_after_patching() {
        let g = from_value(
            &json!([
                {"hold": {"@id": 4, "v": 1}},
                {"@type": "Set<any>", "@items": [{"@ref": 4}]}
            ]),
            None,
            ReadOptions::new(),
        )
        .unwrap();
        let n4 = g.node_for_id(4).unwrap();
        let Value::List(xs) = g.root() else {
            panic!("expected list root");
        };
        let set = g.deref(&xs[1]).as_set().unwrap();
        assert_eq!(set.elements.len(), 1);
        assert!(set.elements.contains(&Value::Ref(n4)));
    }

    #[test]
    fn unknown_root_reference_faults() {
        let err = from_value(&json!({"@ref": 42}), None, ReadOptions::new()).unwrap_err();
        assert!(matches!(err, Error::UnknownReference(42)), "{err}");
    }

    #[test]
    fn unknown_forward_reference_faults_at_patch_time() {
        let err = from_value(&json!({"a": {"@ref": 42}}), None, ReadOptions::new()).unwrap_err();
        assert!(matches!(err, Error::UnknownReference(42)), "{err}");
    }

    // ------------------------------- maps ---------------------------------- //

    #[test]
    fn map_with_forward_referenced_key_retrieves_after_rehash() {
        let g = from_value(
            &json!([
                {"hold": {"@id": 9, "k": "x"}},
                {"@keys": [{"@ref": 9}], "@items": ["v"]}
            ]),
            None,
            ReadOptions::new(),
        )
        .unwrap();
        let n9 = g.node_for_id(9).unwrap();
        let Value::List(xs) = g.root() else {
            panic!("expected list root");
        };
        let map = g.deref(&xs[1]).as_map().unwrap();
        assert_eq!(map.entries.get(&Value::Ref(n9)), Some(&Value::Str("v".into())));
        assert_eq!(g.map_get(map, &Value::Ref(n9)), Some(&Value::Str("v".into())));
    }

    #[test]
    fn sorted_map_downgrades_to_insertion_order() {
        let g = from_value(
            &json!({"@type": "SortedMap<string,int>", "b": 2, "a": 1}),
            None,
            ReadOptions::new(),
        )
        .unwrap();
        let map = g.root().as_map().unwrap();
        let keys: Vec<&Value> = map.entries.keys().collect();
        assert_eq!(keys, vec![&Value::Str("b".into()), &Value::Str("a".into())]);
        assert_eq!(map.entries.get(&Value::Str("a".into())), Some(&Value::Int(1)));
    }

    #[test]
    fn set_items_deduplicate_on_rehash() {
        let g = from_value(
            &json!({"@type": "Set<int>", "@items": [1, 2, 2]}),
            None,
            ReadOptions::new(),
        )
        .unwrap();
        let set = g.root().as_set().unwrap();
        assert_eq!(set.elements.len(), 2);
        assert!(set.elements.contains(&Value::Int(2)));
    }

    // ------------------------------- enums --------------------------------- //

    fn color_registry() -> TypeRegistry {
        let mut reg = TypeRegistry::new();
        reg.register_enum("Color", &["RED", "GREEN", "BLUE"]);
        reg.register_record("Shirt", [("color", TypeRef::Named("Color".into()))]);
        reg
    }

    #[test]
    fn enum_constant_from_name_field() {
        let g = from_value(
            &json!({"@type": "Color", "name": "GREEN"}),
            None,
            typed(color_registry()),
        )
        .unwrap();
        match g.root() {
            Value::Enum(e) => {
                assert_eq!(e.class, "Color");
                assert_eq!(e.variant, "GREEN");
            }
            other => panic!("expected enum, got {other:?}"),
        }
    }

    #[test]
    fn enum_with_items_becomes_an_enum_set() {
        let g = from_value(
            &json!({"@type": "Color", "@items": ["RED", "BLUE"]}),
            None,
            typed(color_registry()),
        )
        .unwrap();
        let set = g.root().as_set().unwrap();
        assert_eq!(set.elements.len(), 2);
    }

    #[test]
    fn unknown_variant_faults() {
        let err = from_value(
            &json!({"@type": "Color", "name": "PURPLE"}),
            None,
            typed(color_registry()),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Instantiation { .. }), "{err}");
    }

    #[test]
    fn enum_field_accepts_variant_names() {
        let g = from_value(
            &json!({"@type": "Shirt", "color": "RED"}),
            None,
            typed(color_registry()),
        )
        .unwrap();
        match g.root().field("color") {
            Some(Value::Enum(e)) => assert_eq!(e.variant, "RED"),
            other => panic!("expected enum field, got {other:?}"),
        }
    }

    // ----------------------------- factories ------------------------------- //

    #[test]
    fn object_final_factory_short_circuits_traversal() {
        let mut factories = FactoryRegistry::new();
        factories.register("Temp", true, |_, _, _| Ok(Value::Str("made".into())));
        let g = from_value(
            &json!({"@type": "Temp", "child": {"@id": 5, "x": 1}}),
            None,
            ReadOptions::new().with_factories(factories),
        )
        .unwrap();
        assert_eq!(g.root(), &Value::Str("made".into()));
        // the child node was never visited, so no target was built for it
        assert!(g.target(g.node_for_id(5).unwrap()).is_none());
    }

    #[test]
    fn non_final_factory_keeps_its_fields() {
        let mut reg = TypeRegistry::new();
        reg.register_record("Pair", [("a", TypeRef::Int), ("b", TypeRef::Int)]);
        let mut factories = FactoryRegistry::new();
        factories.register("Pair", false, |_, _, _| {
            Ok(Value::Object(ObjectValue {
                class: Some("Pair".into()),
                fields: IndexMap::from([("a".to_string(), Value::Int(1))]),
            }))
        });
        let g = from_value(
            &json!({"@type": "Pair", "a": 99, "b": 2}),
            None,
            typed(reg).with_factories(factories),
        )
        .unwrap();
        assert_eq!(g.root().field("a"), Some(&Value::Int(1)));
        assert_eq!(g.root().field("b"), Some(&Value::Int(2)));
    }

    #[test]
    fn shared_nodes_are_instantiated_once() {
        let calls = Arc::new(Mutex::new(0usize));
        let calls_in = calls.clone();
        let mut factories = FactoryRegistry::new();
        factories.register("Counted", false, move |_, _, _| {
            *calls_in.lock().unwrap() += 1;
            Ok(Value::Object(ObjectValue {
                class: None,
                fields: IndexMap::new(),
            }))
        });
        let g = from_value(
            &json!({"a": {"@id": 1, "@type": "Counted"}, "b": {"@ref": 1}}),
            None,
            ReadOptions::new().with_factories(factories),
        )
        .unwrap();
        assert_eq!(*calls.lock().unwrap(), 1);
        let n1 = g.node_for_id(1).unwrap();
        assert_eq!(g.root().field("a"), Some(&Value::Ref(n1)));
        assert_eq!(g.root().field("b"), Some(&Value::Ref(n1)));
    }

    #[test]
    fn gather_remaining_values_feeds_constructors() {
        let mut factories = FactoryRegistry::new();
        factories.register("Args", true, |_, node, r| {
            let mut out = Vec::new();
            gather_remaining_values(r, node, &StdHashSet::new(), &mut out)?;
            Ok(Value::List(out))
        });
        let g = from_value(
            &json!({"@type": "Args", "x": 1, "y": {"@type": "long", "value": 2}}),
            None,
            ReadOptions::new().with_factories(factories),
        )
        .unwrap();
        assert_eq!(
            g.root().as_list().unwrap(),
            &[Value::Int(1), Value::Int(2)]
        );
    }

    // --------------------------- missing fields ---------------------------- //

    #[test]
    fn missing_field_handler_fires_once_after_resolution() {
        let seen: Arc<Mutex<Vec<(String, Child)>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_in = seen.clone();
        let opts = typed(point_registry()).with_missing_field_handler(move |target, field, value| {
            assert!(target.as_object().is_some());
            seen_in.lock().unwrap().push((field.to_string(), value.clone()));
        });
        let g = from_value(&json!({"@type": "Point", "x": 1, "y": 2, "z": 3}), None, opts).unwrap();

        let calls = seen.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "z");
        assert_eq!(calls[0].1, Child::Scalar(Scalar::Int(3)));
        assert!(g.root().field("z").is_none());
        assert_eq!(g.root().field("x"), Some(&Value::Int(1)));
    }

    #[test]
    fn no_handler_means_missing_fields_are_dropped_silently() {
        let g = from_value(
            &json!({"@type": "Point", "x": 1, "y": 2, "z": 3}),
            None,
            typed(point_registry()),
        )
        .unwrap();
        assert!(g.root().field("z").is_none());
    }

    // ------------------------------ map mode ------------------------------- //

    #[test]
    fn map_mode_coerces_leaves_through_known_types() {
        let opts = ReadOptions::maps().with_registry(point_registry());
        let g = from_value(&json!({"@type": "Point", "x": "3", "y": 4.0}), None, opts).unwrap();
        let root = g.root();
        assert_eq!(root.field("x"), Some(&Value::Int(3)));
        assert_eq!(root.field("y"), Some(&Value::Int(4)));
    }

    #[test]
    fn map_mode_tolerates_unknown_types() {
        let g = from_value(
            &json!({"@type": "Mystery", "x": 1}),
            None,
            ReadOptions::maps(),
        )
        .unwrap();
        assert_eq!(g.root().field("x"), Some(&Value::Int(1)));
    }

    // ----------------------------- round trips ----------------------------- //

    #[test]
    fn acyclic_graph_round_trips_through_json() {
        let src = json!({"a": {"x": 1, "y": [1, 2, 3]}, "b": "s", "c": true});
        let g = from_value(&src, None, ReadOptions::maps()).unwrap();
        assert_eq!(g.to_json(), src);

        let again = from_value(&g.to_json(), None, ReadOptions::maps()).unwrap();
        assert_eq!(again.to_json(), src);
    }

    #[test]
    fn cyclic_graph_round_trips_with_reference_markers() {
        let g = from_value(
            &json!([
                {"@id": 1, "peer": {"@ref": 2}},
                {"@id": 2, "peer": {"@ref": 1}}
            ]),
            None,
            ReadOptions::new(),
        )
        .unwrap();
        let g2 = from_value(&g.to_json(), None, ReadOptions::new()).unwrap();

        let Value::List(xs) = g2.root() else {
            panic!("expected list root");
        };
        let a = xs[0].as_ref_id().unwrap();
        let b = match g2.target(a).unwrap().field("peer") {
            Some(Value::Ref(b)) => *b,
            other => panic!("expected ref field, got {other:?}"),
        };
        assert_eq!(g2.target(b).unwrap().field("peer"), Some(&Value::Ref(a)));
        assert_eq!(g2.deref(&xs[1]), g2.target(b).unwrap());
    }
}
