//! Resolver output.
//!
//! A [`Graph`] owns every target cell the resolve call produced, addressed by
//! the same handles the values' `Ref`s carry. The auxiliary resolver state is
//! gone by the time a `Graph` exists; what survives is the data and the
//! `@id` lookup that makes shared nodes addressable from the outside.

use std::collections::{HashMap, HashSet};

use serde_json::{json, Value as Json};

use crate::node::NodeId;
use crate::value::{MapValue, ObjectValue, Value};

#[derive(Debug)]
pub struct Graph {
    targets: Vec<Option<Value>>,
    ids: HashMap<u64, NodeId>,
    root: Value,
}

impl Graph {
    pub(crate) fn new(targets: Vec<Option<Value>>, ids: HashMap<u64, NodeId>, root: Value) -> Self {
        Graph { targets, ids, root }
    }

    /// The root value with `Ref` indirection removed.
    pub fn root(&self) -> &Value {
        self.deref(&self.root)
    }

    /// The root exactly as resolved; may be a `Ref`.
    pub fn raw_root(&self) -> &Value {
        &self.root
    }

    pub fn target(&self, node: NodeId) -> Option<&Value> {
        self.targets.get(node.as_usize()).and_then(|t| t.as_ref())
    }

    /// Defining node of a document `@id`, when one existed.
    pub fn node_for_id(&self, id: u64) -> Option<NodeId> {
        self.ids.get(&id).copied()
    }

    /// Follow `Ref` handles to the value they name. Non-refs come back
    /// unchanged; a dangling handle comes back as the `Ref` itself.
    pub fn deref<'a>(&'a self, value: &'a Value) -> &'a Value {
        let mut v = value;
        for _ in 0..self.targets.len().max(1) {
            match v {
                Value::Ref(id) => match self.target(*id) {
                    Some(next) => v = next,
                    None => return v,
                },
                other => return other,
            }
        }
        v
    }

    /// Map lookup that accepts either the stored key or anything that derefs
    /// to it.
    pub fn map_get<'a>(&'a self, map: &'a MapValue, key: &Value) -> Option<&'a Value> {
        map.entries.get(key).or_else(|| {
            map.entries
                .iter()
                .find(|(k, _)| self.deref(k) == self.deref(key))
                .map(|(_, v)| v)
        })
    }

    /// Render the graph back to JSON. Nodes referenced more than once (or
    /// cyclically) are emitted once with an `@id` and thereafter as
    /// `{"@ref": n}`; maps with non-string keys use the `@keys`/`@items`
    /// form.
    pub fn to_json(&self) -> Json {
        let mut shared = SharedNodes::default();
        shared.scan(self, &self.root);

        let mut wire_ids: HashMap<NodeId, u64> = HashMap::new();
        let mut next_id = self.ids.keys().max().map_or(1, |m| m + 1);
        for node in shared.multiple.iter() {
            let existing = self.ids.iter().find(|(_, n)| **n == *node).map(|(id, _)| *id);
            let id = existing.unwrap_or_else(|| {
                let id = next_id;
                next_id += 1;
                id
            });
            wire_ids.insert(*node, id);
        }

        let mut emitter = Emitter {
            graph: self,
            wire_ids,
            emitted: HashSet::new(),
        };
        emitter.render(&self.root)
    }
}

/// First pass of the export: find nodes reached through more than one `Ref`.
#[derive(Default)]
struct SharedNodes {
    seen: HashSet<NodeId>,
    multiple: HashSet<NodeId>,
}

impl SharedNodes {
    fn scan(&mut self, graph: &Graph, value: &Value) {
        match value {
            Value::Ref(id) => {
                if !self.seen.insert(*id) {
                    self.multiple.insert(*id);
                    return;
                }
                if let Some(target) = graph.target(*id) {
                    self.scan(graph, target);
                }
            }
            Value::Array(a) => a.items.iter().for_each(|v| self.scan(graph, v)),
            Value::List(xs) => xs.iter().for_each(|v| self.scan(graph, v)),
            Value::Set(s) => s.elements.iter().for_each(|v| self.scan(graph, v)),
            Value::Map(m) => {
                for (k, v) in &m.entries {
                    self.scan(graph, k);
                    self.scan(graph, v);
                }
            }
            Value::Object(o) => o.fields.values().for_each(|v| self.scan(graph, v)),
            _ => {}
        }
    }
}

struct Emitter<'a> {
    graph: &'a Graph,
    wire_ids: HashMap<NodeId, u64>,
    emitted: HashSet<NodeId>,
}

impl<'a> Emitter<'a> {
    fn render(&mut self, value: &Value) -> Json {
        match value {
            Value::Null => Json::Null,
            Value::Bool(b) => json!(b),
            Value::Int(i) => json!(i),
            Value::Float(f) => serde_json::Number::from_f64(f.0).map_or(Json::Null, Json::Number),
            Value::Str(s) => json!(s),
            Value::Enum(e) => json!({"@type": e.class, "name": e.variant}),
            Value::Array(a) => Json::Array(a.items.iter().map(|v| self.render(v)).collect()),
            Value::List(xs) => Json::Array(xs.iter().map(|v| self.render(v)).collect()),
            Value::Set(s) => Json::Array(s.elements.iter().map(|v| self.render(v)).collect()),
            Value::Map(m) => self.render_map(m, None),
            Value::Object(o) => self.render_object(o, None),
            Value::Ref(id) => self.render_ref(*id),
        }
    }

    fn render_ref(&mut self, id: NodeId) -> Json {
        let Some(wire) = self.wire_ids.get(&id).copied() else {
            // reached exactly once: inline the target
            return match self.graph.target(id) {
                Some(t) => {
                    let t = t.clone();
                    self.render(&t)
                }
                None => Json::Null,
            };
        };
        if !self.emitted.insert(id) {
            return json!({"@ref": wire});
        }
        match self.graph.target(id).cloned() {
            Some(Value::Object(o)) => self.render_object(&o, Some(wire)),
            Some(Value::Map(m)) => self.render_map(&m, Some(wire)),
            Some(Value::Array(a)) => {
                let items: Vec<Json> = a.items.iter().map(|v| self.render(v)).collect();
                json!({"@id": wire, "@items": items})
            }
            Some(Value::List(xs)) => {
                let items: Vec<Json> = xs.iter().map(|v| self.render(v)).collect();
                json!({"@id": wire, "@items": items})
            }
            Some(Value::Set(s)) => {
                let items: Vec<Json> = s.elements.iter().map(|v| self.render(v)).collect();
                json!({"@id": wire, "@items": items})
            }
            Some(other) => {
                let rendered = self.render(&other);
                json!({"@id": wire, "value": rendered})
            }
            None => Json::Null,
        }
    }

    fn render_object(&mut self, o: &ObjectValue, wire: Option<u64>) -> Json {
        let mut map = serde_json::Map::new();
        if let Some(id) = wire {
            map.insert("@id".into(), json!(id));
        }
        if let Some(class) = &o.class {
            map.insert("@type".into(), json!(class));
        }
        for (k, v) in &o.fields {
            map.insert(k.clone(), self.render(v));
        }
        Json::Object(map)
    }

    fn render_map(&mut self, m: &MapValue, wire: Option<u64>) -> Json {
        let all_string_keys = m.entries.keys().all(|k| matches!(k, Value::Str(_)));
        let mut map = serde_json::Map::new();
        if let Some(id) = wire {
            map.insert("@id".into(), json!(id));
        }
        if all_string_keys {
            for (k, v) in &m.entries {
                let Value::Str(name) = k else { unreachable!() };
                map.insert(name.clone(), self.render(v));
            }
        } else {
            let keys: Vec<Json> = m.entries.keys().map(|k| self.render(k)).collect();
            let items: Vec<Json> = m.entries.values().map(|v| self.render(v)).collect();
            map.insert("@keys".into(), Json::Array(keys));
            map.insert("@items".into(), Json::Array(items));
        }
        Json::Object(map)
    }
}
