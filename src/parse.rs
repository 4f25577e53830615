//! Front end: convert a `serde_json` tree into a node arena.
//!
//! The parser owns reference-table population: every node carrying an `@id`
//! is registered here, before resolution starts. Structural invariants are
//! also enforced here so the resolver can assume well-formed nodes.

use serde_json::Value as Json;

use crate::error::{Error, Result};
use crate::node::{Child, Node, NodeArena, Scalar};
use crate::refs::ReferenceTable;
use crate::types::TypeRef;

/// Reserved member names of the wire contract.
const AT_ID: &str = "@id";
const AT_REF: &str = "@ref";
const AT_TYPE: &str = "@type";
const AT_KEYS: &str = "@keys";
const AT_ITEMS: &str = "@items";

/// One parsed document: the arena, the populated reference table, and the
/// root slot (scalar roots never allocate a node).
#[derive(Debug)]
pub struct Document {
    pub arena: NodeArena,
    pub refs: ReferenceTable,
    pub root: Child,
}

pub fn parse_str(src: &str) -> Result<Document> {
    let json: Json =
        serde_json::from_str(src).map_err(|e| Error::Parse(e.to_string()))?;
    parse_value(&json)
}

pub fn parse_value(json: &Json) -> Result<Document> {
    let mut arena = NodeArena::new();
    let mut refs = ReferenceTable::new();
    let root = walk(json, &mut arena, &mut refs)?;
    Ok(Document { arena, refs, root })
}

fn walk(json: &Json, arena: &mut NodeArena, refs: &mut ReferenceTable) -> Result<Child> {
    match json {
        Json::Null => Ok(Child::Scalar(Scalar::Null)),
        Json::Bool(b) => Ok(Child::Scalar(Scalar::Bool(*b))),
        Json::Number(n) => Ok(Child::Scalar(scalar_number(n))),
        Json::String(s) => Ok(Child::Scalar(Scalar::Str(s.clone()))),
        Json::Array(xs) => {
            let items = xs
                .iter()
                .map(|x| walk(x, arena, refs))
                .collect::<Result<Vec<_>>>()?;
            let node = Node {
                items: Some(items),
                ..Node::default()
            };
            Ok(Child::Node(arena.alloc(node)))
        }
        Json::Object(map) => walk_object(map, arena, refs),
    }
}

fn scalar_number(n: &serde_json::Number) -> Scalar {
    if let Some(i) = n.as_i64() {
        Scalar::Int(i)
    } else {
        // u64 overflow and true floats both land here
        Scalar::Float(n.as_f64().unwrap_or(f64::NAN).into())
    }
}

fn walk_object(
    map: &serde_json::Map<String, Json>,
    arena: &mut NodeArena,
    refs: &mut ReferenceTable,
) -> Result<Child> {
    let mut node = Node::default();

    if let Some(id) = map.get(AT_ID) {
        node.id = Some(marker_id(AT_ID, id)?);
    }
    if let Some(r) = map.get(AT_REF) {
        node.ref_id = Some(marker_id(AT_REF, r)?);
        // an alias carries nothing besides its own identity
        if map.keys().any(|k| k != AT_REF && k != AT_ID) {
            return Err(Error::corrupt(format!(
                "@ref node carries other members: {}",
                member_names(map)
            )));
        }
    }
    if let Some(t) = map.get(AT_TYPE) {
        let name = t.as_str().ok_or_else(|| {
            Error::corrupt(format!("@type must be a string, got {t}"))
        })?;
        node.declared = Some(TypeRef::parse(name)?);
    }

    if node.ref_id.is_none() {
        let keys = match map.get(AT_KEYS) {
            Some(Json::Array(ks)) => Some(
                ks.iter()
                    .map(|k| walk(k, arena, refs))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Some(other) => {
                return Err(Error::corrupt(format!("@keys must be an array, got {other}")))
            }
            None => None,
        };
        let items = match map.get(AT_ITEMS) {
            Some(Json::Array(xs)) => Some(
                xs.iter()
                    .map(|x| walk(x, arena, refs))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Some(other) => {
                return Err(Error::corrupt(format!("@items must be an array, got {other}")))
            }
            None => None,
        };
        if let Some(ks) = &keys {
            let ilen = items.as_ref().map(Vec::len);
            if ilen != Some(ks.len()) {
                return Err(Error::corrupt(format!(
                    "@keys has {} entries but @items has {}",
                    ks.len(),
                    ilen.map_or("none".to_string(), |n| n.to_string())
                )));
            }
        }
        node.keys = keys;
        node.items = items;

        for (k, v) in map {
            if matches!(k.as_str(), AT_ID | AT_REF | AT_TYPE | AT_KEYS | AT_ITEMS) {
                continue;
            }
            node.fields.insert(k.clone(), walk(v, arena, refs)?);
        }

        // typed scalar wrapper: {"@type":"long","value":7}
        if node.declared.is_some() && node.fields.len() == 1 {
            if let Some(Child::Scalar(s)) = node.fields.get("value") {
                node.value = Some(s.clone());
                node.fields.clear();
            }
        }
    }

    let id = node.id;
    let node_id = arena.alloc(node);
    if let Some(id) = id {
        refs.insert(id, node_id)?;
    }
    Ok(Child::Node(node_id))
}

fn marker_id(marker: &str, v: &Json) -> Result<u64> {
    v.as_u64().ok_or_else(|| {
        Error::corrupt(format!(
            "{marker} must be a non-negative integer, got {v}"
        ))
    })
}

fn member_names(map: &serde_json::Map<String, Json>) -> String {
    map.keys().cloned().collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeId;
    use serde_json::json;

    fn root_node(doc: &Document) -> NodeId {
        match doc.root {
            Child::Node(id) => id,
            ref other => panic!("expected node root, got {other:?}"),
        }
    }

    #[test]
    fn scalars_stay_leaves() {
        let doc = parse_value(&json!(42)).unwrap();
        assert_eq!(doc.root, Child::Scalar(Scalar::Int(42)));
        assert!(doc.arena.is_empty());
    }

    #[test]
    fn ids_register_and_refs_stay_empty() {
        let doc = parse_value(&json!([
            {"@id": 1, "name": "a"},
            {"@ref": 1}
        ]))
        .unwrap();
        assert_eq!(doc.refs.len(), 1);
        let root = doc.arena.node(root_node(&doc));
        let items = root.items.as_ref().unwrap();
        assert_eq!(items.len(), 2);
        let alias = items[1].as_node().unwrap();
        assert!(doc.arena.node(alias).is_reference());
    }

    #[test]
    fn duplicate_id_is_corrupt() {
        let err = parse_value(&json!([{"@id": 5}, {"@id": 5}])).unwrap_err();
        assert!(matches!(err, Error::CorruptNode(_)), "{err}");
    }

    #[test]
    fn ref_with_payload_is_corrupt() {
        let err = parse_value(&json!({"@ref": 2, "x": 1})).unwrap_err();
        assert!(matches!(err, Error::CorruptNode(_)), "{err}");
    }

    #[test]
    fn keys_without_items_is_corrupt() {
        let err = parse_value(&json!({"@keys": ["a"]})).unwrap_err();
        assert!(matches!(err, Error::CorruptNode(_)), "{err}");
        let err = parse_value(&json!({"@keys": ["a"], "@items": ["x", "y"]})).unwrap_err();
        assert!(matches!(err, Error::CorruptNode(_)), "{err}");
    }

    #[test]
    fn typed_scalar_wrapper_fills_value_slot() {
        let doc = parse_value(&json!({"@type": "long", "value": 7})).unwrap();
        let node = doc.arena.node(root_node(&doc));
        assert_eq!(node.value, Some(Scalar::Int(7)));
        assert!(node.fields.is_empty());
        assert_eq!(node.declared, Some(TypeRef::Int));
    }

    #[test]
    fn value_key_stays_a_field_without_type() {
        let doc = parse_value(&json!({"value": 7})).unwrap();
        let node = doc.arena.node(root_node(&doc));
        assert!(node.value.is_none());
        assert!(node.fields.contains_key("value"));
    }

    #[test]
    fn big_u64_widens_to_float() {
        let doc = parse_value(&json!(u64::MAX)).unwrap();
        match doc.root {
            Child::Scalar(Scalar::Float(_)) => {}
            ref other => panic!("expected float, got {other:?}"),
        }
    }
}
