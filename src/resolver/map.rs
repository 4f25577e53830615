//! Map-of-maps strategy: every record stays a generic insertion-ordered map,
//! but scalar leaves whose key names a declared field on a known `@type` are
//! still coerced to the field's kind. This is how typed numerics survive a
//! round trip through the untyped representation.

use super::{Resolver, Slot, Strategy};
use crate::convert::SimpleKind;
use crate::error::{Error, Result};
use crate::node::{Child, NodeId};
use crate::types::TypeRef;
use crate::value::{ObjectValue, Value};

pub(crate) struct MapStrategy;

impl Strategy for MapStrategy {
    fn create_record(_r: &mut Resolver<Self>, _node: NodeId, ty: &TypeRef) -> Result<Value> {
        // the @type tag is kept for leaf coercion and round-tripping, but the
        // target is a map either way; unknown names are not an error here
        let class = match ty {
            TypeRef::Named(n) => Some(n.clone()),
            _ => None,
        };
        Ok(Value::Object(ObjectValue {
            class,
            fields: Default::default(),
        }))
    }

    fn traverse_fields(r: &mut Resolver<Self>, node: NodeId) -> Result<()> {
        let entries: Vec<(String, Child)> = r
            .arena
            .node(node)
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let declared_fields = match r.arena.node(node).declared.clone() {
            Some(TypeRef::Named(n)) => r.options.registry.record(&n).map(|d| d.fields.clone()),
            _ => None,
        };

        for (name, child) in entries {
            if r.has_field(node, &name) {
                continue;
            }
            let field_ty = declared_fields
                .as_ref()
                .and_then(|fields| fields.get(&name))
                .cloned();
            match child {
                Child::Scalar(s) => {
                    let v = match &field_ty {
                        Some(ft) if SimpleKind::of(ft).is_some() && !s.is_null() => r
                            .coerce_scalar(&s, ft, SimpleKind::of(ft))
                            .map_err(|reason| Error::FieldAccess {
                                ty: ft.to_string(),
                                field: name.clone(),
                                reason,
                            })?,
                        _ => Value::from_scalar(&s),
                    };
                    r.insert_field(node, name, v)?;
                }
                Child::Node(c) => {
                    let hint = field_ty.unwrap_or(TypeRef::Any);
                    if let Some(v) = r.child_node_value(node, c, &hint, Slot::Field(name.clone()))?
                    {
                        r.insert_field(node, name, v)?;
                    }
                }
            }
        }
        Ok(())
    }
}
