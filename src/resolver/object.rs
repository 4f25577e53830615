//! Typed record strategy: build `Value::Object` instances from registered
//! descriptors, coercing scalar fields to their declared kinds.

use indexmap::IndexMap;

use super::{Resolver, Slot, Strategy};
use crate::convert::SimpleKind;
use crate::error::{Error, Result};
use crate::node::{Child, NodeId};
use crate::types::TypeRef;
use crate::value::{ObjectValue, Value};

pub(crate) struct ObjectStrategy;

impl Strategy for ObjectStrategy {
    fn create_record(r: &mut Resolver<Self>, _node: NodeId, ty: &TypeRef) -> Result<Value> {
        match ty {
            TypeRef::Named(n) => {
                if r.options.registry.record(n).is_some() {
                    Ok(Value::Object(ObjectValue {
                        class: Some(n.clone()),
                        fields: IndexMap::new(),
                    }))
                } else {
                    Err(Error::Instantiation {
                        ty: n.clone(),
                        reason: "no type descriptor registered".into(),
                    })
                }
            }
            TypeRef::Any => match r.options.unknown_type.clone() {
                Some(unknown) => {
                    if r.options.registry.record(&unknown).is_some() {
                        Ok(Value::Object(ObjectValue {
                            class: Some(unknown),
                            fields: IndexMap::new(),
                        }))
                    } else {
                        Err(Error::Instantiation {
                            ty: unknown,
                            reason: "unknown-type substitute is not a registered record".into(),
                        })
                    }
                }
                // untyped record with no policy: keep it as a generic map
                None => Ok(Value::Object(ObjectValue::default())),
            },
            other => Err(Error::Instantiation {
                ty: other.to_string(),
                reason: "cannot default-construct this kind".into(),
            }),
        }
    }

    fn traverse_fields(r: &mut Resolver<Self>, node: NodeId) -> Result<()> {
        let entries: Vec<(String, Child)> = r
            .arena
            .node(node)
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let class = r
            .arena
            .node(node)
            .target
            .as_ref()
            .and_then(Value::as_object)
            .and_then(|o| o.class.clone());
        let descriptor = class
            .as_deref()
            .and_then(|c| r.options.registry.record(c))
            .map(|d| d.fields.clone());

        for (name, child) in entries {
            // a non-final factory may have set this already
            if r.has_field(node, &name) {
                continue;
            }
            let field_ty = match &descriptor {
                Some(fields) => match fields.get(&name) {
                    Some(t) => t.clone(),
                    None => {
                        r.record_missing(node, name, child);
                        continue;
                    }
                },
                None => TypeRef::Any,
            };
            match child {
                Child::Scalar(s) => {
                    let kind = SimpleKind::of(&field_ty);
                    let v = r.coerce_scalar(&s, &field_ty, kind).map_err(|reason| {
                        Error::FieldAccess {
                            ty: class.clone().unwrap_or_else(|| "object".into()),
                            field: name.clone(),
                            reason,
                        }
                    })?;
                    r.insert_field(node, name, v)?;
                }
                Child::Node(c) => {
                    if let Some(v) =
                        r.child_node_value(node, c, &field_ty, Slot::Field(name.clone()))?
                    {
                        r.insert_field(node, name, v)?;
                    }
                }
            }
        }
        Ok(())
    }
}
