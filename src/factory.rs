//! User-registered instantiators.
//!
//! A factory owns the creation of instances for one type name. When its
//! `object_final` flag is set, the value it returns is complete and the node
//! is never traversed; otherwise the resolver continues field walking around
//! whatever the factory already filled in.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::convert::Converter;
use crate::error::Result;
use crate::node::{Child, NodeArena, NodeId};
use crate::types::TypeRef;
use crate::value::Value;

/// The slice of the resolver a factory is allowed to drive: inspect nodes and
/// resolve subtrees on the shared work stack. Nested resolution drains the
/// same stack; the outer loop simply finds less work left.
pub trait SubtreeResolver {
    fn arena(&self) -> &NodeArena;
    fn converter(&self) -> &Converter;

    /// Resolve one child node to its value, instantiating and draining as
    /// needed. Object-shaped children come back as `Value::Ref`.
    fn resolve_subtree(&mut self, node: NodeId) -> Result<Value>;
}

pub type FactoryFn =
    Arc<dyn Fn(&TypeRef, NodeId, &mut dyn SubtreeResolver) -> Result<Value> + Send + Sync>;

#[derive(Clone)]
pub struct Factory {
    pub create: FactoryFn,
    /// True when the factory fully populates the instance and no field
    /// walking must follow.
    pub object_final: bool,
}

impl std::fmt::Debug for Factory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Factory")
            .field("object_final", &self.object_final)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FactoryRegistry {
    factories: IndexMap<String, Factory>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<N, F>(&mut self, type_name: N, object_final: bool, create: F) -> &mut Self
    where
        N: Into<String>,
        F: Fn(&TypeRef, NodeId, &mut dyn SubtreeResolver) -> Result<Value> + Send + Sync + 'static,
    {
        self.factories.insert(
            type_name.into(),
            Factory {
                create: Arc::new(create),
                object_final,
            },
        );
        self
    }

    /// Factory for a resolved type: exact rendered name first, then the head
    /// name so `Map<string,int>` can match a factory registered for `Map`.
    pub fn get(&self, ty: &TypeRef) -> Option<&Factory> {
        self.factories
            .get(&ty.to_string())
            .or_else(|| self.factories.get(&ty.head_name()))
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

/// Resolve every field of `node` that is neither excluded nor null and append
/// the results to `out`, in field order. Feeds factories that construct
/// through non-default constructors.
pub fn gather_remaining_values(
    resolver: &mut dyn SubtreeResolver,
    node: NodeId,
    excluded: &HashSet<&str>,
    out: &mut Vec<Value>,
) -> Result<()> {
    let children: Vec<(String, Child)> = resolver
        .arena()
        .node(node)
        .fields
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    for (name, child) in children {
        if excluded.contains(name.as_str()) || child.is_null() {
            continue;
        }
        match child {
            Child::Scalar(s) => out.push(Value::from_scalar(&s)),
            Child::Node(id) => out.push(resolver.resolve_subtree(id)?),
        }
    }
    Ok(())
}
