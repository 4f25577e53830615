//! Identity table: `@id` to defining node.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::node::{NodeArena, NodeId};

/// Write-once map from document id to the node that defined it. Lookups chase
/// chains of pure `@ref` aliases until a defining node is reached.
#[derive(Debug, Default)]
pub struct ReferenceTable {
    by_id: HashMap<u64, NodeId>,
}

impl ReferenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: u64, node: NodeId) -> Result<()> {
        if self.by_id.insert(id, node).is_some() {
            return Err(Error::corrupt(format!("duplicate @id: {id}")));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Defining node for `id`, following alias hops. `None` when the id is
    /// absent or the chain never terminates in a definition.
    pub fn resolve(&self, arena: &NodeArena, id: u64) -> Option<NodeId> {
        let mut id = id;
        // bounded by table size; a longer walk means the chain loops
        for _ in 0..=self.by_id.len() {
            let node_id = *self.by_id.get(&id)?;
            let node = arena.node(node_id);
            match node.ref_id {
                Some(next) => id = next,
                None => return Some(node_id),
            }
        }
        None
    }

    pub fn resolve_or_err(&self, arena: &NodeArena, id: u64) -> Result<NodeId> {
        self.resolve(arena, id).ok_or(Error::UnknownReference(id))
    }

    pub fn clear(&mut self) {
        self.by_id.clear();
    }

    /// Snapshot of the raw id map, taken before cleanup clears the table.
    pub(crate) fn snapshot(&self) -> HashMap<u64, NodeId> {
        self.by_id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut arena = NodeArena::new();
        let a = arena.alloc(Node::default());
        let b = arena.alloc(Node::default());
        let mut refs = ReferenceTable::new();
        refs.insert(1, a).unwrap();
        assert!(matches!(
            refs.insert(1, b),
            Err(Error::CorruptNode(_))
        ));
    }

    #[test]
    fn alias_chains_reach_the_definition() {
        let mut arena = NodeArena::new();
        let def = arena.alloc(Node {
            id: Some(1),
            ..Node::default()
        });
        let alias = arena.alloc(Node {
            id: Some(2),
            ref_id: Some(1),
            ..Node::default()
        });
        let mut refs = ReferenceTable::new();
        refs.insert(1, def).unwrap();
        refs.insert(2, alias).unwrap();

        assert_eq!(refs.resolve(&arena, 2), Some(def));
        assert_eq!(refs.resolve(&arena, 1), Some(def));
    }

    #[test]
    fn broken_and_cyclic_chains_resolve_to_none() {
        let mut arena = NodeArena::new();
        let dangling = arena.alloc(Node {
            id: Some(1),
            ref_id: Some(99),
            ..Node::default()
        });
        let a = arena.alloc(Node {
            id: Some(2),
            ref_id: Some(3),
            ..Node::default()
        });
        let b = arena.alloc(Node {
            id: Some(3),
            ref_id: Some(2),
            ..Node::default()
        });
        let mut refs = ReferenceTable::new();
        refs.insert(1, dangling).unwrap();
        refs.insert(2, a).unwrap();
        refs.insert(3, b).unwrap();

        assert_eq!(refs.resolve(&arena, 1), None);
        assert_eq!(refs.resolve(&arena, 2), None);
        assert!(matches!(
            refs.resolve_or_err(&arena, 42),
            Err(Error::UnknownReference(42))
        ));
    }
}
