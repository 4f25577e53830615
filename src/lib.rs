//! Reconstruct typed, possibly cyclic object graphs from JSON documents that
//! use explicit identity markers.
//!
//! Documents mark shared objects with `@id` and point back at them with
//! `@ref`; `@type` optionally names a registered type, and `@keys`/`@items`
//! carry container shapes. Resolution walks the parse tree once with a work
//! stack, defers forward references, patches them in place once the whole
//! graph is known, and rebuilds hash-based containers after identities are
//! final.
//!
//! Design goals:
//! - Cycles without owning pointers: targets live in arena cells, sharing is
//!   a handle (`Value::Ref`), patching is an in-place cell write.
//! - Two output flavors behind one traversal: typed values driven by
//!   registered descriptors, or generic map-of-maps with leaf coercion.
//! - Forward references are ordinary data, not errors, until the patch pass
//!   proves one dangling.

pub mod cli;
pub mod convert;
pub mod error;
pub mod factory;
pub mod graph;
pub mod node;
pub mod options;
pub mod parse;
pub mod refs;
pub mod resolver;
pub mod types;
pub mod value;

pub use error::{Error, Result};
pub use graph::Graph;
pub use options::{Mode, ReadOptions};
pub use resolver::resolve;
pub use types::{TypeRef, TypeRegistry};
pub use value::Value;

/// Parse and resolve a JSON document in one step.
pub fn from_str(src: &str, root_type: Option<TypeRef>, options: ReadOptions) -> Result<Graph> {
    let doc = parse::parse_str(src)?;
    resolver::resolve(doc, root_type, options)
}

/// Resolve an already-parsed `serde_json` tree.
pub fn from_value(
    json: &serde_json::Value,
    root_type: Option<TypeRef>,
    options: ReadOptions,
) -> Result<Graph> {
    let doc = parse::parse_value(json)?;
    resolver::resolve(doc, root_type, options)
}
