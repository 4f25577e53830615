//! Read-side configuration.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::factory::FactoryRegistry;
use crate::node::Child;
use crate::types::TypeRegistry;
use crate::value::Value;

/// Which record strategy drives the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Build typed values from registered descriptors (ObjectStrategy).
    #[default]
    Typed,
    /// Keep every record as a generic insertion-ordered map (MapStrategy).
    Maps,
}

/// Invoked once per missing field, after all references are patched:
/// `(target, field_name, raw_value)`.
pub type MissingFieldHandler = Arc<dyn Fn(&Value, &str, &Child) + Send + Sync>;

#[derive(Clone, Default)]
pub struct ReadOptions {
    pub mode: Mode,
    pub registry: TypeRegistry,
    pub factories: FactoryRegistry,
    /// Declared type name -> substitute, applied during type resolution.
    pub coercions: IndexMap<String, String>,
    /// Substitute class for records whose type cannot be inferred. When unset
    /// in Maps mode (and for untyped records generally), the node stays a
    /// generic map.
    pub unknown_type: Option<String>,
    pub missing_field_handler: Option<MissingFieldHandler>,
    /// Ask the caller's I/O layer to close its source on error. The resolver
    /// itself only carries the signal.
    pub close_stream: bool,
}

impl std::fmt::Debug for ReadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadOptions")
            .field("mode", &self.mode)
            .field("coercions", &self.coercions)
            .field("unknown_type", &self.unknown_type)
            .field(
                "missing_field_handler",
                &self.missing_field_handler.as_ref().map(|_| ".."),
            )
            .field("close_stream", &self.close_stream)
            .finish_non_exhaustive()
    }
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map-of-maps output, the untyped mode.
    pub fn maps() -> Self {
        ReadOptions {
            mode: Mode::Maps,
            ..Self::default()
        }
    }

    pub fn with_registry(mut self, registry: TypeRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_factories(mut self, factories: FactoryRegistry) -> Self {
        self.factories = factories;
        self
    }

    pub fn with_coercion(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.coercions.insert(from.into(), to.into());
        self
    }

    pub fn with_unknown_type(mut self, type_name: impl Into<String>) -> Self {
        self.unknown_type = Some(type_name.into());
        self
    }

    pub fn with_missing_field_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Value, &str, &Child) + Send + Sync + 'static,
    {
        self.missing_field_handler = Some(Arc::new(handler));
        self
    }

    pub fn with_close_stream(mut self, close: bool) -> Self {
        self.close_stream = close;
        self
    }
}
