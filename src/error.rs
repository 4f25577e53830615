//! Resolution fault taxonomy.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can abort a resolve call. Missing *fields* are not errors;
/// they are collected and reported through the missing-field handler.
#[derive(Debug, Error)]
pub enum Error {
    #[error("forward reference @ref: {0}, but no object defined (@id) with that value")]
    UnknownReference(u64),

    #[error("unable to instantiate type `{ty}`: {reason}")]
    Instantiation { ty: String, reason: String },

    #[error("cannot set field `{field}` on `{ty}`: {reason}")]
    FieldAccess {
        ty: String,
        field: String,
        reason: String,
    },

    #[error("array element {index} incompatible with component type `{component}`: {found}")]
    ArrayElementMismatch {
        component: String,
        index: usize,
        found: String,
    },

    #[error("return type mismatch, expected: {expected}, actual: {found}")]
    RootTypeMismatch { expected: String, found: String },

    #[error("corrupt node: {0}")]
    CorruptNode(String),

    #[error("parse error: {0}")]
    Parse(String),
}

impl Error {
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Error::CorruptNode(msg.into())
    }
}
