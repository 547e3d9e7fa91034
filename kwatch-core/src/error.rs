//! Error types for kwatch-core.

use thiserror::Error;

/// All errors that can arise while building model values.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The requested resource kind is not on the allow-list.
    #[error("resource '{kind}' is not supported; expected one of: {supported}")]
    UnsupportedKind { kind: String, supported: String },

    /// A remote object lacked a field the model needs to key it.
    #[error("object is missing required field `{field}`")]
    MissingField { field: &'static str },

    /// The object payload was not a JSON mapping.
    #[error("object must be a mapping, got {found}")]
    NotAnObject { found: &'static str },

    /// Resume tokens must be non-empty and free of whitespace.
    #[error("malformed resume token {token:?}")]
    MalformedToken { token: String },
}
