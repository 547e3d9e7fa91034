//! Error types for kwatch-sync.

use thiserror::Error;

use kwatch_core::{CoreError, VersionToken};

/// Failures reported by a [`RemoteSource`](crate::source::RemoteSource).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The resume token is too old for the remote to replay from.
    #[error("resume token {token} has expired")]
    Expired { token: VersionToken },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The collection does not exist on the remote.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("remote returned status {code}: {message}")]
    Status { code: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("undecodable payload: {0}")]
    Decode(String),

    /// A list carried a resume token that cannot be watched from.
    #[error("malformed resume token {0:?}")]
    MalformedToken(String),
}

impl SourceError {
    /// Configuration-class failures: retrying cannot fix them.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SourceError::Unauthorized(_)
                | SourceError::Forbidden(_)
                | SourceError::NotFound(_)
                | SourceError::MalformedToken(_)
        )
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, SourceError::Expired { .. })
    }
}

impl From<CoreError> for SourceError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::MalformedToken { token } => SourceError::MalformedToken(token),
            other => SourceError::Decode(other.to_string()),
        }
    }
}

/// Errors that stop the reflector.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The initial list failed; the collection cannot be mirrored.
    #[error("initial list of {collection} failed: {source}")]
    Startup {
        collection: String,
        #[source]
        source: SourceError,
    },

    /// The delta queue was closed underneath the reflector.
    #[error("delta queue closed while events were pending")]
    QueueClosed,
}
