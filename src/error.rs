use std::fmt;

use thiserror::Error;

/// Failure classes reported by embedding providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedderErrorKind {
    Network,
    Protocol,
    Auth,
    Dimensions,
}

impl fmt::Display for EmbedderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EmbedderErrorKind::Network => "network",
            EmbedderErrorKind::Protocol => "protocol",
            EmbedderErrorKind::Auth => "auth",
            EmbedderErrorKind::Dimensions => "dimensions",
        };
        f.write_str(label)
    }
}

/// Errors surfaced by the indexing and retrieval core.
///
/// Library modules return this type directly; the binary converts to
/// `anyhow::Error` at the CLI boundary.
#[derive(Debug, Error)]
pub enum GrepaiError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("embedder {kind} error: {message}")]
    Embedder {
        kind: EmbedderErrorKind,
        message: String,
    },

    #[error("store error: {0}")]
    Store(String),

    #[error("invalid path: {0}")]
    FailedPath(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl GrepaiError {
    pub fn config(message: impl Into<String>) -> Self {
        GrepaiError::Config(message.into())
    }

    pub fn embedder(kind: EmbedderErrorKind, message: impl Into<String>) -> Self {
        GrepaiError::Embedder {
            kind,
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        GrepaiError::Store(message.into())
    }

    /// True for failures worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GrepaiError::Embedder {
                kind: EmbedderErrorKind::Network,
                ..
            }
        )
    }
}

impl From<serde_yaml::Error> for GrepaiError {
    fn from(err: serde_yaml::Error) -> Self {
        GrepaiError::Config(err.to_string())
    }
}

impl From<rusqlite::Error> for GrepaiError {
    fn from(err: rusqlite::Error) -> Self {
        GrepaiError::Store(err.to_string())
    }
}

impl From<bincode::Error> for GrepaiError {
    fn from(err: bincode::Error) -> Self {
        GrepaiError::Store(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GrepaiError>;
