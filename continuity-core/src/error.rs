//! Error types for the continuity engine.
//!
//! Each concern gets its own enum. None of these escape the engine's
//! fallback boundaries (ledger load/save, foreshadowing upsert, the
//! verification pipeline); they exist so the inner layers can use `?` and so
//! callers that want strict behavior can opt into it.

use std::path::PathBuf;
use thiserror::Error;

/// Ledger load or save failure.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Ledger has no backing file")]
    Detached,

    #[error("Ledger at {path} could not be read; refusing to overwrite it")]
    Unreadable { path: PathBuf },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        StorageError::Json {
            path: path.into(),
            source,
        }
    }
}

/// Malformed foreshadowing ledger text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Section header missing: {0}")]
    MissingSection(&'static str),

    #[error("Short-range section appears before the long-range section")]
    SectionOrder,

    #[error("Section header appears more than once: {0}")]
    DuplicateSection(&'static str),

    #[error("Chapter header has an unreadable number: {0}")]
    MalformedHeader(String),

    #[error("Content contains a ledger header line: {0}")]
    EmbeddedHeader(String),

    #[error("Ledger file is not readable text: {0}")]
    Undecodable(String),
}

/// Failure of an external generation, embedding or search service.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("API key not configured ({0})")]
    NoApiKey(&'static str),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Service failure: {0}")]
    Service(String),
}

/// A request the engine refuses instead of coercing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid chapter range: end chapter {end} is before start chapter {start}")]
    InvalidRange { start: u32, end: u32 },

    #[error("Chapter numbers start at 1")]
    ZeroChapter,
}

/// Failure of a project file operation that validates its input.
#[derive(Debug, Error)]
pub enum ProjectError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_problem() {
        let err = ValidationError::InvalidRange { start: 5, end: 3 };
        assert!(err.to_string().contains("end chapter 3"));

        let err = StorageError::io(
            "/tmp/ledger.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("/tmp/ledger.json"));

        let err = UpstreamError::Api {
            status: 529,
            message: "overloaded".to_string(),
        };
        assert_eq!(err.to_string(), "API error (status 529): overloaded");
    }
}
