//! Error types for the `ragkit` crate.

use std::fmt;

use thiserror::Error;

/// Classification of a failed call to a remote service.
///
/// Only [`RateLimited`](ServiceErrorKind::RateLimited),
/// [`Timeout`](ServiceErrorKind::Timeout) and
/// [`Unavailable`](ServiceErrorKind::Unavailable) are transient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    /// The service rejected the call because of rate limiting (HTTP 429).
    RateLimited,
    /// The call did not complete within its deadline.
    Timeout,
    /// The service could not be reached or answered with a 5xx status.
    Unavailable,
    /// The service rejected the input (HTTP 4xx other than 429).
    InvalidInput,
    /// Any other failure, e.g. an unparseable response.
    Other,
}

impl ServiceErrorKind {
    /// Classify an HTTP status code returned by a remote service.
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => Self::RateLimited,
            408 | 504 => Self::Timeout,
            500..=599 => Self::Unavailable,
            400..=499 => Self::InvalidInput,
            _ => Self::Other,
        }
    }

    /// Whether a call that failed this way may succeed when retried.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::RateLimited | Self::Timeout | Self::Unavailable)
    }
}

impl fmt::Display for ServiceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RateLimited => "rate limited",
            Self::Timeout => "timeout",
            Self::Unavailable => "unavailable",
            Self::InvalidInput => "invalid input",
            Self::Other => "error",
        };
        f.write_str(name)
    }
}

/// Errors that can occur in RAG operations.
///
/// Each variant maps to one failure class the HTTP layer can translate into a
/// status code. Remote failures are never surfaced untyped.
#[derive(Debug, Error)]
pub enum RagError {
    /// The embedding service failed.
    #[error("Embedding service error ({provider}, {kind}): {message}")]
    EmbeddingService {
        /// The embedding provider that produced the error.
        provider: String,
        /// What kind of failure occurred.
        kind: ServiceErrorKind,
        /// A description of the failure.
        message: String,
    },

    /// The vector store could not be reached or timed out.
    #[error("Vector store unavailable ({backend}): {message}")]
    VectorStoreUnavailable {
        /// The vector store backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// An operation targeted a collection it is not allowed to touch.
    #[error("Invalid collection '{collection}': {reason}")]
    InvalidCollection {
        /// The offending collection name.
        collection: String,
        /// Why the collection was rejected.
        reason: String,
    },

    /// Query-time retrieval failed.
    #[error("Retrieval failed: {source}")]
    Retrieval {
        /// The underlying embedding or vector store failure.
        source: Box<RagError>,
    },

    /// The language model failed to generate an answer.
    #[error("Generation service error ({provider}, {kind}): {message}")]
    GenerationService {
        /// The language model provider that produced the error.
        provider: String,
        /// What kind of failure occurred.
        kind: ServiceErrorKind,
        /// A description of the failure.
        message: String,
    },

    /// Invalid or inconsistent configuration, e.g. an embedding dimension
    /// mismatch. Fatal: never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A caller supplied an invalid argument.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A file could not be turned into text.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The operation was cancelled before it completed.
    #[error("Operation cancelled")]
    Cancelled,

    /// An I/O error while reading source files.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RagError {
    /// Build an [`RagError::EmbeddingService`] error.
    pub fn embedding(
        provider: impl Into<String>,
        kind: ServiceErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self::EmbeddingService { provider: provider.into(), kind, message: message.into() }
    }

    /// Build an [`RagError::GenerationService`] error.
    pub fn generation(
        provider: impl Into<String>,
        kind: ServiceErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self::GenerationService { provider: provider.into(), kind, message: message.into() }
    }

    /// Build an [`RagError::VectorStoreUnavailable`] error.
    pub fn store_unavailable(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::VectorStoreUnavailable { backend: backend.into(), message: message.into() }
    }

    /// Build an [`RagError::InvalidCollection`] error.
    pub fn invalid_collection(collection: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidCollection { collection: collection.into(), reason: reason.into() }
    }

    /// Wrap an error as a [`RagError::Retrieval`] failure.
    pub fn retrieval(source: RagError) -> Self {
        match source {
            already @ Self::Retrieval { .. } => already,
            other => Self::Retrieval { source: Box::new(other) },
        }
    }

    /// Whether the failure is transient and the operation may be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::EmbeddingService { kind, .. } | Self::GenerationService { kind, .. } => {
                kind.is_transient()
            }
            Self::VectorStoreUnavailable { .. } => true,
            Self::Retrieval { source } => source.is_transient(),
            _ => false,
        }
    }

    /// Whether the failure invalidates the whole operation rather than the
    /// item being processed, such as a vector dimension mismatch or a
    /// missing collection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::InvalidCollection { .. })
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_classified() {
        assert_eq!(ServiceErrorKind::from_status(429), ServiceErrorKind::RateLimited);
        assert_eq!(ServiceErrorKind::from_status(504), ServiceErrorKind::Timeout);
        assert_eq!(ServiceErrorKind::from_status(503), ServiceErrorKind::Unavailable);
        assert_eq!(ServiceErrorKind::from_status(400), ServiceErrorKind::InvalidInput);
        assert_eq!(ServiceErrorKind::from_status(302), ServiceErrorKind::Other);
    }

    #[test]
    fn transient_errors() {
        assert!(RagError::embedding("mock", ServiceErrorKind::RateLimited, "slow down").is_transient());
        assert!(RagError::store_unavailable("mock", "connection refused").is_transient());
        assert!(
            RagError::retrieval(RagError::store_unavailable("mock", "down")).is_transient()
        );
        assert!(!RagError::Configuration("dimension mismatch".into()).is_transient());
        assert!(
            !RagError::generation("mock", ServiceErrorKind::InvalidInput, "bad prompt")
                .is_transient()
        );
        assert!(!RagError::invalid_collection("other", "not configured").is_transient());
    }

    #[test]
    fn fatal_errors() {
        assert!(RagError::Configuration("dimension mismatch".into()).is_fatal());
        assert!(RagError::invalid_collection("docs", "does not exist").is_fatal());
        assert!(!RagError::store_unavailable("mock", "down").is_fatal());
        assert!(!RagError::embedding("mock", ServiceErrorKind::InvalidInput, "bad text").is_fatal());
    }

    #[test]
    fn retrieval_wrapping_is_not_nested() {
        let inner = RagError::retrieval(RagError::store_unavailable("mock", "down"));
        let wrapped = RagError::retrieval(inner);
        match wrapped {
            RagError::Retrieval { source } => {
                assert!(matches!(*source, RagError::VectorStoreUnavailable { .. }))
            }
            other => panic!("expected Retrieval, got {other:?}"),
        }
    }
}
