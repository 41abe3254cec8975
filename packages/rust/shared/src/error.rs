//! Error types for taxwatch.
//!
//! Library crates use [`TaxwatchError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for all taxwatch operations.
#[derive(Debug, thiserror::Error)]
pub enum TaxwatchError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Timeout or connection failure. Retryable.
    #[error("network error: {0}")]
    Network(String),

    /// HTTP 429 from the source site. Retryable once the server delay has elapsed.
    #[error("rate limited by {url}")]
    RateLimited {
        url: String,
        retry_after: Option<Duration>,
    },

    /// Any other non-2xx response.
    #[error("HTTP {status} for {url}")]
    Http { status: u16, url: String },

    /// Structural HTML mismatch (row or page skipped).
    #[error("parse error: {message}")]
    Parse { message: String },

    /// The store lock marker is held by someone else.
    #[error("repository is locked (marker present at {path:?})")]
    RepositoryLocked { path: PathBuf },

    /// I/O or serialization failure inside the record store.
    #[error("repository error: {0}")]
    Repository(String),

    /// The AI collaborator cannot be reached.
    #[error("enrichment unavailable: {0}")]
    EnrichmentUnavailable(String),

    /// The notification sink rejected the batch.
    #[error("notification error: {0}")]
    Notification(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (missing title, malformed link, blank query, ...).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, TaxwatchError>;

impl TaxwatchError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a repository error from any displayable message.
    pub fn repository(msg: impl Into<String>) -> Self {
        Self::Repository(msg.into())
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the fetch layer should try the request again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RateLimited { .. })
    }
}
