//! Error types for pattern storage.

use thiserror::Error;

/// Errors from the pattern file store.
#[derive(Debug, Error)]
pub enum PatternError {
    /// Name failed validation (extension, separators, traversal).
    #[error("invalid pattern name: {0}")]
    InvalidName(String),

    /// Underlying filesystem failure.
    #[error("pattern io error: {0}")]
    Io(#[from] std::io::Error),
}
