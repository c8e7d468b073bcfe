//! Error types for the index crate.

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// A lock guarding an index table was poisoned.
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    /// The configured database platform name is not recognised.
    #[error("unknown database platform: {0}")]
    UnknownPlatform(String),
}

/// Convenience alias for index results.
pub type IndexResult<T> = Result<T, IndexError>;
