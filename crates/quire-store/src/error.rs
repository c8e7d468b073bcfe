use quire_types::{ContentDigest, ResourceId};

/// Errors from object version store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No mapping, store object, or file exists for the requested resource.
    #[error("not found: {0}")]
    NotFound(String),

    /// Declared digest does not match the staged bytes.
    #[error("digest mismatch for {id}: expected {expected}, computed {computed}")]
    DigestMismatch {
        id: ResourceId,
        expected: ContentDigest,
        computed: ContentDigest,
    },

    /// The operation conflicts with existing state (e.g. re-preparing).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A staged resource does not belong to the session's root.
    #[error("resource {id} is outside store object root {root}")]
    OutsideRoot { id: ResourceId, root: ResourceId },

    /// The session is not in a state that allows the operation.
    #[error("session for {object_id} is {state}; cannot {operation}")]
    InvalidState {
        object_id: String,
        state: String,
        operation: &'static str,
    },

    /// The staged change set breaks a structural invariant.
    #[error("invalid change set for {object_id}: {reason}")]
    InvalidChangeSet { object_id: String, reason: String },

    /// A store object failed to commit.
    #[error("commit of {object_id} failed: {reason}")]
    CommitFailed { object_id: String, reason: String },

    /// Rollback could not restore every store object.
    #[error("rollback failed: {0}")]
    RollbackFailed(String),

    /// Write attempted through a read-only session.
    #[error("session is read-only")]
    ReadOnly,

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A lock guarding in-memory state was poisoned.
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

impl StoreError {
    pub(crate) fn poisoned(e: impl std::fmt::Display) -> Self {
        Self::LockPoisoned(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
