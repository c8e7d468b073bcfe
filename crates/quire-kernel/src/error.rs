use quire_index::IndexError;
use quire_store::StoreError;
use quire_types::{TxId, TypeError};
use thiserror::Error;

/// Who is at fault for a failed operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// The request cannot succeed as issued.
    Client,
    /// The repository failed to carry out a valid request.
    Server,
}

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid resource id: {0}")]
    InvalidId(#[from] TypeError),

    #[error("digest mismatch: {0}")]
    DigestMismatch(String),

    #[error("storage error: {0}")]
    Storage(StoreError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("transaction {tx} is {state}; cannot {operation}")]
    TransactionState {
        tx: TxId,
        state: String,
        operation: &'static str,
    },

    #[error("transaction {0} has expired")]
    TransactionExpired(TxId),

    #[error("partial commit of transaction {tx}: {reason}")]
    PartialCommit { tx: TxId, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("intent log error: {0}")]
    IntentLog(String),

    #[error("repository runtime error: {0}")]
    Runtime(String),
}

impl KernelError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NotFound(_) | Self::Conflict(_) | Self::InvalidId(_) => ErrorClass::Client,
            _ => ErrorClass::Server,
        }
    }

    pub(crate) fn poisoned(e: impl std::fmt::Display) -> Self {
        Self::Runtime(format!("lock poisoned: {e}"))
    }
}

impl From<StoreError> for KernelError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::Conflict(what) => Self::Conflict(what),
            StoreError::DigestMismatch { .. } => Self::DigestMismatch(e.to_string()),
            other => Self::Storage(other),
        }
    }
}

impl From<std::io::Error> for KernelError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(StoreError::Io(e))
    }
}

impl From<serde_json::Error> for KernelError {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage(StoreError::Serialization(e.to_string()))
    }
}

/// Convenience result alias for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;
