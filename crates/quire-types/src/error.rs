use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid resource id {id:?}: {reason}")]
    InvalidId { id: String, reason: String },

    #[error("resource id {id:?} uses reserved segment {segment:?}")]
    ReservedSegment { id: String, segment: String },

    #[error("invalid memento label {0:?}: expected yyyyMMddHHmmss")]
    InvalidMementoLabel(String),

    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("invalid transaction id: {0}")]
    InvalidTxId(String),

    #[error("unknown interaction model: {0}")]
    UnknownInteractionModel(String),
}

impl TypeError {
    pub(crate) fn invalid_id(id: &str, reason: impl Into<String>) -> Self {
        Self::InvalidId {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Convenience result alias.
pub type TypeResult<T> = Result<T, TypeError>;
