use thiserror::Error;

use crate::dispute::DisputeStatus;

/// Uniform error taxonomy. Every [`Error`] variant maps onto exactly one
/// kind via [`Error::kind`]; call sites pattern-match on the kind at the API
/// boundary and on the variant internally.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input at the API boundary.
    InvalidArgument,
    /// Referenced entity absent.
    NotFound,
    /// Uniqueness violation.
    Conflict,
    /// A business rule blocks the operation.
    FailedPrecondition,
    /// The serialisation retry budget was consumed.
    SerializationRetryExhausted,
    /// The operation was cancelled or timed out.
    DeadlineExceeded,
    /// Bug or store malfunction.
    Internal,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("precondition failed: {0}")]
    FailedPrecondition(String),

    #[error("insufficient balance on account {account_id}: need {need}, have {have}")]
    InsufficientBalance {
        account_id: String,
        need: String,
        have: String,
    },

    #[error("invalid state transition for dispute {dispute_id}: {from} -> {to}")]
    InvalidStateTransition {
        dispute_id: String,
        from: DisputeStatus,
        to: DisputeStatus,
    },

    /// Internal signal from the store adapter: commit-time validation found a
    /// conflicting concurrent write. Absorbed by the retry helper; callers
    /// only ever observe [`Error::SerializationRetryExhausted`].
    #[error("serialization conflict")]
    SerializationConflict,

    #[error("serialization retry budget exhausted after {attempts} attempts")]
    SerializationRetryExhausted { attempts: u32 },

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::FailedPrecondition(_)
            | Error::InsufficientBalance { .. }
            | Error::InvalidStateTransition { .. } => ErrorKind::FailedPrecondition,
            // A raw conflict that escapes the retry helper is a bug.
            Error::SerializationConflict => ErrorKind::Internal,
            Error::SerializationRetryExhausted { .. } => ErrorKind::SerializationRetryExhausted,
            Error::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            Error::Storage(_) | Error::Serialization(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_serialization_conflict(&self) -> bool {
        matches!(self, Error::SerializationConflict)
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            entity,
            id: id.into(),
        }
    }
}
