//! Core error type for record operations.

use dynarecord_model::{DynamoDBError, DynamoDBErrorCode};

use crate::codec::CodecError;
use crate::expression::ExpressionError;

/// Result alias for record engine operations.
pub type Result<T, E = RecordError> = std::result::Result<T, E>;

/// Errors raised by the record engine.
///
/// Store failures pass through unchanged in [`RecordError::Store`]; every
/// other variant is raised locally before a request is issued.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// The store client rejected the request or failed to serve it.
    #[error(transparent)]
    Store(#[from] DynamoDBError),

    /// The caller supplied an inconsistent request.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// Expression construction failed.
    #[error(transparent)]
    Expression(#[from] ExpressionError),

    /// A value could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The named index is not declared for the entity.
    #[error("index '{index}' is not declared for entity '{entity}'")]
    UnknownIndex {
        /// Entity name.
        entity: String,
        /// Requested index.
        index: String,
    },

    /// No descriptor is registered under the entity name.
    #[error("entity '{0}' is not registered")]
    NotRegistered(String),

    /// A new record was saved without an `id`.
    #[error("cannot create a record without an id")]
    MissingId,

    /// A persisted record's `id` was reassigned.
    #[error("id of a persisted record cannot change (was '{current}')")]
    ImmutableId {
        /// The stored id.
        current: String,
    },

    /// The record was deleted and can no longer be written.
    #[error("record '{0}' was deleted")]
    Deleted(String),

    /// `commit` was called without `use_transaction`.
    #[error("no active transaction")]
    NoActiveTransaction,

    /// The buffer exceeded the store's per-transaction operation limit.
    #[error("transaction has {count} operations, at most {max} are allowed")]
    TransactionTooLarge {
        /// Buffered operations.
        count: usize,
        /// Store limit.
        max: usize,
    },

    /// Entity (de)serialization failed.
    #[error("entity serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RecordError {
    /// `true` when a write precondition was not met: a create hit an
    /// existing id, an update hit a missing one, or a transaction was
    /// cancelled.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_conditional_failure())
    }

    /// The store error code, when the failure came from the store.
    #[must_use]
    pub fn store_code(&self) -> Option<DynamoDBErrorCode> {
        match self {
            Self::Store(e) => Some(e.code),
            _ => None,
        }
    }
}
