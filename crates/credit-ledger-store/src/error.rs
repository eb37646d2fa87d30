//! Error types for credit ledger storage.

use credit_ledger_core::LedgerError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Record identifier.
        id: String,
    },

    /// Record already exists.
    #[error("{entity} already exists: {id}")]
    AlreadyExists {
        /// Kind of record.
        entity: &'static str,
        /// Record identifier.
        id: String,
    },

    /// The account version moved since it was read.
    #[error("account version conflict: {user_id}")]
    AccountVersionConflict {
        /// The contended account.
        user_id: String,
    },

    /// An order status or idempotency revision guard did not hold.
    #[error("guard rejected for {entity} {id}")]
    GuardRejected {
        /// Kind of record.
        entity: &'static str,
        /// Record identifier.
        id: String,
    },
}

impl StoreError {
    pub(crate) fn database(err: impl std::fmt::Display) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound {
                entity: "account",
                id,
            } => Self::AccountNotFound { user_id: id },
            StoreError::NotFound {
                entity: "order",
                id,
            } => Self::UnknownOrder { order_id: id },
            StoreError::AlreadyExists {
                entity: "account",
                id,
            } => Self::AccountAlreadyExists { user_id: id },
            StoreError::AccountVersionConflict { user_id } => Self::Conflict {
                user_id,
                attempts: 1,
            },
            StoreError::GuardRejected { entity, id } => Self::GuardRejected {
                entity: entity.to_string(),
                id,
            },
            other => Self::Storage(other.to_string()),
        }
    }
}
