//! Error types for the credit ledger.

use crate::ids::IdError;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors that can occur in ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Insufficient credits for a debit.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current balance.
        balance: i64,
        /// Credits the operation needed.
        required: i64,
    },

    /// Account not found.
    #[error("account not found: {user_id}")]
    AccountNotFound {
        /// The user ID that was not found.
        user_id: String,
    },

    /// Account already exists.
    #[error("account already exists: {user_id}")]
    AccountAlreadyExists {
        /// The user ID that already exists.
        user_id: String,
    },

    /// Account is archived and rejects mutations.
    #[error("account archived: {user_id}")]
    AccountArchived {
        /// The archived user ID.
        user_id: String,
    },

    /// Package ID is not in the catalog.
    #[error("invalid package: {package_id}")]
    InvalidPackage {
        /// The requested package ID.
        package_id: String,
    },

    /// Service has no price and the caller supplied no cost.
    #[error("unknown service: {service_id}")]
    UnknownService {
        /// The requested service ID.
        service_id: String,
    },

    /// Order ID was never prepared.
    #[error("unknown order: {order_id}")]
    UnknownOrder {
        /// The unknown order ID.
        order_id: String,
    },

    /// Gateway reported a different amount than the order expects.
    #[error("amount mismatch: expected={expected}, actual={actual}")]
    AmountMismatch {
        /// Amount captured when the order was prepared.
        expected: i64,
        /// Amount the gateway reported.
        actual: i64,
    },

    /// Order cannot make the requested transition.
    #[error("order {order_id} is {status}")]
    InvalidOrderState {
        /// The order ID.
        order_id: String,
        /// Its current status.
        status: String,
    },

    /// A charge with this idempotency key is still being settled.
    #[error("charge in progress: {key}")]
    ChargeInProgress {
        /// The client idempotency key.
        key: String,
    },

    /// Concurrent writers kept winning the race for an account.
    #[error("write conflict on account {user_id} after {attempts} attempts")]
    Conflict {
        /// The contended account.
        user_id: String,
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// A guarded row (order status, idempotency record) changed underneath
    /// the write. The caller re-reads and replays the winner's outcome.
    #[error("{entity} {id} was modified concurrently")]
    GuardRejected {
        /// Kind of row.
        entity: String,
        /// Row identifier.
        id: String,
    },

    /// External collaborator error (inference service, payment gateway).
    #[error("external service error: {service} - {message}")]
    ExternalService {
        /// The service that failed.
        service: String,
        /// Error message.
        message: String,
    },

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// Invalid amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl LedgerError {
    /// Shorthand for an inference service failure.
    pub fn inference(message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: "inference".to_string(),
            message: message.into(),
        }
    }

    /// Shorthand for a payment gateway failure.
    pub fn gateway(message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: "payment_gateway".to_string(),
            message: message.into(),
        }
    }
}
