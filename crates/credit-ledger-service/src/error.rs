//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use credit_ledger_core::LedgerError;
use credit_ledger_store::StoreError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Forbidden - valid credentials but insufficient permissions.
    #[error("forbidden")]
    Forbidden,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - resource already exists or concurrent modification.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Insufficient credits.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current balance.
        balance: i64,
        /// Required amount.
        required: i64,
    },

    /// Unknown credit package.
    #[error("invalid package: {0}")]
    InvalidPackage(String),

    /// Unknown purchase order.
    #[error("unknown order: {0}")]
    UnknownOrder(String),

    /// Paid amount differs from the order.
    #[error("amount mismatch: expected={expected}, actual={actual}")]
    AmountMismatch {
        /// Expected amount.
        expected: i64,
        /// Reported amount.
        actual: i64,
    },

    /// Order cannot make the requested transition.
    #[error("{0}")]
    InvalidOrderState(String),

    /// A charge with the same idempotency key is still running.
    #[error("charge in progress: {0}")]
    ChargeInProgress(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// External service error.
    #[error("external service error: {0}")]
    ExternalService(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::Forbidden => (StatusCode::FORBIDDEN, "forbidden", self.to_string(), None),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone(), None),
            Self::InsufficientCredits { balance, required } => (
                StatusCode::PAYMENT_REQUIRED,
                "insufficient_credits",
                self.to_string(),
                Some(serde_json::json!({
                    "balance": balance,
                    "required": required,
                    "action": "top_up"
                })),
            ),
            Self::InvalidPackage(id) => (
                StatusCode::BAD_REQUEST,
                "invalid_package",
                format!("Unknown package: {id}"),
                None,
            ),
            Self::UnknownOrder(id) => (
                StatusCode::NOT_FOUND,
                "unknown_order",
                format!("Unknown order: {id}"),
                None,
            ),
            Self::AmountMismatch { expected, actual } => (
                StatusCode::BAD_REQUEST,
                "amount_mismatch",
                self.to_string(),
                Some(serde_json::json!({
                    "expected": expected,
                    "actual": actual
                })),
            ),
            Self::InvalidOrderState(msg) => (
                StatusCode::CONFLICT,
                "invalid_order_state",
                msg.clone(),
                None,
            ),
            Self::ChargeInProgress(key) => (
                StatusCode::CONFLICT,
                "charge_in_progress",
                format!("A charge with idempotency key {key} is still being processed"),
                None,
            ),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            Self::ExternalService(msg) => (
                StatusCode::BAD_GATEWAY,
                "external_service_error",
                msg.clone(),
                None,
            ),
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientCredits { balance, required } => {
                Self::InsufficientCredits { balance, required }
            }
            LedgerError::AccountNotFound { user_id } => {
                Self::NotFound(format!("Account not found: {user_id}"))
            }
            LedgerError::AccountAlreadyExists { .. } => {
                Self::Conflict("Account already exists".into())
            }
            LedgerError::AccountArchived { user_id } => {
                Self::Conflict(format!("Account {user_id} is archived"))
            }
            LedgerError::InvalidPackage { package_id } => Self::InvalidPackage(package_id),
            LedgerError::UnknownService { service_id } => {
                Self::BadRequest(format!("Unknown service: {service_id}"))
            }
            LedgerError::UnknownOrder { order_id } => Self::UnknownOrder(order_id),
            LedgerError::AmountMismatch { expected, actual } => {
                Self::AmountMismatch { expected, actual }
            }
            err @ LedgerError::InvalidOrderState { .. } => Self::InvalidOrderState(err.to_string()),
            LedgerError::ChargeInProgress { key } => Self::ChargeInProgress(key),
            err @ (LedgerError::Conflict { .. } | LedgerError::GuardRejected { .. }) => {
                Self::Conflict(err.to_string())
            }
            LedgerError::ExternalService { service, message } => {
                Self::ExternalService(format!("{service}: {message}"))
            }
            LedgerError::InvalidAmount(msg) => Self::BadRequest(msg),
            LedgerError::InvalidId(e) => Self::BadRequest(e.to_string()),
            LedgerError::Storage(msg) | LedgerError::Configuration(msg) => Self::Internal(msg),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        LedgerError::from(err).into()
    }
}
