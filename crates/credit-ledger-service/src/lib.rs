//! Credit Ledger HTTP API Service.
//!
//! This crate provides the ledger engine and its HTTP API:
//!
//! - Account balances and transaction history
//! - Paid service charging (reserve, invoke, commit or refund)
//! - Purchase orders reconciled against payment gateway confirmations
//! - Admin credit adjustments with an append-only activity log
//!
//! # Authentication
//!
//! Requests carry HS256 JWTs issued by the identity subsystem. The `sub`
//! claim is the user ID; admin endpoints additionally require
//! `role = "admin"`. Payment gateway webhooks are authenticated with an
//! HMAC-SHA256 signature over the raw body.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers over the synchronous store stay async for axum

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod inference;
pub mod ledger;
pub mod routes;
pub mod state;

pub use config::{ServiceConfig, StorageBackend};
pub use error::ApiError;
pub use gateway::{GatewayConfirmation, GatewayError, HttpPaymentGateway, PaymentGateway};
pub use inference::{HttpInferenceProvider, InferenceError, InferenceProvider};
pub use ledger::{
    AdminAdjustment, AdminContext, AdminLedger, ChargeOutcome, ChargeRequest,
    ConfirmationSource, ConfirmOrder, CreditLedger, LedgerReceipt, LedgerVerification,
    OrderConfirmation, Page, PaymentReconciler, ServiceCharger,
};
pub use routes::create_router;
pub use state::AppState;
