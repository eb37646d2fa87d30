//! Core types for the credit ledger.
//!
//! This crate provides the domain model shared by the store and the service:
//!
//! - **Identifiers**: `UserId`, `TransactionId`, `OrderId`, `ReservationId`, `ActivityId`
//! - **Accounts**: `Account`
//! - **Credits**: `CreditTransaction`, `TransactionType`
//! - **Orders**: `PendingOrder`, `OrderStatus`
//! - **Pricing**: `PackageCatalog`, `ServicePricing`
//! - **Idempotency**: `IdempotencyRecord`, `Reservation`
//! - **Audit**: `AdminActivity`
//!
//! # Credit Unit
//!
//! Credits are whole units stored as `i64`. A balance is never negative; every
//! change to it is recorded as exactly one `CreditTransaction` whose
//! `credit_balance_after` equals the balance the change produced.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod audit;
pub mod credits;
pub mod error;
pub mod idempotency;
pub mod ids;
pub mod orders;
pub mod pricing;

pub use account::Account;
pub use audit::{ActivityFilter, ActivityStatus, AdminAction, AdminActivity};
pub use credits::{CreditTransaction, TransactionMeta, TransactionType};
pub use error::{LedgerError, Result};
pub use idempotency::{
    IdempotencyRecord, OrderConfirmationRecord, RecordedOutcome, Reservation, ReservationState,
};
pub use ids::{ActivityId, IdError, OrderId, ReservationId, TransactionId, UserId};
pub use orders::{OrderStatus, PendingOrder};
pub use pricing::{CreditPackage, PackageCatalog, ServicePricing};
