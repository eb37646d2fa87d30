//! Storage layer for the credit ledger.
//!
//! This crate provides the durable record of accounts, transactions, purchase
//! orders, idempotency records and the admin activity log.
//!
//! # Architecture
//!
//! Every balance mutation goes through [`Store::commit`], which applies a
//! [`LedgerWrite`] atomically: the new account row (guarded by the version it
//! was derived from), the transaction row, and any attached order transition,
//! idempotency record or admin activity row. Either all of them become
//! visible or none does.
//!
//! Two backends are provided:
//!
//! - [`MemoryStore`]: in-process maps, for tests and development
//! - `RocksStore` (feature `rocksdb-backend`): column families with CBOR values
//!   and `WriteBatch` atomicity
//!
//! # Example
//!
//! ```
//! use credit_ledger_store::{MemoryStore, Store};
//! use credit_ledger_core::{Account, UserId};
//!
//! let store = MemoryStore::new();
//! let user_id = UserId::generate();
//! store.create_account(&Account::new(user_id)).unwrap();
//!
//! let account = store.get_account(&user_id).unwrap().unwrap();
//! assert_eq!(account.balance, 0);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod locks;
pub mod memory;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
pub mod schema;
#[cfg(test)]
mod testing;

pub use error::{Result, StoreError};
pub use locks::AccountLocks;
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use chrono::{DateTime, Utc};
use credit_ledger_core::{
    Account, ActivityFilter, AdminActivity, CreditTransaction, IdempotencyRecord, OrderId,
    OrderStatus, PendingOrder, TransactionId, UserId,
};

/// One atomic ledger mutation.
#[derive(Debug, Clone)]
pub struct LedgerWrite {
    /// The account row after the mutation.
    pub account: Account,

    /// The version the new row was derived from.
    pub expected_version: u64,

    /// The transaction recording the mutation.
    pub transaction: CreditTransaction,

    /// Order status change committed with the mutation.
    pub order: Option<OrderTransition>,

    /// Idempotency record written with the mutation.
    pub record: Option<RecordWrite>,

    /// Admin activity row written with the mutation.
    pub activity: Option<AdminActivity>,
}

/// A guarded order status change.
#[derive(Debug, Clone)]
pub struct OrderTransition {
    /// The order row after the change.
    pub order: PendingOrder,

    /// Status the stored order must currently have.
    pub expected_status: OrderStatus,
}

/// A guarded idempotency record write.
#[derive(Debug, Clone)]
pub struct RecordWrite {
    /// The record to store.
    pub record: IdempotencyRecord,

    /// Revision the stored record must currently have; `None` means the key
    /// must not exist yet.
    pub expected_revision: Option<u32>,
}

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (`RocksDB`, in-memory for testing). Implementations must make each method
/// atomic and must never let readers observe half of a [`LedgerWrite`].
pub trait Store: Send + Sync {
    // =========================================================================
    // Account Operations
    // =========================================================================

    /// Insert a new account record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the account exists.
    fn create_account(&self, account: &Account) -> Result<()>;

    /// Get an account by user ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_account(&self, user_id: &UserId) -> Result<Option<Account>>;

    /// Replace an account row without a transaction (archival).
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the account doesn't exist.
    /// - `StoreError::AccountVersionConflict` if the stored version differs
    ///   from `expected_version`.
    fn update_account(&self, account: &Account, expected_version: u64) -> Result<()>;

    // =========================================================================
    // Ledger Writes
    // =========================================================================

    /// Apply a ledger mutation atomically.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the account or attached order doesn't exist.
    /// - `StoreError::AccountVersionConflict` if the account moved.
    /// - `StoreError::GuardRejected` if an attached order or record guard fails.
    fn commit(&self, write: &LedgerWrite) -> Result<()>;

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    /// Get a transaction by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_transaction(&self, transaction_id: &TransactionId) -> Result<Option<CreditTransaction>>;

    /// List transactions for a user in reverse commit order (newest first).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_transactions_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>>;

    /// Every transaction for a user in commit order (oldest first).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn transaction_history(&self, user_id: &UserId) -> Result<Vec<CreditTransaction>>;

    // =========================================================================
    // Order Operations
    // =========================================================================

    /// Insert a new purchase order.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the order ID is taken.
    fn insert_order(&self, order: &PendingOrder) -> Result<()>;

    /// Get an order by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_order(&self, order_id: &OrderId) -> Result<Option<PendingOrder>>;

    /// Replace an order that has no ledger effect (failure).
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the order doesn't exist.
    /// - `StoreError::GuardRejected` if its status is not `expected_status`.
    fn update_order(&self, order: &PendingOrder, expected_status: OrderStatus) -> Result<()>;

    // =========================================================================
    // Idempotency Records
    // =========================================================================

    /// Get an idempotency record by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_idempotency_record(&self, key: &str) -> Result<Option<IdempotencyRecord>>;

    /// Write an idempotency record that has no ledger effect.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::GuardRejected` if the revision guard fails.
    fn update_idempotency_record(&self, write: &RecordWrite) -> Result<()>;

    /// Records whose reservation is still `held` and was last updated before
    /// `older_than`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_held_reservations(&self, older_than: DateTime<Utc>) -> Result<Vec<IdempotencyRecord>>;

    // =========================================================================
    // Admin Activity
    // =========================================================================

    /// Append an activity row that has no ledger effect (failed attempts).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn append_activity(&self, activity: &AdminActivity) -> Result<()>;

    /// List activity newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_activity(
        &self,
        filter: &ActivityFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AdminActivity>>;
}

/// Check the guards of a ledger write against the current rows.
///
/// Shared by every backend; callers hold the account's lock stripe.
pub(crate) fn check_guards(
    write: &LedgerWrite,
    current_account: Option<&Account>,
    current_order: Option<&PendingOrder>,
    current_record: Option<&IdempotencyRecord>,
) -> Result<()> {
    let user_id = write.account.user_id;
    check_ownership(write)?;
    let account = current_account.ok_or_else(|| StoreError::NotFound {
        entity: "account",
        id: user_id.to_string(),
    })?;
    if account.version != write.expected_version {
        return Err(StoreError::AccountVersionConflict {
            user_id: user_id.to_string(),
        });
    }

    if let Some(transition) = &write.order {
        check_order_guard(transition, current_order)?;
    }

    if let Some(record_write) = &write.record {
        check_record_guard(record_write, current_record)?;
    }

    Ok(())
}

/// Attached rows must belong to the account being written, since only that
/// account's lock stripe is held.
fn check_ownership(write: &LedgerWrite) -> Result<()> {
    let user_id = write.account.user_id;
    let foreign = write.transaction.user_id != user_id
        || write.order.as_ref().is_some_and(|t| t.order.user_id != user_id)
        || write.record.as_ref().is_some_and(|r| r.record.user_id != user_id);
    if foreign {
        return Err(StoreError::Database(format!(
            "ledger write for {user_id} carries rows of another account"
        )));
    }
    Ok(())
}

pub(crate) fn check_order_guard(
    transition: &OrderTransition,
    current: Option<&PendingOrder>,
) -> Result<()> {
    let order_id = transition.order.order_id.to_string();
    let stored = current.ok_or_else(|| StoreError::NotFound {
        entity: "order",
        id: order_id.clone(),
    })?;
    if stored.status != transition.expected_status {
        return Err(StoreError::GuardRejected {
            entity: "order",
            id: order_id,
        });
    }
    Ok(())
}

pub(crate) fn check_record_guard(
    write: &RecordWrite,
    current: Option<&IdempotencyRecord>,
) -> Result<()> {
    let holds = match (write.expected_revision, current) {
        (None, None) => true,
        (Some(expected), Some(stored)) => stored.revision == expected,
        _ => false,
    };
    if holds {
        Ok(())
    } else {
        Err(StoreError::GuardRejected {
            entity: "idempotency_record",
            id: write.record.key.clone(),
        })
    }
}
