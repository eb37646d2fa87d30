//! Key encoding utilities for `RocksDB`.

use credit_ledger_core::{ActivityId, OrderId, TransactionId, UserId};

/// Create an account key from a user ID.
#[must_use]
pub fn account_key(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Create a transaction key from a transaction ID.
#[must_use]
pub fn transaction_key(transaction_id: &TransactionId) -> Vec<u8> {
    transaction_id.to_bytes().to_vec()
}

/// Create a user-transaction index key.
///
/// Format: `user_id (16 bytes) || sequence (8 bytes, big endian)`
///
/// Big-endian sequences sort numerically, so a prefix scan walks a user's
/// transactions in commit order regardless of clock skew.
#[must_use]
pub fn user_transaction_key(user_id: &UserId, sequence: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(24);
    key.extend_from_slice(user_id.as_bytes());
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

/// Create a prefix for iterating all transactions for a user.
#[must_use]
pub fn user_transactions_prefix(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Decode a transaction ID stored as an index value.
///
/// Returns `None` if the value is not exactly 16 bytes.
#[must_use]
pub fn decode_transaction_id(value: &[u8]) -> Option<TransactionId> {
    let bytes: [u8; 16] = value.try_into().ok()?;
    Some(TransactionId::from_bytes(bytes))
}

/// Create an order key from an order ID.
#[must_use]
pub fn order_key(order_id: &OrderId) -> Vec<u8> {
    order_id.to_bytes().to_vec()
}

/// Create an idempotency record key.
#[must_use]
pub fn idempotency_key(key: &str) -> Vec<u8> {
    key.as_bytes().to_vec()
}

/// Create an admin activity key.
#[must_use]
pub fn activity_key(activity_id: &ActivityId) -> Vec<u8> {
    activity_id.to_bytes().to_vec()
}
