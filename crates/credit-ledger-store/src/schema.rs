//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Primary account records, keyed by `user_id`.
    pub const ACCOUNTS: &str = "accounts";

    /// Credit transactions, keyed by `transaction_id` (ULID).
    pub const TRANSACTIONS: &str = "transactions";

    /// Index: transactions by user, keyed by `user_id || sequence_be`.
    /// Value is the transaction ID.
    pub const TRANSACTIONS_BY_USER: &str = "transactions_by_user";

    /// Purchase orders, keyed by `order_id`.
    pub const PENDING_ORDERS: &str = "pending_orders";

    /// Idempotency records, keyed by the namespaced idempotency key.
    pub const IDEMPOTENCY: &str = "idempotency";

    /// Index: idempotency records whose reservation is still `held`, keyed
    /// like [`IDEMPOTENCY`]. Values are empty.
    pub const HELD_RESERVATIONS: &str = "held_reservations";

    /// Admin activity log, keyed by `activity_id` (ULID, time ordered).
    pub const ADMIN_ACTIVITY: &str = "admin_activity";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::ACCOUNTS,
        cf::TRANSACTIONS,
        cf::TRANSACTIONS_BY_USER,
        cf::PENDING_ORDERS,
        cf::IDEMPOTENCY,
        cf::HELD_RESERVATIONS,
        cf::ADMIN_ACTIVITY,
    ]
}
