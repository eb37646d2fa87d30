//! In-memory storage implementation.
//!
//! Used by tests and local development. Rows live in plain maps behind a
//! reader-writer latch that is only held while a batch is read or applied;
//! the guard-check-then-write section of each mutation is serialized by the
//! owning account's lock stripe.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use credit_ledger_core::{
    Account, ActivityFilter, ActivityId, AdminActivity, CreditTransaction, IdempotencyRecord,
    OrderId, OrderStatus, PendingOrder, ReservationState, TransactionId, UserId,
};

use crate::error::{Result, StoreError};
use crate::locks::AccountLocks;
use crate::{check_guards, check_order_guard, check_record_guard, LedgerWrite, RecordWrite, Store};

#[derive(Default)]
struct Tables {
    accounts: HashMap<UserId, Account>,
    transactions: HashMap<TransactionId, CreditTransaction>,
    transactions_by_user: HashMap<UserId, BTreeMap<u64, TransactionId>>,
    orders: HashMap<OrderId, PendingOrder>,
    records: HashMap<String, IdempotencyRecord>,
    /// Keys of records whose reservation is still `held`.
    held: BTreeSet<String>,
    activity: BTreeMap<ActivityId, AdminActivity>,
}

impl Tables {
    fn apply(&mut self, write: &LedgerWrite) {
        let tx = &write.transaction;
        self.transactions_by_user
            .entry(tx.user_id)
            .or_default()
            .insert(tx.sequence, tx.id);
        self.transactions.insert(tx.id, tx.clone());

        if let Some(transition) = &write.order {
            self.orders
                .insert(transition.order.order_id, transition.order.clone());
        }
        if let Some(record_write) = &write.record {
            self.put_record(&record_write.record);
        }
        if let Some(activity) = &write.activity {
            self.activity.insert(activity.id, activity.clone());
        }

        self.accounts.insert(write.account.user_id, write.account.clone());
    }

    fn put_record(&mut self, record: &IdempotencyRecord) {
        if is_held(record) {
            self.held.insert(record.key.clone());
        } else {
            self.held.remove(&record.key);
        }
        self.records.insert(record.key.clone(), record.clone());
    }
}

fn is_held(record: &IdempotencyRecord) -> bool {
    record
        .reservation()
        .is_some_and(|r| r.state == ReservationState::Held)
}

/// Map-backed storage implementation.
#[derive(Default)]
pub struct MemoryStore {
    locks: AccountLocks,
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn create_account(&self, account: &Account) -> Result<()> {
        let _stripe = self.locks.lock(&account.user_id);
        let mut tables = self.tables.write();
        if tables.accounts.contains_key(&account.user_id) {
            return Err(StoreError::AlreadyExists {
                entity: "account",
                id: account.user_id.to_string(),
            });
        }
        tables.accounts.insert(account.user_id, account.clone());
        Ok(())
    }

    fn get_account(&self, user_id: &UserId) -> Result<Option<Account>> {
        Ok(self.tables.read().accounts.get(user_id).cloned())
    }

    fn update_account(&self, account: &Account, expected_version: u64) -> Result<()> {
        let _stripe = self.locks.lock(&account.user_id);
        let current = self.get_account(&account.user_id)?.ok_or_else(|| {
            StoreError::NotFound {
                entity: "account",
                id: account.user_id.to_string(),
            }
        })?;
        if current.version != expected_version {
            return Err(StoreError::AccountVersionConflict {
                user_id: account.user_id.to_string(),
            });
        }
        self.tables
            .write()
            .accounts
            .insert(account.user_id, account.clone());
        Ok(())
    }

    fn commit(&self, write: &LedgerWrite) -> Result<()> {
        let _stripe = self.locks.lock(&write.account.user_id);

        {
            let tables = self.tables.read();
            let order = write
                .order
                .as_ref()
                .and_then(|t| tables.orders.get(&t.order.order_id));
            let record = write
                .record
                .as_ref()
                .and_then(|r| tables.records.get(&r.record.key));
            check_guards(
                write,
                tables.accounts.get(&write.account.user_id),
                order,
                record,
            )?;
        }

        self.tables.write().apply(write);
        Ok(())
    }

    fn get_transaction(&self, transaction_id: &TransactionId) -> Result<Option<CreditTransaction>> {
        Ok(self.tables.read().transactions.get(transaction_id).cloned())
    }

    fn list_transactions_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        let tables = self.tables.read();
        let Some(index) = tables.transactions_by_user.get(user_id) else {
            return Ok(Vec::new());
        };
        Ok(index
            .values()
            .rev()
            .skip(offset)
            .take(limit)
            .filter_map(|id| tables.transactions.get(id).cloned())
            .collect())
    }

    fn transaction_history(&self, user_id: &UserId) -> Result<Vec<CreditTransaction>> {
        let tables = self.tables.read();
        let Some(index) = tables.transactions_by_user.get(user_id) else {
            return Ok(Vec::new());
        };
        Ok(index
            .values()
            .filter_map(|id| tables.transactions.get(id).cloned())
            .collect())
    }

    fn insert_order(&self, order: &PendingOrder) -> Result<()> {
        let _stripe = self.locks.lock(&order.user_id);
        let mut tables = self.tables.write();
        if tables.orders.contains_key(&order.order_id) {
            return Err(StoreError::AlreadyExists {
                entity: "order",
                id: order.order_id.to_string(),
            });
        }
        tables.orders.insert(order.order_id, order.clone());
        Ok(())
    }

    fn get_order(&self, order_id: &OrderId) -> Result<Option<PendingOrder>> {
        Ok(self.tables.read().orders.get(order_id).cloned())
    }

    fn update_order(&self, order: &PendingOrder, expected_status: OrderStatus) -> Result<()> {
        let _stripe = self.locks.lock(&order.user_id);
        let transition = crate::OrderTransition {
            order: order.clone(),
            expected_status,
        };
        {
            let tables = self.tables.read();
            check_order_guard(&transition, tables.orders.get(&order.order_id))?;
        }
        self.tables
            .write()
            .orders
            .insert(order.order_id, order.clone());
        Ok(())
    }

    fn get_idempotency_record(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        Ok(self.tables.read().records.get(key).cloned())
    }

    fn update_idempotency_record(&self, write: &RecordWrite) -> Result<()> {
        let _stripe = self.locks.lock(&write.record.user_id);
        {
            let tables = self.tables.read();
            check_record_guard(write, tables.records.get(&write.record.key))?;
        }
        self.tables.write().put_record(&write.record);
        Ok(())
    }

    fn list_held_reservations(&self, older_than: DateTime<Utc>) -> Result<Vec<IdempotencyRecord>> {
        let tables = self.tables.read();
        Ok(tables
            .held
            .iter()
            .filter_map(|key| tables.records.get(key))
            .filter(|record| record.updated_at < older_than && is_held(record))
            .cloned()
            .collect())
    }

    fn append_activity(&self, activity: &AdminActivity) -> Result<()> {
        self.tables
            .write()
            .activity
            .insert(activity.id, activity.clone());
        Ok(())
    }

    fn list_activity(
        &self,
        filter: &ActivityFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AdminActivity>> {
        Ok(self
            .tables
            .read()
            .activity
            .values()
            .rev()
            .filter(|entry| entry.matches(filter))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}
