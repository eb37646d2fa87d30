//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.
//! Multi-row writes go through a single `WriteBatch`, so readers see either
//! all rows of a ledger mutation or none of them.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use credit_ledger_core::{
    Account, ActivityFilter, AdminActivity, CreditTransaction, IdempotencyRecord, OrderId,
    OrderStatus, PendingOrder, ReservationState, TransactionId, UserId,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::locks::AccountLocks;
use crate::schema::{all_column_families, cf};
use crate::{
    check_guards, check_order_guard, check_record_guard, LedgerWrite, OrderTransition,
    RecordWrite, Store,
};

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    locks: AccountLocks,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(StoreError::database)?;

        Ok(Self {
            db: Arc::new(db),
            locks: AccountLocks::new(),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get<T: serde::de::DeserializeOwned>(&self, family: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(family)?;
        self.db
            .get_cf(&cf, key)
            .map_err(StoreError::database)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn put<T: serde::Serialize>(&self, family: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(family)?;
        let value = Self::serialize(value)?;
        self.db.put_cf(&cf, key, value).map_err(StoreError::database)
    }

    /// Transaction IDs from the user index, walking in the given direction.
    fn user_index(
        &self,
        user_id: &UserId,
        direction: Direction,
    ) -> Result<impl Iterator<Item = Result<TransactionId>> + '_> {
        let cf_by_user = self.cf(cf::TRANSACTIONS_BY_USER)?;
        let prefix = keys::user_transactions_prefix(user_id);
        let start = match direction {
            Direction::Forward => keys::user_transaction_key(user_id, 0),
            Direction::Reverse => keys::user_transaction_key(user_id, u64::MAX),
        };

        let iter = self
            .db
            .iterator_cf(&cf_by_user, IteratorMode::From(&start, direction));

        Ok(iter
            .map_while(move |item| match item {
                Ok((key, value)) if key.starts_with(&prefix) => Some(Ok(value)),
                Ok(_) => None,
                Err(e) => Some(Err(StoreError::database(e))),
            })
            .map(|value| {
                let value = value?;
                keys::decode_transaction_id(&value).ok_or_else(|| {
                    StoreError::Serialization("malformed transaction index entry".into())
                })
            }))
    }

    /// Stage an idempotency record and keep the held index in step with it.
    fn stage_record(&self, batch: &mut WriteBatch, record: &IdempotencyRecord) -> Result<()> {
        let key = keys::idempotency_key(&record.key);
        let cf_records = self.cf(cf::IDEMPOTENCY)?;
        let cf_held = self.cf(cf::HELD_RESERVATIONS)?;
        batch.put_cf(&cf_records, &key, Self::serialize(record)?);
        let held = record
            .reservation()
            .is_some_and(|r| r.state == ReservationState::Held);
        if held {
            batch.put_cf(&cf_held, &key, b"");
        } else {
            batch.delete_cf(&cf_held, &key);
        }
        Ok(())
    }

    fn load_transactions(
        &self,
        ids: impl Iterator<Item = Result<TransactionId>>,
    ) -> Result<Vec<CreditTransaction>> {
        let mut transactions = Vec::new();
        for id in ids {
            if let Some(tx) = self.get_transaction(&id?)? {
                transactions.push(tx);
            }
        }
        Ok(transactions)
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Account Operations
    // =========================================================================

    fn create_account(&self, account: &Account) -> Result<()> {
        let _stripe = self.locks.lock(&account.user_id);
        let key = keys::account_key(&account.user_id);
        if self.get::<Account>(cf::ACCOUNTS, &key)?.is_some() {
            return Err(StoreError::AlreadyExists {
                entity: "account",
                id: account.user_id.to_string(),
            });
        }
        self.put(cf::ACCOUNTS, &key, account)
    }

    fn get_account(&self, user_id: &UserId) -> Result<Option<Account>> {
        self.get(cf::ACCOUNTS, &keys::account_key(user_id))
    }

    fn update_account(&self, account: &Account, expected_version: u64) -> Result<()> {
        let _stripe = self.locks.lock(&account.user_id);
        let current = self
            .get_account(&account.user_id)?
            .ok_or_else(|| StoreError::NotFound {
                entity: "account",
                id: account.user_id.to_string(),
            })?;
        if current.version != expected_version {
            return Err(StoreError::AccountVersionConflict {
                user_id: account.user_id.to_string(),
            });
        }
        self.put(cf::ACCOUNTS, &keys::account_key(&account.user_id), account)
    }

    // =========================================================================
    // Ledger Writes
    // =========================================================================

    fn commit(&self, write: &LedgerWrite) -> Result<()> {
        let user_id = write.account.user_id;
        let _stripe = self.locks.lock(&user_id);

        let current_account = self.get_account(&user_id)?;
        let current_order = match &write.order {
            Some(t) => self.get_order(&t.order.order_id)?,
            None => None,
        };
        let current_record = match &write.record {
            Some(r) => self.get_idempotency_record(&r.record.key)?,
            None => None,
        };
        check_guards(
            write,
            current_account.as_ref(),
            current_order.as_ref(),
            current_record.as_ref(),
        )?;

        let tx = &write.transaction;
        let mut batch = WriteBatch::default();

        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        batch.put_cf(
            &cf_accounts,
            keys::account_key(&user_id),
            Self::serialize(&write.account)?,
        );

        let cf_tx = self.cf(cf::TRANSACTIONS)?;
        let cf_by_user = self.cf(cf::TRANSACTIONS_BY_USER)?;
        batch.put_cf(&cf_tx, keys::transaction_key(&tx.id), Self::serialize(tx)?);
        batch.put_cf(
            &cf_by_user,
            keys::user_transaction_key(&user_id, tx.sequence),
            keys::transaction_key(&tx.id),
        );

        if let Some(transition) = &write.order {
            let cf_orders = self.cf(cf::PENDING_ORDERS)?;
            batch.put_cf(
                &cf_orders,
                keys::order_key(&transition.order.order_id),
                Self::serialize(&transition.order)?,
            );
        }

        if let Some(record_write) = &write.record {
            self.stage_record(&mut batch, &record_write.record)?;
        }

        if let Some(activity) = &write.activity {
            let cf_activity = self.cf(cf::ADMIN_ACTIVITY)?;
            batch.put_cf(
                &cf_activity,
                keys::activity_key(&activity.id),
                Self::serialize(activity)?,
            );
        }

        self.db.write(batch).map_err(StoreError::database)
    }

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    fn get_transaction(&self, transaction_id: &TransactionId) -> Result<Option<CreditTransaction>> {
        self.get(cf::TRANSACTIONS, &keys::transaction_key(transaction_id))
    }

    fn list_transactions_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        let ids = self
            .user_index(user_id, Direction::Reverse)?
            .skip(offset)
            .take(limit);
        self.load_transactions(ids)
    }

    fn transaction_history(&self, user_id: &UserId) -> Result<Vec<CreditTransaction>> {
        let ids = self.user_index(user_id, Direction::Forward)?;
        self.load_transactions(ids)
    }

    // =========================================================================
    // Order Operations
    // =========================================================================

    fn insert_order(&self, order: &PendingOrder) -> Result<()> {
        let _stripe = self.locks.lock(&order.user_id);
        let key = keys::order_key(&order.order_id);
        if self.get::<PendingOrder>(cf::PENDING_ORDERS, &key)?.is_some() {
            return Err(StoreError::AlreadyExists {
                entity: "order",
                id: order.order_id.to_string(),
            });
        }
        self.put(cf::PENDING_ORDERS, &key, order)
    }

    fn get_order(&self, order_id: &OrderId) -> Result<Option<PendingOrder>> {
        self.get(cf::PENDING_ORDERS, &keys::order_key(order_id))
    }

    fn update_order(&self, order: &PendingOrder, expected_status: OrderStatus) -> Result<()> {
        let _stripe = self.locks.lock(&order.user_id);
        let transition = OrderTransition {
            order: order.clone(),
            expected_status,
        };
        let current = self.get_order(&order.order_id)?;
        check_order_guard(&transition, current.as_ref())?;
        self.put(cf::PENDING_ORDERS, &keys::order_key(&order.order_id), order)
    }

    // =========================================================================
    // Idempotency Records
    // =========================================================================

    fn get_idempotency_record(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        self.get(cf::IDEMPOTENCY, &keys::idempotency_key(key))
    }

    fn update_idempotency_record(&self, write: &RecordWrite) -> Result<()> {
        let _stripe = self.locks.lock(&write.record.user_id);
        let current = self.get_idempotency_record(&write.record.key)?;
        check_record_guard(write, current.as_ref())?;
        let mut batch = WriteBatch::default();
        self.stage_record(&mut batch, &write.record)?;
        self.db.write(batch).map_err(StoreError::database)
    }

    fn list_held_reservations(&self, older_than: DateTime<Utc>) -> Result<Vec<IdempotencyRecord>> {
        let cf_held = self.cf(cf::HELD_RESERVATIONS)?;
        let mut held = Vec::new();
        for item in self.db.iterator_cf(&cf_held, IteratorMode::Start) {
            let (key, _) = item.map_err(StoreError::database)?;
            let Some(record) = self.get::<IdempotencyRecord>(cf::IDEMPOTENCY, &key)? else {
                continue;
            };
            let is_held = record
                .reservation()
                .is_some_and(|r| r.state == ReservationState::Held);
            if is_held && record.updated_at < older_than {
                held.push(record);
            }
        }
        Ok(held)
    }

    // =========================================================================
    // Admin Activity
    // =========================================================================

    fn append_activity(&self, activity: &AdminActivity) -> Result<()> {
        self.put(cf::ADMIN_ACTIVITY, &keys::activity_key(&activity.id), activity)
    }

    fn list_activity(
        &self,
        filter: &ActivityFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AdminActivity>> {
        let cf_activity = self.cf(cf::ADMIN_ACTIVITY)?;
        let mut entries = Vec::new();
        let mut skipped = 0;

        for item in self.db.iterator_cf(&cf_activity, IteratorMode::End) {
            if entries.len() >= limit {
                break;
            }
            let (_, value) = item.map_err(StoreError::database)?;
            let entry: AdminActivity = Self::deserialize(&value)?;
            if !entry.matches(filter) {
                continue;
            }
            if skipped < offset {
                skipped += 1;
                continue;
            }
            entries.push(entry);
        }

        Ok(entries)
    }
}
