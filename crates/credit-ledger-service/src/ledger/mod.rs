//! The credit ledger engine.
//!
//! [`CreditLedger`] is the only writer of balances and transaction rows. The
//! other components build on it and attach their own rows (reservation
//! records, order transitions, admin activity) to the same atomic commit:
//!
//! - [`ServiceCharger`]: reserve, invoke, commit or refund
//! - [`PaymentReconciler`]: purchase orders and gateway confirmations
//! - [`AdminLedger`]: manual adjustments with an audit trail
//!
//! Every mutation reads the account, derives the next row, and commits it
//! guarded by the version it was read at. A lost race re-reads and retries a
//! bounded number of times before surfacing [`LedgerError::Conflict`].

pub mod admin;
pub mod charger;
pub mod reconciler;
pub mod settlement;

pub use admin::{AdminAdjustment, AdminContext, AdminLedger};
pub use charger::{ChargeOutcome, ChargeRequest, ServiceCharger};
pub use reconciler::{ConfirmOrder, ConfirmationSource, OrderConfirmation, PaymentReconciler};
pub use settlement::{
    spawn_reservation_sweeper, SettlementQueue, SettlementTask, SettlementWorker,
};

use std::sync::Arc;

use serde::Serialize;

use credit_ledger_core::{
    Account, AdminActivity, CreditTransaction, LedgerError, Result, TransactionId,
    TransactionMeta, TransactionType, UserId,
};
use credit_ledger_store::{LedgerWrite, OrderTransition, RecordWrite, Store, StoreError};

/// Default number of commit attempts per mutation.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default page size for listings.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Largest page a caller may request.
pub const MAX_PAGE_SIZE: usize = 100;

/// Result of a committed balance mutation.
#[derive(Debug, Clone)]
pub struct LedgerReceipt {
    /// Balance right after the mutation.
    pub balance: i64,
    /// ID of the transaction row.
    pub transaction_id: TransactionId,
    /// The transaction row itself.
    pub transaction: CreditTransaction,
}

/// Rows committed together with a ledger transaction.
#[derive(Debug, Default)]
pub(crate) struct Attachments {
    pub order: Option<OrderTransition>,
    pub record: Option<RecordWrite>,
    pub activity: Option<AdminActivity>,
}

/// One page of a listing.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// 1-based page number.
    pub page: usize,
    /// Requested page size.
    pub page_size: usize,
    /// Whether another page follows.
    pub has_more: bool,
}

impl<T> Page<T> {
    /// Normalize a 1-based page request into `(page, page_size, offset)`.
    pub(crate) fn window(page: Option<usize>, page_size: Option<usize>) -> (usize, usize, usize) {
        let page = page.unwrap_or(1).max(1);
        let page_size = page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        (page, page_size, (page - 1) * page_size)
    }

    /// Build a page from a fetch of `page_size + 1` items.
    pub(crate) fn from_overfetch(mut items: Vec<T>, page: usize, page_size: usize) -> Self {
        let has_more = items.len() > page_size;
        items.truncate(page_size);
        Self {
            items,
            page,
            page_size,
            has_more,
        }
    }
}

/// Outcome of replaying an account's transaction history.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerVerification {
    /// The verified account.
    pub user_id: UserId,
    /// Stored balance.
    pub balance: i64,
    /// Sum of every transaction amount.
    pub computed_balance: i64,
    /// Number of transactions replayed.
    pub transaction_count: usize,
    /// Whether the balance and every running snapshot agree.
    pub consistent: bool,
    /// First transaction whose `credit_balance_after` disagrees.
    pub first_inconsistent_sequence: Option<u64>,
}

/// Atomic credit and debit operations over a [`Store`].
#[derive(Clone)]
pub struct CreditLedger {
    store: Arc<dyn Store>,
    max_retries: u32,
}

impl CreditLedger {
    /// Create a ledger with the default retry budget.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Override the number of commit attempts per mutation (at least one).
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    /// Open a zero-balance account.
    pub fn open_account(&self, user_id: UserId) -> Result<Account> {
        let account = Account::new(user_id);
        self.store.create_account(&account)?;
        tracing::info!(user_id = %user_id, "Account opened");
        Ok(account)
    }

    /// Load an account, archived or not.
    pub fn account(&self, user_id: &UserId) -> Result<Account> {
        self.store
            .get_account(user_id)?
            .ok_or_else(|| LedgerError::AccountNotFound {
                user_id: user_id.to_string(),
            })
    }

    /// Current balance.
    pub fn get_balance(&self, user_id: &UserId) -> Result<i64> {
        Ok(self.account(user_id)?.balance)
    }

    /// Soft-archive an account. Archiving twice is a no-op.
    pub fn archive_account(&self, user_id: &UserId) -> Result<Account> {
        for _ in 0..self.max_retries {
            let account = self.account(user_id)?;
            if account.is_archived() {
                return Ok(account);
            }
            let archived = account.archived();
            match self.store.update_account(&archived, account.version) {
                Ok(()) => {
                    tracing::info!(user_id = %user_id, balance = archived.balance, "Account archived");
                    return Ok(archived);
                }
                Err(StoreError::AccountVersionConflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(LedgerError::Conflict {
            user_id: user_id.to_string(),
            attempts: self.max_retries,
        })
    }

    // =========================================================================
    // Balance mutations
    // =========================================================================

    /// Add `amount` credits.
    pub fn credit(
        &self,
        user_id: &UserId,
        amount: i64,
        transaction_type: TransactionType,
        meta: TransactionMeta,
    ) -> Result<LedgerReceipt> {
        self.credit_with(user_id, amount, transaction_type, meta, |_| {
            Attachments::default()
        })
    }

    /// Remove `amount` credits, failing with `InsufficientCredits` and no
    /// mutation when the balance is short.
    pub fn debit(
        &self,
        user_id: &UserId,
        amount: i64,
        transaction_type: TransactionType,
        meta: TransactionMeta,
    ) -> Result<LedgerReceipt> {
        self.debit_with(user_id, amount, transaction_type, meta, |_| {
            Attachments::default()
        })
    }

    pub(crate) fn credit_with<F>(
        &self,
        user_id: &UserId,
        amount: i64,
        transaction_type: TransactionType,
        meta: TransactionMeta,
        attach: F,
    ) -> Result<LedgerReceipt>
    where
        F: FnMut(&CreditTransaction) -> Attachments,
    {
        if !transaction_type.is_credit() {
            return Err(LedgerError::InvalidAmount(format!(
                "{} is not a credit",
                transaction_type.as_str()
            )));
        }
        let delta = positive(amount)?;
        self.apply(user_id, delta, transaction_type, &meta, attach)
    }

    pub(crate) fn debit_with<F>(
        &self,
        user_id: &UserId,
        amount: i64,
        transaction_type: TransactionType,
        meta: TransactionMeta,
        attach: F,
    ) -> Result<LedgerReceipt>
    where
        F: FnMut(&CreditTransaction) -> Attachments,
    {
        if !transaction_type.is_debit() {
            return Err(LedgerError::InvalidAmount(format!(
                "{} is not a debit",
                transaction_type.as_str()
            )));
        }
        let delta = -positive(amount)?;
        self.apply(user_id, delta, transaction_type, &meta, attach)
    }

    fn apply<F>(
        &self,
        user_id: &UserId,
        delta: i64,
        transaction_type: TransactionType,
        meta: &TransactionMeta,
        mut attach: F,
    ) -> Result<LedgerReceipt>
    where
        F: FnMut(&CreditTransaction) -> Attachments,
    {
        for attempt in 1..=self.max_retries {
            let account = self.account(user_id)?;
            let next = account.with_delta(delta, &transaction_type)?;
            let transaction = CreditTransaction::new(
                *user_id,
                next.version,
                transaction_type,
                delta,
                next.balance,
                meta.clone(),
            );
            let attachments = attach(&transaction);

            let write = LedgerWrite {
                account: next,
                expected_version: account.version,
                transaction,
                order: attachments.order,
                record: attachments.record,
                activity: attachments.activity,
            };

            match self.store.commit(&write) {
                Ok(()) => {
                    tracing::info!(
                        user_id = %user_id,
                        transaction_id = %write.transaction.id,
                        transaction_type = transaction_type.as_str(),
                        amount = delta,
                        balance = write.account.balance,
                        "Ledger transaction committed"
                    );
                    return Ok(LedgerReceipt {
                        balance: write.account.balance,
                        transaction_id: write.transaction.id,
                        transaction: write.transaction,
                    });
                }
                Err(StoreError::AccountVersionConflict { .. }) => {
                    tracing::debug!(user_id = %user_id, attempt, "Account version moved, retrying");
                    std::thread::yield_now();
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::warn!(
            user_id = %user_id,
            attempts = self.max_retries,
            "Ledger mutation gave up after repeated conflicts"
        );
        Err(LedgerError::Conflict {
            user_id: user_id.to_string(),
            attempts: self.max_retries,
        })
    }

    // =========================================================================
    // History
    // =========================================================================

    /// A page of the account's transactions, newest first.
    pub fn transactions(
        &self,
        user_id: &UserId,
        page: Option<usize>,
        page_size: Option<usize>,
    ) -> Result<Page<CreditTransaction>> {
        self.account(user_id)?;
        let (page, page_size, offset) = Page::<CreditTransaction>::window(page, page_size);
        let items = self
            .store
            .list_transactions_by_user(user_id, page_size + 1, offset)?;
        Ok(Page::from_overfetch(items, page, page_size))
    }

    /// Replay the account's history and compare it with the stored balance.
    pub fn verify(&self, user_id: &UserId) -> Result<LedgerVerification> {
        let account = self.account(user_id)?;
        let history = self.store.transaction_history(user_id)?;

        let mut running: i64 = 0;
        let mut first_inconsistent_sequence = None;
        for tx in &history {
            running = running.saturating_add(tx.credit_amount);
            if first_inconsistent_sequence.is_none() && tx.credit_balance_after != running {
                first_inconsistent_sequence = Some(tx.sequence);
            }
        }

        let consistent = first_inconsistent_sequence.is_none() && running == account.balance;
        if !consistent {
            tracing::error!(
                user_id = %user_id,
                balance = account.balance,
                computed_balance = running,
                "Ledger verification failed"
            );
        }

        Ok(LedgerVerification {
            user_id: *user_id,
            balance: account.balance,
            computed_balance: running,
            transaction_count: history.len(),
            consistent,
            first_inconsistent_sequence,
        })
    }
}

fn positive(amount: i64) -> Result<i64> {
    if amount > 0 {
        Ok(amount)
    } else {
        Err(LedgerError::InvalidAmount(format!(
            "amount must be positive, got {amount}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use credit_ledger_store::MemoryStore;

    fn ledger() -> CreditLedger {
        CreditLedger::new(Arc::new(MemoryStore::new()))
    }

    fn funded(ledger: &CreditLedger, balance: i64) -> UserId {
        let user_id = UserId::generate();
        ledger.open_account(user_id).unwrap();
        if balance > 0 {
            ledger
                .credit(
                    &user_id,
                    balance,
                    TransactionType::AdminCharge,
                    TransactionMeta::default(),
                )
                .unwrap();
        }
        user_id
    }

    #[test]
    fn credit_then_debit_records_snapshots() {
        let ledger = ledger();
        let user_id = funded(&ledger, 100);

        let receipt = ledger
            .debit(
                &user_id,
                30,
                TransactionType::ServiceUsage,
                TransactionMeta::default().with_service("fortune_saju"),
            )
            .unwrap();
        assert_eq!(receipt.balance, 70);
        assert_eq!(receipt.transaction.credit_amount, -30);
        assert_eq!(receipt.transaction.credit_balance_after, 70);
        assert_eq!(ledger.get_balance(&user_id).unwrap(), 70);
    }

    #[test]
    fn overdraft_fails_without_mutation() {
        let ledger = ledger();
        let user_id = funded(&ledger, 50);

        let err = ledger
            .debit(
                &user_id,
                1_000_000,
                TransactionType::AdminDeduct,
                TransactionMeta::default(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientCredits {
                balance: 50,
                required: 1_000_000
            }
        ));
        assert_eq!(ledger.get_balance(&user_id).unwrap(), 50);
        assert_eq!(ledger.transactions(&user_id, None, None).unwrap().items.len(), 1);
    }

    #[test]
    fn non_positive_amounts_and_wrong_types_are_rejected() {
        let ledger = ledger();
        let user_id = funded(&ledger, 10);

        for amount in [0, -5] {
            let err = ledger
                .credit(&user_id, amount, TransactionType::Refund, TransactionMeta::default())
                .unwrap_err();
            assert!(matches!(err, LedgerError::InvalidAmount(_)));
        }
        let err = ledger
            .credit(&user_id, 5, TransactionType::ServiceUsage, TransactionMeta::default())
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(_)));
    }

    #[test]
    fn unknown_account_is_not_found() {
        let ledger = ledger();
        let err = ledger.get_balance(&UserId::generate()).unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound { .. }));
    }

    #[test]
    fn archived_account_is_readable_but_frozen() {
        let ledger = ledger();
        let user_id = funded(&ledger, 40);

        ledger.archive_account(&user_id).unwrap();
        let again = ledger.archive_account(&user_id).unwrap();
        assert!(again.is_archived());
        assert_eq!(ledger.get_balance(&user_id).unwrap(), 40);

        let err = ledger
            .debit(&user_id, 1, TransactionType::Deduct, TransactionMeta::default())
            .unwrap_err();
        assert!(matches!(err, LedgerError::AccountArchived { .. }));
    }

    #[test]
    fn transactions_are_paged_newest_first() {
        let ledger = ledger();
        let user_id = funded(&ledger, 0);
        for amount in 1..=5 {
            ledger
                .credit(&user_id, amount, TransactionType::AdminCharge, TransactionMeta::default())
                .unwrap();
        }

        let first = ledger.transactions(&user_id, Some(1), Some(2)).unwrap();
        assert!(first.has_more);
        let amounts: Vec<_> = first.items.iter().map(|t| t.credit_amount).collect();
        assert_eq!(amounts, vec![5, 4]);

        let last = ledger.transactions(&user_id, Some(3), Some(2)).unwrap();
        assert!(!last.has_more);
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.items[0].credit_amount, 1);
    }

    #[test]
    fn page_window_clamps() {
        assert_eq!(Page::<()>::window(None, None), (1, DEFAULT_PAGE_SIZE, 0));
        assert_eq!(Page::<()>::window(Some(0), Some(0)), (1, 1, 0));
        assert_eq!(Page::<()>::window(Some(3), Some(1000)), (3, MAX_PAGE_SIZE, 200));
    }

    #[test]
    fn verify_replays_history() {
        let ledger = ledger();
        let user_id = funded(&ledger, 100);
        ledger
            .debit(&user_id, 30, TransactionType::ServiceUsage, TransactionMeta::default())
            .unwrap();
        ledger
            .credit(&user_id, 30, TransactionType::Refund, TransactionMeta::default())
            .unwrap();

        let report = ledger.verify(&user_id).unwrap();
        assert!(report.consistent);
        assert_eq!(report.computed_balance, 100);
        assert_eq!(report.transaction_count, 3);
    }

    #[test]
    fn retries_exhausted_surface_conflict() {
        struct AlwaysMoved(MemoryStore);

        impl Store for AlwaysMoved {
            fn create_account(&self, a: &Account) -> credit_ledger_store::Result<()> {
                self.0.create_account(a)
            }
            fn get_account(&self, u: &UserId) -> credit_ledger_store::Result<Option<Account>> {
                self.0.get_account(u)
            }
            fn update_account(&self, a: &Account, v: u64) -> credit_ledger_store::Result<()> {
                self.0.update_account(a, v)
            }
            fn commit(&self, w: &LedgerWrite) -> credit_ledger_store::Result<()> {
                Err(StoreError::AccountVersionConflict {
                    user_id: w.account.user_id.to_string(),
                })
            }
            fn get_transaction(
                &self,
                id: &TransactionId,
            ) -> credit_ledger_store::Result<Option<CreditTransaction>> {
                self.0.get_transaction(id)
            }
            fn list_transactions_by_user(
                &self,
                u: &UserId,
                limit: usize,
                offset: usize,
            ) -> credit_ledger_store::Result<Vec<CreditTransaction>> {
                self.0.list_transactions_by_user(u, limit, offset)
            }
            fn transaction_history(
                &self,
                u: &UserId,
            ) -> credit_ledger_store::Result<Vec<CreditTransaction>> {
                self.0.transaction_history(u)
            }
            fn insert_order(
                &self,
                o: &credit_ledger_core::PendingOrder,
            ) -> credit_ledger_store::Result<()> {
                self.0.insert_order(o)
            }
            fn get_order(
                &self,
                id: &credit_ledger_core::OrderId,
            ) -> credit_ledger_store::Result<Option<credit_ledger_core::PendingOrder>> {
                self.0.get_order(id)
            }
            fn update_order(
                &self,
                o: &credit_ledger_core::PendingOrder,
                s: credit_ledger_core::OrderStatus,
            ) -> credit_ledger_store::Result<()> {
                self.0.update_order(o, s)
            }
            fn get_idempotency_record(
                &self,
                k: &str,
            ) -> credit_ledger_store::Result<Option<credit_ledger_core::IdempotencyRecord>> {
                self.0.get_idempotency_record(k)
            }
            fn update_idempotency_record(&self, w: &RecordWrite) -> credit_ledger_store::Result<()> {
                self.0.update_idempotency_record(w)
            }
            fn list_held_reservations(
                &self,
                t: chrono::DateTime<chrono::Utc>,
            ) -> credit_ledger_store::Result<Vec<credit_ledger_core::IdempotencyRecord>> {
                self.0.list_held_reservations(t)
            }
            fn append_activity(&self, a: &AdminActivity) -> credit_ledger_store::Result<()> {
                self.0.append_activity(a)
            }
            fn list_activity(
                &self,
                f: &credit_ledger_core::ActivityFilter,
                limit: usize,
                offset: usize,
            ) -> credit_ledger_store::Result<Vec<AdminActivity>> {
                self.0.list_activity(f, limit, offset)
            }
        }

        let store = Arc::new(AlwaysMoved(MemoryStore::new()));
        let user_id = UserId::generate();
        store.create_account(&Account::new(user_id)).unwrap();
        let ledger = CreditLedger::new(store).with_max_retries(3);

        let err = ledger
            .credit(&user_id, 10, TransactionType::AdminCharge, TransactionMeta::default())
            .unwrap_err();
        assert!(matches!(err, LedgerError::Conflict { attempts: 3, .. }));
    }

    #[test]
    fn concurrent_debits_never_overdraw() {
        let ledger = ledger().with_max_retries(1_000);
        let user_id = funded(&ledger, 100);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    ledger.debit(
                        &user_id,
                        30,
                        TransactionType::ServiceUsage,
                        TransactionMeta::default(),
                    )
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        let short = results
            .iter()
            .filter(|r| matches!(r, Err(LedgerError::InsufficientCredits { .. })))
            .count();

        assert_eq!(succeeded, 3);
        assert_eq!(short, 5);
        assert_eq!(ledger.get_balance(&user_id).unwrap(), 10);
        assert!(ledger.verify(&user_id).unwrap().consistent);
    }

    #[test]
    fn different_accounts_commit_in_parallel() {
        let ledger = ledger().with_max_retries(1_000);
        let users: Vec<_> = (0..4).map(|_| funded(&ledger, 0)).collect();

        let handles: Vec<_> = users
            .iter()
            .map(|user_id| {
                let ledger = ledger.clone();
                let user_id = *user_id;
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        ledger
                            .credit(&user_id, 2, TransactionType::AdminCharge, TransactionMeta::default())
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for user_id in &users {
            assert_eq!(ledger.get_balance(user_id).unwrap(), 50);
            assert!(ledger.verify(user_id).unwrap().consistent);
        }
    }
}
