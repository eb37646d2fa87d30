//! Behaviour shared by every `Store` backend, run from each backend's tests.

use chrono::{Duration, Utc};
use credit_ledger_core::{
    Account, ActivityFilter, ActivityStatus, AdminAction, AdminActivity, CreditTransaction,
    IdempotencyRecord, OrderStatus, PackageCatalog, PendingOrder, RecordedOutcome, Reservation,
    TransactionId, TransactionMeta, TransactionType, UserId,
};

use crate::{LedgerWrite, OrderTransition, RecordWrite, Store, StoreError};

fn open(store: &dyn Store) -> Account {
    let account = Account::new(UserId::generate());
    store.create_account(&account).unwrap();
    account
}

fn write(account: &Account, amount: i64, kind: TransactionType) -> LedgerWrite {
    let next = account.with_delta(amount, &kind).unwrap();
    let transaction = CreditTransaction::new(
        next.user_id,
        next.version,
        kind,
        amount,
        next.balance,
        TransactionMeta::default(),
    );
    LedgerWrite {
        account: next,
        expected_version: account.version,
        transaction,
        order: None,
        record: None,
        activity: None,
    }
}

fn held_record(user_id: UserId, key: &str) -> IdempotencyRecord {
    IdempotencyRecord::new(
        IdempotencyRecord::charge_key(&user_id, key),
        user_id,
        RecordedOutcome::Reservation(Reservation::held(
            key.into(),
            "fortune_saju".into(),
            30,
            TransactionId::generate(),
            70,
        )),
    )
}

pub fn account_lifecycle(store: &dyn Store) {
    let account = open(store);

    let dup = store.create_account(&account);
    assert!(matches!(dup, Err(StoreError::AlreadyExists { entity: "account", .. })));

    let archived = account.archived();
    store.update_account(&archived, account.version).unwrap();
    let stored = store.get_account(&account.user_id).unwrap().unwrap();
    assert!(stored.is_archived());
    assert_eq!(stored.version, 1);

    assert!(store.get_account(&UserId::generate()).unwrap().is_none());
}

pub fn commit_writes_every_row(store: &dyn Store) {
    let account = open(store);
    let catalog = PackageCatalog::default();
    let order = PendingOrder::prepare(account.user_id, catalog.find("standard").unwrap());
    store.insert_order(&order).unwrap();

    let mut w = write(&account, order.credits, TransactionType::Charge);
    w.order = Some(OrderTransition {
        order: order.confirmed("pay_1"),
        expected_status: OrderStatus::Prepared,
    });
    w.record = Some(RecordWrite {
        record: held_record(account.user_id, "k1"),
        expected_revision: None,
    });
    w.activity = Some(AdminActivity::new(
        "ops",
        AdminAction::CreditCharge,
        "account",
        account.user_id.to_string(),
        ActivityStatus::Succeeded,
    ));
    store.commit(&w).unwrap();

    let stored = store.get_account(&account.user_id).unwrap().unwrap();
    assert_eq!(stored.balance, 5000);
    assert_eq!(stored.version, 1);
    assert!(store.get_transaction(&w.transaction.id).unwrap().is_some());
    assert_eq!(
        store.get_order(&order.order_id).unwrap().unwrap().status,
        OrderStatus::Confirmed
    );
    let key = IdempotencyRecord::charge_key(&account.user_id, "k1");
    assert!(store.get_idempotency_record(&key).unwrap().is_some());
    assert_eq!(
        store
            .list_activity(&ActivityFilter::default(), 10, 0)
            .unwrap()
            .len(),
        1
    );
}

pub fn stale_version_is_rejected(store: &dyn Store) {
    let account = open(store);
    let first = write(&account, 100, TransactionType::AdminCharge);
    let second = write(&account, 50, TransactionType::AdminCharge);

    store.commit(&first).unwrap();
    let err = store.commit(&second).unwrap_err();
    assert!(matches!(err, StoreError::AccountVersionConflict { .. }));

    let stored = store.get_account(&account.user_id).unwrap().unwrap();
    assert_eq!(stored.balance, 100);
    assert_eq!(store.transaction_history(&account.user_id).unwrap().len(), 1);
}

pub fn rejected_guard_writes_nothing(store: &dyn Store) {
    let account = open(store);
    let catalog = PackageCatalog::default();
    let order = PendingOrder::prepare(account.user_id, catalog.find("basic").unwrap());
    store.insert_order(&order).unwrap();
    store
        .update_order(&order.failed("cancelled"), OrderStatus::Prepared)
        .unwrap();

    let mut w = write(&account, order.credits, TransactionType::Charge);
    w.order = Some(OrderTransition {
        order: order.confirmed("pay_1"),
        expected_status: OrderStatus::Prepared,
    });
    let err = store.commit(&w).unwrap_err();
    assert!(matches!(err, StoreError::GuardRejected { entity: "order", .. }));

    let stored = store.get_account(&account.user_id).unwrap().unwrap();
    assert_eq!(stored.balance, 0);
    assert_eq!(stored.version, 0);
    assert!(store.get_transaction(&w.transaction.id).unwrap().is_none());
    assert!(store.transaction_history(&account.user_id).unwrap().is_empty());
}

pub fn record_revision_guard(store: &dyn Store) {
    let account = open(store);
    let record = held_record(account.user_id, "k1");

    let mut w = write(&account, 10, TransactionType::AdminCharge);
    w.record = Some(RecordWrite {
        record: record.clone(),
        expected_revision: None,
    });
    store.commit(&w).unwrap();

    let again = store.update_idempotency_record(&RecordWrite {
        record: record.clone(),
        expected_revision: None,
    });
    assert!(matches!(again, Err(StoreError::GuardRejected { .. })));

    let reservation = record.reservation().unwrap().committed(serde_json::json!({"ok": true}));
    let revised = record.revised(RecordedOutcome::Reservation(reservation));
    store
        .update_idempotency_record(&RecordWrite {
            record: revised.clone(),
            expected_revision: Some(0),
        })
        .unwrap();

    let stale = store.update_idempotency_record(&RecordWrite {
        record: revised,
        expected_revision: Some(0),
    });
    assert!(matches!(stale, Err(StoreError::GuardRejected { .. })));

    let stored = store.get_idempotency_record(&record.key).unwrap().unwrap();
    assert_eq!(stored.revision, 1);
}

pub fn order_updates_are_guarded(store: &dyn Store) {
    let account = open(store);
    let catalog = PackageCatalog::default();
    let order = PendingOrder::prepare(account.user_id, catalog.find("pro").unwrap());
    store.insert_order(&order).unwrap();
    assert!(matches!(
        store.insert_order(&order),
        Err(StoreError::AlreadyExists { entity: "order", .. })
    ));

    store
        .update_order(&order.failed("declined"), OrderStatus::Prepared)
        .unwrap();
    let err = store
        .update_order(&order.failed("declined"), OrderStatus::Prepared)
        .unwrap_err();
    assert!(matches!(err, StoreError::GuardRejected { .. }));

    let missing = PendingOrder::prepare(account.user_id, catalog.find("pro").unwrap());
    assert!(matches!(
        store.update_order(&missing, OrderStatus::Prepared),
        Err(StoreError::NotFound { entity: "order", .. })
    ));
}

pub fn transactions_list_newest_first(store: &dyn Store) {
    let mut account = open(store);
    for amount in [100, 200, 300] {
        let w = write(&account, amount, TransactionType::AdminCharge);
        store.commit(&w).unwrap();
        account = w.account;
    }

    let page = store
        .list_transactions_by_user(&account.user_id, 2, 0)
        .unwrap();
    let amounts: Vec<_> = page.iter().map(|t| t.credit_amount).collect();
    assert_eq!(amounts, vec![300, 200]);

    let rest = store
        .list_transactions_by_user(&account.user_id, 2, 2)
        .unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].credit_amount, 100);

    let history = store.transaction_history(&account.user_id).unwrap();
    let sequences: Vec<_> = history.iter().map(|t| t.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);

    let other = UserId::generate();
    assert!(store.list_transactions_by_user(&other, 10, 0).unwrap().is_empty());
}

pub fn held_reservations_by_age(store: &dyn Store) {
    let account = open(store);
    let mut stale = held_record(account.user_id, "old");
    stale.updated_at = Utc::now() - Duration::minutes(10);
    store
        .update_idempotency_record(&RecordWrite {
            record: stale.clone(),
            expected_revision: None,
        })
        .unwrap();

    let fresh = held_record(account.user_id, "new");
    store
        .update_idempotency_record(&RecordWrite {
            record: fresh,
            expected_revision: None,
        })
        .unwrap();

    let found = store
        .list_held_reservations(Utc::now() - Duration::minutes(5))
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].key, stale.key);
}

pub fn settled_reservations_leave_the_held_index(store: &dyn Store) {
    let account = open(store);

    let mut funding = write(&account, 100, TransactionType::AdminCharge);
    let open_record = held_record(account.user_id, "open");
    funding.record = Some(RecordWrite {
        record: open_record.clone(),
        expected_revision: None,
    });
    store.commit(&funding).unwrap();

    let committed = held_record(account.user_id, "committed");
    let released = held_record(account.user_id, "released");
    for record in [&committed, &released] {
        store
            .update_idempotency_record(&RecordWrite {
                record: record.clone(),
                expected_revision: None,
            })
            .unwrap();
    }
    let later = Utc::now() + Duration::minutes(1);
    assert_eq!(store.list_held_reservations(later).unwrap().len(), 3);

    let reservation = committed
        .reservation()
        .unwrap()
        .committed(serde_json::json!({"ok": true}));
    store
        .update_idempotency_record(&RecordWrite {
            record: committed.revised(RecordedOutcome::Reservation(reservation)),
            expected_revision: Some(0),
        })
        .unwrap();

    // The refund and the released record land in one ledger write.
    let current = store.get_account(&account.user_id).unwrap().unwrap();
    let mut refund = write(&current, 30, TransactionType::Refund);
    let reservation = released
        .reservation()
        .unwrap()
        .released(refund.transaction.id, "provider down".into());
    refund.record = Some(RecordWrite {
        record: released.revised(RecordedOutcome::Reservation(reservation)),
        expected_revision: Some(0),
    });
    store.commit(&refund).unwrap();

    let held = store.list_held_reservations(later).unwrap();
    assert_eq!(held.len(), 1);
    assert_eq!(held[0].key, open_record.key);
}

pub fn activity_is_filtered_and_paged(store: &dyn Store) {
    let target = UserId::generate().to_string();
    for (admin, action) in [
        ("ops", AdminAction::CreditCharge),
        ("ops", AdminAction::CreditDeduct),
        ("support", AdminAction::CreditCharge),
    ] {
        let entry = AdminActivity::new(admin, action, "account", &target, ActivityStatus::Failed);
        store.append_activity(&entry).unwrap();
    }

    let all = store.list_activity(&ActivityFilter::default(), 10, 0).unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].admin_id, "support");

    let ops = ActivityFilter {
        admin_id: Some("ops".into()),
        ..ActivityFilter::default()
    };
    let page = store.list_activity(&ops, 1, 1).unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].action, AdminAction::CreditCharge);
}

pub fn foreign_rows_are_rejected(store: &dyn Store) {
    let account = open(store);
    let mut w = write(&account, 10, TransactionType::AdminCharge);
    w.record = Some(RecordWrite {
        record: held_record(UserId::generate(), "k"),
        expected_revision: None,
    });
    assert!(matches!(store.commit(&w), Err(StoreError::Database(_))));
    assert_eq!(
        store.get_account(&account.user_id).unwrap().unwrap().version,
        0
    );
}
