//! Settlement of service-charge reservations.
//!
//! A held reservation is settled exactly once: committed when the inference
//! call succeeded, released (refunded) when it failed. Both transitions are
//! guarded by the record's revision, so a second settlement attempt for the
//! same key is rejected by the store instead of refunding twice.
//!
//! Settlements that hit a storage failure on the request path are handed to
//! the [`SettlementWorker`], which retries them with exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use credit_ledger_core::{
    IdempotencyRecord, LedgerError, RecordedOutcome, Reservation, Result, TransactionMeta,
    TransactionType,
};
use credit_ledger_store::{RecordWrite, Store};

use super::{Attachments, CreditLedger, LedgerReceipt};

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of attempts per queued settlement.
const SETTLEMENT_MAX_RETRIES: u32 = 8;

/// Initial backoff duration for retries (doubles with each attempt).
const SETTLEMENT_INITIAL_BACKOFF_MS: u64 = 200;

/// Maximum backoff duration for retries.
const SETTLEMENT_MAX_BACKOFF_MS: u64 = 30_000;

/// A settlement that could not be written on the request path.
#[derive(Debug, Clone)]
pub enum SettlementTask {
    /// Mark the reservation committed with the service result.
    Commit {
        /// The held record.
        record: IdempotencyRecord,
        /// Result returned by the inference provider.
        result: serde_json::Value,
    },
    /// Refund the reservation.
    Release {
        /// The held record.
        record: IdempotencyRecord,
        /// Why the invocation failed.
        failure: String,
    },
}

impl SettlementTask {
    fn key(&self) -> &str {
        match self {
            Self::Commit { record, .. } | Self::Release { record, .. } => &record.key,
        }
    }
}

/// Sending half of the settlement worker's queue.
#[derive(Debug, Clone)]
pub struct SettlementQueue {
    tx: mpsc::UnboundedSender<SettlementTask>,
}

impl SettlementQueue {
    /// Create a queue and the receiver its worker consumes.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SettlementTask>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a settlement for background retry.
    pub fn enqueue(&self, task: SettlementTask) {
        let key = task.key().to_string();
        if self.tx.send(task).is_err() {
            tracing::error!(
                idempotency_record = %key,
                "Settlement worker is not running; reservation requires manual reconciliation"
            );
        } else {
            tracing::warn!(idempotency_record = %key, "Settlement queued for retry");
        }
    }
}

/// Background task that retries queued settlements.
pub struct SettlementWorker {
    ledger: CreditLedger,
    rx: mpsc::UnboundedReceiver<SettlementTask>,
}

impl SettlementWorker {
    /// Create a worker over the receiving half of a [`SettlementQueue`].
    #[must_use]
    pub fn new(ledger: CreditLedger, rx: mpsc::UnboundedReceiver<SettlementTask>) -> Self {
        Self { ledger, rx }
    }

    /// Process tasks until every queue sender is dropped.
    pub async fn run(mut self) {
        tracing::info!("Settlement worker started");
        while let Some(task) = self.rx.recv().await {
            self.settle_with_retry(&task).await;
        }
        tracing::info!("Settlement worker stopped");
    }

    async fn settle_with_retry(&self, task: &SettlementTask) {
        let mut attempt = 0;
        let mut backoff_ms = SETTLEMENT_INITIAL_BACKOFF_MS;

        loop {
            match settle(&self.ledger, task) {
                Ok(()) => {
                    tracing::info!(
                        idempotency_record = %task.key(),
                        attempts = attempt + 1,
                        "Queued settlement applied"
                    );
                    return;
                }
                Err(e) => {
                    attempt += 1;

                    if !is_transient(&e) || attempt >= SETTLEMENT_MAX_RETRIES {
                        tracing::error!(
                            idempotency_record = %task.key(),
                            attempt = %attempt,
                            error = %e,
                            "Settlement failed; reservation requires manual reconciliation"
                        );
                        return;
                    }

                    tracing::warn!(
                        idempotency_record = %task.key(),
                        attempt = %attempt,
                        backoff_ms = %backoff_ms,
                        error = %e,
                        "Settlement failed, retrying"
                    );

                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;

                    // Exponential backoff with cap
                    backoff_ms = (backoff_ms * 2).min(SETTLEMENT_MAX_BACKOFF_MS);
                }
            }
        }
    }
}

fn is_transient(err: &LedgerError) -> bool {
    matches!(err, LedgerError::Storage(_) | LedgerError::Conflict { .. })
}

fn settle(ledger: &CreditLedger, task: &SettlementTask) -> Result<()> {
    match task {
        SettlementTask::Commit { record, result } => {
            commit_reservation(ledger.store(), record, result.clone())
        }
        SettlementTask::Release { record, failure } => {
            release_reservation(ledger, record, failure).map(|_| ())
        }
    }
}

fn held_reservation(record: &IdempotencyRecord) -> Result<&Reservation> {
    record.reservation().ok_or_else(|| {
        LedgerError::Storage(format!("record {} does not hold a reservation", record.key))
    })
}

/// Mark a held reservation committed.
///
/// A record that has already moved past `held` is left alone.
pub(crate) fn commit_reservation(
    store: &Arc<dyn Store>,
    record: &IdempotencyRecord,
    result: serde_json::Value,
) -> Result<()> {
    let reservation = held_reservation(record)?.committed(result);
    let write = RecordWrite {
        record: record.revised(RecordedOutcome::Reservation(reservation)),
        expected_revision: Some(record.revision),
    };

    match store.update_idempotency_record(&write).map_err(LedgerError::from) {
        Ok(()) => {
            tracing::debug!(idempotency_record = %record.key, "Reservation committed");
            Ok(())
        }
        Err(LedgerError::GuardRejected { .. }) => {
            tracing::warn!(
                idempotency_record = %record.key,
                "Reservation was settled elsewhere before commit"
            );
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Refund a held reservation and mark it released in the same commit.
///
/// Returns `None` when the reservation had already been settled, in which
/// case no refund is written.
pub(crate) fn release_reservation(
    ledger: &CreditLedger,
    record: &IdempotencyRecord,
    failure: &str,
) -> Result<Option<LedgerReceipt>> {
    let reservation = held_reservation(record)?;
    let meta = TransactionMeta::default()
        .with_idempotency_key(&reservation.idempotency_key)
        .with_service(&reservation.service_id)
        .with_reason(format!("refund: {failure}"));

    let result = ledger.credit_with(
        &record.user_id,
        reservation.amount,
        TransactionType::Refund,
        meta,
        |tx| {
            let released = reservation.released(tx.id, failure.to_string());
            Attachments {
                record: Some(RecordWrite {
                    record: record.revised(RecordedOutcome::Reservation(released)),
                    expected_revision: Some(record.revision),
                }),
                ..Attachments::default()
            }
        },
    );

    match result {
        Ok(receipt) => {
            tracing::info!(
                user_id = %record.user_id,
                idempotency_key = %reservation.idempotency_key,
                transaction_id = %receipt.transaction_id,
                amount = reservation.amount,
                balance = receipt.balance,
                "Reservation released and refunded"
            );
            Ok(Some(receipt))
        }
        Err(LedgerError::GuardRejected { .. }) => {
            tracing::warn!(
                idempotency_record = %record.key,
                "Reservation was settled elsewhere; refund skipped"
            );
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Periodically release reservations left `held` by a crash.
pub fn spawn_reservation_sweeper(
    charger: super::ServiceCharger,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match charger.sweep_stale_reservations() {
                Ok(0) => {}
                Ok(released) => {
                    tracing::warn!(released, "Released stale reservations");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Stale reservation sweep failed");
                }
            }
        }
    })
}
