//! Paid service charging.
//!
//! A charge is reserve, invoke, then commit or release:
//!
//! 1. The cost is debited and a `held` reservation is recorded under
//!    `charge:{user}:{idempotency_key}` in the same commit.
//! 2. The inference provider is called with a deadline.
//! 3. On success the reservation becomes `committed` and carries the result.
//!    On failure or timeout the cost is refunded and the reservation becomes
//!    `released` in one commit.
//!
//! A repeated request with the same key replays the recorded outcome and
//! never debits again. Step 2 and 3 run in a spawned task so a client that
//! disconnects mid-call cannot leave the reservation unsettled.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use credit_ledger_core::{
    IdempotencyRecord, LedgerError, RecordedOutcome, Reservation, ReservationId,
    ReservationState, Result, ServicePricing, TransactionId, TransactionMeta, TransactionType,
    UserId,
};
use credit_ledger_store::RecordWrite;

use super::settlement::{commit_reservation, release_reservation, SettlementQueue, SettlementTask};
use super::{Attachments, CreditLedger};
use crate::inference::InferenceProvider;

/// Added to twice the inference timeout before a held reservation counts as
/// abandoned.
const RESERVATION_GRACE: Duration = Duration::from_secs(60);

/// A request to run one paid service.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    /// The paying user.
    pub user_id: UserId,
    /// Service to invoke.
    pub service_id: String,
    /// Cost for services without a catalog price. Must match the catalog
    /// price when the service has one.
    pub cost: Option<i64>,
    /// Client-chosen key identifying this logical request.
    pub idempotency_key: String,
    /// Input forwarded to the inference provider.
    pub input: serde_json::Value,
}

/// Result of a successful (or replayed) charge.
#[derive(Debug, Clone, Serialize)]
pub struct ChargeOutcome {
    /// The service result.
    pub result: serde_json::Value,
    /// Balance right after the debit.
    pub balance: i64,
    /// Credits charged.
    pub cost: i64,
    /// The `service_usage` transaction.
    pub transaction_id: TransactionId,
    /// The reservation backing this charge.
    pub reservation_id: ReservationId,
    /// Whether this response replays an earlier request.
    pub replayed: bool,
}

/// Charges users for paid AI service invocations.
#[derive(Clone)]
pub struct ServiceCharger {
    ledger: CreditLedger,
    inference: Option<Arc<dyn InferenceProvider>>,
    pricing: Arc<ServicePricing>,
    timeout: Duration,
    settlement: SettlementQueue,
}

impl ServiceCharger {
    /// Create a charger.
    #[must_use]
    pub fn new(
        ledger: CreditLedger,
        inference: Option<Arc<dyn InferenceProvider>>,
        pricing: ServicePricing,
        timeout: Duration,
        settlement: SettlementQueue,
    ) -> Self {
        Self {
            ledger,
            inference,
            pricing: Arc::new(pricing),
            timeout,
            settlement,
        }
    }

    /// The service price list.
    #[must_use]
    pub fn pricing(&self) -> &ServicePricing {
        &self.pricing
    }

    /// Whether an inference provider is configured.
    #[must_use]
    pub fn has_inference(&self) -> bool {
        self.inference.is_some()
    }

    /// Age after which a `held` reservation is considered abandoned.
    #[must_use]
    pub fn stale_after(&self) -> Duration {
        self.timeout * 2 + RESERVATION_GRACE
    }

    /// The price to charge for `request`.
    ///
    /// Catalog prices are authoritative. An explicit cost is only accepted for
    /// services without a catalog entry, or when it matches the catalog.
    fn resolve_cost(&self, request: &ChargeRequest) -> Result<i64> {
        match (self.pricing.cost_of(&request.service_id), request.cost) {
            (Some(price), None) => Ok(price),
            (Some(price), Some(cost)) if cost == price => Ok(price),
            (Some(price), Some(cost)) => Err(LedgerError::InvalidAmount(format!(
                "service {} costs {price} credits, not {cost}",
                request.service_id
            ))),
            (None, Some(cost)) => Ok(cost),
            (None, None) => Err(LedgerError::UnknownService {
                service_id: request.service_id.clone(),
            }),
        }
    }

    /// Charge for one service invocation.
    pub async fn charge(&self, request: ChargeRequest) -> Result<ChargeOutcome> {
        let store = self.ledger.store();
        let key = IdempotencyRecord::charge_key(&request.user_id, &request.idempotency_key);

        if let Some(record) = store.get_idempotency_record(&key)? {
            tracing::debug!(user_id = %request.user_id, idempotency_key = %request.idempotency_key, "Replaying charge");
            return replay(&record);
        }

        let Some(inference) = self.inference.clone() else {
            return Err(LedgerError::inference("inference provider not configured"));
        };

        let cost = self.resolve_cost(&request)?;

        let meta = TransactionMeta::default()
            .with_idempotency_key(&request.idempotency_key)
            .with_service(&request.service_id);

        let mut held = None;
        let debit = self.ledger.debit_with(
            &request.user_id,
            cost,
            TransactionType::ServiceUsage,
            meta,
            |tx| {
                let reservation = Reservation::held(
                    request.idempotency_key.clone(),
                    request.service_id.clone(),
                    cost,
                    tx.id,
                    tx.credit_balance_after,
                );
                let record = IdempotencyRecord::new(
                    key.clone(),
                    request.user_id,
                    RecordedOutcome::Reservation(reservation),
                );
                held = Some(record.clone());
                Attachments {
                    record: Some(RecordWrite {
                        record,
                        expected_revision: None,
                    }),
                    ..Attachments::default()
                }
            },
        );

        match debit {
            Ok(_) => {}
            Err(LedgerError::GuardRejected { .. }) => {
                // Another request with the same key won the insert.
                let record = store.get_idempotency_record(&key)?.ok_or_else(|| {
                    LedgerError::Storage(format!("idempotency record {key} vanished"))
                })?;
                return replay(&record);
            }
            Err(e) => return Err(e),
        }

        let record = held
            .ok_or_else(|| LedgerError::Storage("reservation record was not built".into()))?;

        let charger = self.clone();
        let input = request.input;
        let settlement =
            tokio::spawn(async move { charger.invoke_and_settle(inference, record, input).await });

        settlement
            .await
            .map_err(|e| LedgerError::Storage(format!("settlement task failed: {e}")))?
    }

    async fn invoke_and_settle(
        self,
        inference: Arc<dyn InferenceProvider>,
        record: IdempotencyRecord,
        input: serde_json::Value,
    ) -> Result<ChargeOutcome> {
        let reservation = record
            .reservation()
            .cloned()
            .ok_or_else(|| {
                LedgerError::Storage(format!("record {} is not a reservation", record.key))
            })?;
        let user_id = record.user_id;

        let call = tokio::time::timeout(
            self.timeout,
            inference.invoke(&reservation.service_id, &input),
        )
        .await;

        let failure = match call {
            Ok(Ok(result)) => {
                let outcome = ChargeOutcome {
                    result: result.clone(),
                    balance: reservation.balance_after,
                    cost: reservation.amount,
                    transaction_id: reservation.debit_transaction_id,
                    reservation_id: reservation.reservation_id,
                    replayed: false,
                };
                if let Err(e) = commit_reservation(self.ledger.store(), &record, result.clone()) {
                    tracing::error!(
                        idempotency_record = %record.key,
                        error = %e,
                        "Failed to commit reservation"
                    );
                    self.settlement
                        .enqueue(SettlementTask::Commit { record, result });
                }
                tracing::info!(
                    user_id = %user_id,
                    service_id = %reservation.service_id,
                    cost = outcome.cost,
                    balance = outcome.balance,
                    "Service charge committed"
                );
                return Ok(outcome);
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!(
                "inference timed out after {}ms",
                self.timeout.as_millis()
            ),
        };

        tracing::warn!(
            idempotency_record = %record.key,
            service_id = %reservation.service_id,
            failure = %failure,
            "Service invocation failed, refunding"
        );

        if let Err(e) = release_reservation(&self.ledger, &record, &failure) {
            tracing::error!(
                idempotency_record = %record.key,
                error = %e,
                "Refund failed; handing over to settlement worker"
            );
            self.settlement.enqueue(SettlementTask::Release {
                record,
                failure: failure.clone(),
            });
        }

        Err(LedgerError::inference(failure))
    }

    /// Release every reservation held longer than [`Self::stale_after`].
    pub fn sweep_stale_reservations(&self) -> Result<usize> {
        self.release_held_older_than(self.stale_after())
    }

    pub(crate) fn release_held_older_than(&self, max_age: Duration) -> Result<usize> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| LedgerError::Configuration(e.to_string()))?;
        let stale = self
            .ledger
            .store()
            .list_held_reservations(chrono::Utc::now() - max_age)?;

        let mut released = 0;
        for record in &stale {
            match release_reservation(&self.ledger, record, "reservation expired before settlement") {
                Ok(Some(_)) => released += 1,
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(
                        idempotency_record = %record.key,
                        error = %e,
                        "Failed to release stale reservation; requires manual reconciliation"
                    );
                }
            }
        }
        Ok(released)
    }
}

fn replay(record: &IdempotencyRecord) -> Result<ChargeOutcome> {
    let reservation = record.reservation().ok_or_else(|| {
        LedgerError::Storage(format!("record {} is not a reservation", record.key))
    })?;

    match reservation.state {
        ReservationState::Committed => Ok(ChargeOutcome {
            result: reservation.result.clone().unwrap_or_default(),
            balance: reservation.balance_after,
            cost: reservation.amount,
            transaction_id: reservation.debit_transaction_id,
            reservation_id: reservation.reservation_id,
            replayed: true,
        }),
        ReservationState::Released => Err(LedgerError::inference(
            reservation
                .failure
                .clone()
                .unwrap_or_else(|| "service invocation failed".to_string()),
        )),
        ReservationState::Held => Err(LedgerError::ChargeInProgress {
            key: reservation.idempotency_key.clone(),
        }),
    }
}
