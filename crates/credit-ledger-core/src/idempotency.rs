//! Idempotency records.
//!
//! One `(key, outcome)` table backs every "already processed, return the
//! recorded result" decision: service charges keep their reservation here and
//! payment confirmations keep the credit they granted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{OrderId, ReservationId, TransactionId, UserId};

/// A processed (or in-flight) request, keyed by its idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Namespaced idempotency key.
    pub key: String,

    /// The user the request acted on.
    pub user_id: UserId,

    /// Compare-and-swap guard, incremented by every update.
    pub revision: u32,

    /// What happened.
    pub outcome: RecordedOutcome,

    /// When the record was created.
    pub created_at: DateTime<Utc>,

    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Key for a service charge. Keys are scoped per user.
    #[must_use]
    pub fn charge_key(user_id: &UserId, client_key: &str) -> String {
        format!("charge:{user_id}:{client_key}")
    }

    /// Key for a payment confirmation.
    #[must_use]
    pub fn order_key(order_id: &OrderId) -> String {
        format!("order:{order_id}")
    }

    /// Create a fresh record at revision zero.
    #[must_use]
    pub fn new(key: String, user_id: UserId, outcome: RecordedOutcome) -> Self {
        let now = Utc::now();
        Self {
            key,
            user_id,
            revision: 0,
            outcome,
            created_at: now,
            updated_at: now,
        }
    }

    /// The next revision of this record with a new outcome.
    #[must_use]
    pub fn revised(&self, outcome: RecordedOutcome) -> Self {
        let mut next = self.clone();
        next.revision += 1;
        next.outcome = outcome;
        next.updated_at = Utc::now();
        next
    }

    /// The reservation, if this record tracks a service charge.
    #[must_use]
    pub fn reservation(&self) -> Option<&Reservation> {
        match &self.outcome {
            RecordedOutcome::Reservation(reservation) => Some(reservation),
            RecordedOutcome::OrderConfirmation(_) => None,
        }
    }
}

/// The recorded result of a processed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RecordedOutcome {
    /// A service charge and its settlement state.
    Reservation(Reservation),

    /// A confirmed purchase.
    OrderConfirmation(OrderConfirmationRecord),
}

/// Provisional hold on credits while a paid service runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation ID.
    pub reservation_id: ReservationId,

    /// Client-supplied idempotency key, recorded on both the debit and the
    /// refund.
    pub idempotency_key: String,

    /// Charged service.
    pub service_id: String,

    /// Credits debited.
    pub amount: i64,

    /// Settlement state.
    pub state: ReservationState,

    /// The `service_usage` transaction.
    pub debit_transaction_id: TransactionId,

    /// The compensating `refund` transaction, once released.
    pub refund_transaction_id: Option<TransactionId>,

    /// Balance right after the debit.
    pub balance_after: i64,

    /// Service result, once committed.
    pub result: Option<serde_json::Value>,

    /// Failure description, once released.
    pub failure: Option<String>,
}

impl Reservation {
    /// A freshly held reservation.
    #[must_use]
    pub fn held(
        idempotency_key: String,
        service_id: String,
        amount: i64,
        debit_transaction_id: TransactionId,
        balance_after: i64,
    ) -> Self {
        Self {
            reservation_id: ReservationId::generate(),
            idempotency_key,
            service_id,
            amount,
            state: ReservationState::Held,
            debit_transaction_id,
            refund_transaction_id: None,
            balance_after,
            result: None,
            failure: None,
        }
    }

    /// The committed form, carrying the service result.
    #[must_use]
    pub fn committed(&self, result: serde_json::Value) -> Self {
        let mut next = self.clone();
        next.state = ReservationState::Committed;
        next.result = Some(result);
        next
    }

    /// The released form, carrying the refund and the failure.
    #[must_use]
    pub fn released(&self, refund_transaction_id: TransactionId, failure: String) -> Self {
        let mut next = self.clone();
        next.state = ReservationState::Released;
        next.refund_transaction_id = Some(refund_transaction_id);
        next.failure = Some(failure);
        next
    }
}

/// Settlement state of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationState {
    /// Debited; the service call has not finished.
    Held,
    /// The service succeeded; the charge stands.
    Committed,
    /// The service failed; the debit was refunded.
    Released,
}

/// Outcome of a confirmed purchase order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfirmationRecord {
    /// Confirmed order.
    pub order_id: OrderId,

    /// Credits granted.
    pub credits_granted: i64,

    /// Balance right after the credit.
    pub balance_after: i64,

    /// The `charge` transaction.
    pub transaction_id: TransactionId,

    /// Payment method reported by the gateway.
    pub payment_method: Option<String>,
}
