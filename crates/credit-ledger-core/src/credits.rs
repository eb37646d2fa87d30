//! Credit transaction types.
//!
//! Every balance change creates exactly one immutable transaction row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{OrderId, TransactionId, UserId};

/// A ledger transaction representing one balance change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditTransaction {
    /// Unique transaction ID.
    pub id: TransactionId,

    /// The user whose balance was affected.
    pub user_id: UserId,

    /// Position of this transaction in the account's commit order.
    ///
    /// Equal to the account version produced by the write.
    pub sequence: u64,

    /// Type of transaction.
    pub transaction_type: TransactionType,

    /// Signed amount. Positive = credit, negative = debit.
    pub credit_amount: i64,

    /// Balance snapshot right after this transaction.
    pub credit_balance_after: i64,

    /// Payment method reported by the gateway (purchases only).
    pub payment_method: Option<String>,

    /// Money actually paid, in minor currency units (purchases only).
    pub actual_amount: Option<i64>,

    /// Free-form reason (admin actions, refunds).
    pub reason: Option<String>,

    /// Idempotency key of the request that produced this row.
    pub idempotency_key: Option<String>,

    /// Paid service that was charged (service usage and its refund).
    pub service_id: Option<String>,

    /// Purchase order that produced this row.
    pub order_id: Option<OrderId>,

    /// When the transaction was created.
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    /// Build a transaction row for a mutation that has already been validated.
    #[must_use]
    pub fn new(
        user_id: UserId,
        sequence: u64,
        transaction_type: TransactionType,
        credit_amount: i64,
        credit_balance_after: i64,
        meta: TransactionMeta,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            user_id,
            sequence,
            transaction_type,
            credit_amount,
            credit_balance_after,
            payment_method: meta.payment_method,
            actual_amount: meta.actual_amount,
            reason: meta.reason,
            idempotency_key: meta.idempotency_key,
            service_id: meta.service_id,
            order_id: meta.order_id,
            created_at: Utc::now(),
        }
    }
}

/// Caller-supplied metadata recorded on a transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMeta {
    /// Payment method reported by the gateway.
    pub payment_method: Option<String>,
    /// Money actually paid.
    pub actual_amount: Option<i64>,
    /// Reason for the change.
    pub reason: Option<String>,
    /// Idempotency key of the originating request.
    pub idempotency_key: Option<String>,
    /// Charged service.
    pub service_id: Option<String>,
    /// Originating purchase order.
    pub order_id: Option<OrderId>,
}

impl TransactionMeta {
    /// Set the reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Set the idempotency key.
    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Set the charged service.
    #[must_use]
    pub fn with_service(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = Some(service_id.into());
        self
    }

    /// Set the purchase details.
    #[must_use]
    pub fn with_payment(
        mut self,
        order_id: OrderId,
        payment_method: Option<String>,
        actual_amount: i64,
    ) -> Self {
        self.order_id = Some(order_id);
        self.payment_method = payment_method;
        self.actual_amount = Some(actual_amount);
        self
    }
}

/// Type of ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Credits bought through the payment gateway.
    Charge,

    /// Generic deduction.
    Deduct,

    /// Credits spent on one paid AI service invocation.
    ServiceUsage,

    /// Compensation for a failed service invocation.
    Refund,

    /// Manual credit by an administrator.
    AdminCharge,

    /// Manual deduction by an administrator.
    AdminDeduct,
}

impl TransactionType {
    /// Check if this transaction type adds credits.
    #[must_use]
    pub const fn is_credit(&self) -> bool {
        matches!(self, Self::Charge | Self::Refund | Self::AdminCharge)
    }

    /// Check if this transaction type removes credits.
    #[must_use]
    pub const fn is_debit(&self) -> bool {
        matches!(self, Self::Deduct | Self::ServiceUsage | Self::AdminDeduct)
    }

    /// Whether credits of this type count as newly granted.
    #[must_use]
    pub const fn counts_toward_lifetime(&self) -> bool {
        matches!(self, Self::Charge | Self::AdminCharge)
    }

    /// The wire name of this type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Charge => "charge",
            Self::Deduct => "deduct",
            Self::ServiceUsage => "service_usage",
            Self::Refund => "refund",
            Self::AdminCharge => "admin_charge",
            Self::AdminDeduct => "admin_deduct",
        }
    }
}
