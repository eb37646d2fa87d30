//! Purchase orders and payment reconciliation.
//!
//! An order is prepared before checkout and confirmed when the gateway
//! reports the payment, either through the client redirect or a webhook.
//! Both paths may arrive, and either may arrive more than once; the credit is
//! granted in the same commit that moves the order from `prepared` to
//! `confirmed`, so an order yields at most one `charge` transaction.

use std::sync::Arc;

use serde::Serialize;

use credit_ledger_core::{
    IdempotencyRecord, LedgerError, OrderConfirmationRecord, OrderId, OrderStatus,
    PackageCatalog, PendingOrder, RecordedOutcome, Result, TransactionId, TransactionMeta,
    TransactionType, UserId,
};
use credit_ledger_store::{OrderTransition, RecordWrite, StoreError};

use super::{Attachments, CreditLedger};
use crate::gateway::PaymentGateway;

/// Failure reason recorded when the paid amount differs from the order.
pub const AMOUNT_MISMATCH_REASON: &str = "amount mismatch";

/// Where a confirmation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationSource {
    /// The user's browser returned from checkout with a payment key. The
    /// payment still has to be confirmed with the gateway.
    ClientRedirect,
    /// The gateway notified us that the payment is settled.
    Webhook,
}

/// A payment confirmation for an order.
#[derive(Debug, Clone)]
pub struct ConfirmOrder {
    /// The order being paid.
    pub order_id: OrderId,
    /// Gateway payment key.
    pub gateway_payment_id: String,
    /// Amount paid.
    pub amount: i64,
    /// Payment method, if known.
    pub payment_method: Option<String>,
    /// Origin of the confirmation.
    pub source: ConfirmationSource,
}

/// Outcome of confirming an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderConfirmation {
    /// The confirmed order.
    pub order_id: OrderId,
    /// Credits granted by the purchase.
    pub credits_granted: i64,
    /// Balance right after the grant.
    pub balance: i64,
    /// The `charge` transaction.
    pub transaction_id: TransactionId,
    /// Whether this response replays an earlier confirmation.
    pub replayed: bool,
}

impl OrderConfirmation {
    fn replayed(record: &OrderConfirmationRecord) -> Self {
        Self {
            order_id: record.order_id,
            credits_granted: record.credits_granted,
            balance: record.balance_after,
            transaction_id: record.transaction_id,
            replayed: true,
        }
    }
}

/// Converts purchases into exactly one ledger credit each.
#[derive(Clone)]
pub struct PaymentReconciler {
    ledger: CreditLedger,
    catalog: Arc<PackageCatalog>,
    gateway: Option<Arc<dyn PaymentGateway>>,
}

impl PaymentReconciler {
    /// Create a reconciler.
    #[must_use]
    pub fn new(
        ledger: CreditLedger,
        catalog: PackageCatalog,
        gateway: Option<Arc<dyn PaymentGateway>>,
    ) -> Self {
        Self {
            ledger,
            catalog: Arc::new(catalog),
            gateway,
        }
    }

    /// Packages on sale.
    #[must_use]
    pub fn catalog(&self) -> &PackageCatalog {
        &self.catalog
    }

    /// Whether a payment gateway is configured.
    #[must_use]
    pub fn has_gateway(&self) -> bool {
        self.gateway.is_some()
    }

    /// Create a `prepared` order for a package.
    pub fn prepare_order(&self, user_id: &UserId, package_id: &str) -> Result<PendingOrder> {
        let package = self
            .catalog
            .find(package_id)
            .ok_or_else(|| LedgerError::InvalidPackage {
                package_id: package_id.to_string(),
            })?;

        let account = self.ledger.account(user_id)?;
        if account.is_archived() {
            return Err(LedgerError::AccountArchived {
                user_id: user_id.to_string(),
            });
        }

        let order = PendingOrder::prepare(*user_id, package);
        self.ledger.store().insert_order(&order)?;

        tracing::info!(
            user_id = %user_id,
            order_id = %order.order_id,
            package_id = %order.package_id,
            expected_amount = order.expected_amount,
            credits = order.credits,
            "Order prepared"
        );
        Ok(order)
    }

    /// Load an order.
    pub fn get_order(&self, order_id: &OrderId) -> Result<PendingOrder> {
        self.ledger
            .store()
            .get_order(order_id)?
            .ok_or_else(|| LedgerError::UnknownOrder {
                order_id: order_id.to_string(),
            })
    }

    /// Confirm a payment and grant the order's credits exactly once.
    pub async fn confirm_order(&self, request: ConfirmOrder) -> Result<OrderConfirmation> {
        let order = self.get_order(&request.order_id)?;

        if request.amount != order.expected_amount {
            return Err(self.reject_amount(&order, request.amount));
        }

        match order.status {
            OrderStatus::Confirmed => return self.replay(&order),
            OrderStatus::Failed => return Err(invalid_state(&order)),
            OrderStatus::Prepared => {}
        }

        let (payment_key, payment_method) = match (&self.gateway, request.source) {
            (Some(gateway), ConfirmationSource::ClientRedirect) => {
                let confirmation = gateway
                    .confirm_payment(
                        &order.order_id,
                        &request.gateway_payment_id,
                        order.expected_amount,
                    )
                    .await
                    .map_err(|e| {
                        tracing::warn!(
                            order_id = %order.order_id,
                            error = %e,
                            "Gateway confirmation failed; order stays prepared"
                        );
                        LedgerError::gateway(e.to_string())
                    })?;

                if confirmation.approved_amount != order.expected_amount {
                    return Err(self.reject_amount(&order, confirmation.approved_amount));
                }
                (
                    confirmation.payment_key,
                    confirmation.method.or(request.payment_method),
                )
            }
            (None, ConfirmationSource::ClientRedirect) => {
                tracing::warn!(
                    order_id = %order.order_id,
                    "Client redirect cannot be verified without a payment gateway; order stays prepared"
                );
                return Err(LedgerError::gateway("payment gateway not configured"));
            }
            // Signed gateway notifications are verified by the webhook handler.
            (_, ConfirmationSource::Webhook) => (request.gateway_payment_id, request.payment_method),
        };

        self.grant(&order, &payment_key, payment_method)
    }

    fn grant(
        &self,
        order: &PendingOrder,
        payment_key: &str,
        payment_method: Option<String>,
    ) -> Result<OrderConfirmation> {
        let confirmed = order.confirmed(payment_key);
        let meta = TransactionMeta::default().with_payment(
            order.order_id,
            payment_method.clone(),
            order.expected_amount,
        );

        let result = self.ledger.credit_with(
            &order.user_id,
            order.credits,
            TransactionType::Charge,
            meta,
            |tx| {
                let record = IdempotencyRecord::new(
                    IdempotencyRecord::order_key(&order.order_id),
                    order.user_id,
                    RecordedOutcome::OrderConfirmation(OrderConfirmationRecord {
                        order_id: order.order_id,
                        credits_granted: order.credits,
                        balance_after: tx.credit_balance_after,
                        transaction_id: tx.id,
                        payment_method: payment_method.clone(),
                    }),
                );
                Attachments {
                    order: Some(OrderTransition {
                        order: confirmed.clone(),
                        expected_status: OrderStatus::Prepared,
                    }),
                    record: Some(RecordWrite {
                        record,
                        expected_revision: None,
                    }),
                    activity: None,
                }
            },
        );

        match result {
            Ok(receipt) => {
                tracing::info!(
                    user_id = %order.user_id,
                    order_id = %order.order_id,
                    transaction_id = %receipt.transaction_id,
                    credits = order.credits,
                    balance = receipt.balance,
                    "Order confirmed and credits granted"
                );
                Ok(OrderConfirmation {
                    order_id: order.order_id,
                    credits_granted: order.credits,
                    balance: receipt.balance,
                    transaction_id: receipt.transaction_id,
                    replayed: false,
                })
            }
            Err(LedgerError::GuardRejected { .. }) => {
                // A concurrent confirmation or failure won the transition.
                let current = self.get_order(&order.order_id)?;
                match current.status {
                    OrderStatus::Confirmed => self.replay(&current),
                    _ => Err(invalid_state(&current)),
                }
            }
            Err(e @ (LedgerError::AccountArchived { .. } | LedgerError::AccountNotFound { .. })) => {
                tracing::error!(
                    user_id = %order.user_id,
                    order_id = %order.order_id,
                    error = %e,
                    "Payment captured for an unusable account; requires manual reconciliation"
                );
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn replay(&self, order: &PendingOrder) -> Result<OrderConfirmation> {
        let key = IdempotencyRecord::order_key(&order.order_id);
        let record = self
            .ledger
            .store()
            .get_idempotency_record(&key)?
            .ok_or_else(|| LedgerError::Storage(format!("confirmed order {key} has no record")))?;

        match &record.outcome {
            RecordedOutcome::OrderConfirmation(confirmation) => {
                tracing::debug!(order_id = %order.order_id, "Replaying order confirmation");
                Ok(OrderConfirmation::replayed(confirmation))
            }
            RecordedOutcome::Reservation(_) => Err(LedgerError::Storage(format!(
                "record {key} does not hold an order confirmation"
            ))),
        }
    }

    /// Fail a prepared order with an amount mismatch and build the error.
    fn reject_amount(&self, order: &PendingOrder, actual: i64) -> LedgerError {
        tracing::warn!(
            order_id = %order.order_id,
            expected = order.expected_amount,
            actual,
            "Payment amount does not match order"
        );

        if order.status == OrderStatus::Prepared {
            let failed = order.failed(AMOUNT_MISMATCH_REASON);
            match self
                .ledger
                .store()
                .update_order(&failed, OrderStatus::Prepared)
            {
                Ok(()) | Err(StoreError::GuardRejected { .. }) => {}
                Err(e) => {
                    tracing::error!(order_id = %order.order_id, error = %e, "Failed to mark order failed");
                }
            }
        }

        LedgerError::AmountMismatch {
            expected: order.expected_amount,
            actual,
        }
    }

    /// Move a prepared order to `failed`. Failing a failed order is a no-op.
    pub fn fail_order(&self, order_id: &OrderId, reason: &str) -> Result<PendingOrder> {
        let order = self.get_order(order_id)?;
        match order.status {
            OrderStatus::Failed => return Ok(order),
            OrderStatus::Confirmed => return Err(invalid_state(&order)),
            OrderStatus::Prepared => {}
        }

        let failed = order.failed(reason);
        match self
            .ledger
            .store()
            .update_order(&failed, OrderStatus::Prepared)
        {
            Ok(()) => {
                tracing::info!(order_id = %order_id, reason = %reason, "Order failed");
                Ok(failed)
            }
            Err(StoreError::GuardRejected { .. }) => {
                let current = self.get_order(order_id)?;
                match current.status {
                    OrderStatus::Failed => Ok(current),
                    _ => Err(invalid_state(&current)),
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn invalid_state(order: &PendingOrder) -> LedgerError {
    LedgerError::InvalidOrderState {
        order_id: order.order_id.to_string(),
        status: order.status.as_str().to_string(),
    }
}
