//! Purchase orders in flight between the platform and the payment gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CreditPackage, OrderId, UserId};

/// A purchase waiting for (or resolved by) a gateway confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOrder {
    /// Client-visible order ID, handed to the gateway.
    pub order_id: OrderId,

    /// The purchasing user.
    pub user_id: UserId,

    /// Purchased package.
    pub package_id: String,

    /// Amount the gateway must report, in minor currency units.
    pub expected_amount: i64,

    /// Credits granted on confirmation, captured when the order was prepared.
    pub credits: i64,

    /// Current status.
    pub status: OrderStatus,

    /// Gateway payment identifier, set on confirmation.
    pub gateway_payment_id: Option<String>,

    /// Why the order failed, if it did.
    pub failure_reason: Option<String>,

    /// When the order was prepared.
    pub created_at: DateTime<Utc>,

    /// When the status last changed.
    pub updated_at: DateTime<Utc>,
}

impl PendingOrder {
    /// Prepare a new order for a package.
    #[must_use]
    pub fn prepare(user_id: UserId, package: &CreditPackage) -> Self {
        let now = Utc::now();
        Self {
            order_id: OrderId::generate(),
            user_id,
            package_id: package.id.clone(),
            expected_amount: package.price,
            credits: package.credits,
            status: OrderStatus::Prepared,
            gateway_payment_id: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The confirmed form of this order.
    #[must_use]
    pub fn confirmed(&self, gateway_payment_id: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.status = OrderStatus::Confirmed;
        next.gateway_payment_id = Some(gateway_payment_id.into());
        next.updated_at = Utc::now();
        next
    }

    /// The failed form of this order.
    #[must_use]
    pub fn failed(&self, reason: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.status = OrderStatus::Failed;
        next.failure_reason = Some(reason.into());
        next.updated_at = Utc::now();
        next
    }
}

/// Lifecycle of a purchase order: `prepared → confirmed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Waiting for the gateway.
    Prepared,
    /// Paid and credited.
    Confirmed,
    /// Payment failed or was abandoned.
    Failed,
}

impl OrderStatus {
    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed)
    }

    /// The wire name of this status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Prepared => "prepared",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PackageCatalog;

    #[test]
    fn prepared_order_captures_package_terms() {
        let catalog = PackageCatalog::default();
        let package = catalog.find("standard").unwrap();
        let order = PendingOrder::prepare(UserId::generate(), package);

        assert_eq!(order.status, OrderStatus::Prepared);
        assert_eq!(order.expected_amount, 10_000);
        assert_eq!(order.credits, 5_000);
        assert!(!order.status.is_terminal());
    }

    #[test]
    fn transitions_keep_identity() {
        let catalog = PackageCatalog::default();
        let order = PendingOrder::prepare(UserId::generate(), catalog.find("basic").unwrap());

        let confirmed = order.confirmed("pay_123");
        assert_eq!(confirmed.order_id, order.order_id);
        assert_eq!(confirmed.status, OrderStatus::Confirmed);
        assert_eq!(confirmed.gateway_payment_id.as_deref(), Some("pay_123"));

        let failed = order.failed("user cancelled");
        assert_eq!(failed.status, OrderStatus::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some("user cancelled"));
        assert!(failed.status.is_terminal());
    }
}
