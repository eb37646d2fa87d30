//! Admin credit adjustments and the activity log.
//!
//! A successful adjustment writes its activity row in the same commit as the
//! ledger transaction. A rejected adjustment leaves the ledger untouched and
//! appends a `failed` activity row describing the attempt.

use serde::Serialize;
use serde_json::json;

use credit_ledger_core::{
    ActivityFilter, ActivityId, ActivityStatus, AdminAction, AdminActivity, LedgerError, Result,
    TransactionId, TransactionMeta, TransactionType, UserId,
};

use super::{Attachments, CreditLedger, Page};

/// Activity target type for account adjustments.
const TARGET_ACCOUNT: &str = "account";

/// Who performed an admin action.
#[derive(Debug, Clone)]
pub struct AdminContext {
    /// Admin identifier from the identity subsystem.
    pub admin_id: String,
    /// Client address, if known.
    pub ip_address: Option<String>,
}

/// Result of a successful adjustment.
#[derive(Debug, Clone, Serialize)]
pub struct AdminAdjustment {
    /// Balance right after the adjustment.
    pub balance: i64,
    /// The ledger transaction.
    pub transaction_id: TransactionId,
    /// The activity row describing it.
    pub activity_id: ActivityId,
}

/// Manual credit adjustments with an audit trail.
#[derive(Clone)]
pub struct AdminLedger {
    ledger: CreditLedger,
}

impl AdminLedger {
    /// Create an admin ledger.
    #[must_use]
    pub fn new(ledger: CreditLedger) -> Self {
        Self { ledger }
    }

    /// Grant credits to a user.
    pub fn admin_charge(
        &self,
        ctx: &AdminContext,
        user_id: &UserId,
        amount: i64,
        reason: &str,
    ) -> Result<AdminAdjustment> {
        self.adjust(ctx, AdminAction::CreditCharge, user_id, amount, reason)
    }

    /// Remove credits from a user.
    pub fn admin_deduct(
        &self,
        ctx: &AdminContext,
        user_id: &UserId,
        amount: i64,
        reason: &str,
    ) -> Result<AdminAdjustment> {
        self.adjust(ctx, AdminAction::CreditDeduct, user_id, amount, reason)
    }

    /// A page of the activity log, newest first.
    pub fn activity_log(
        &self,
        filter: &ActivityFilter,
        page: Option<usize>,
        page_size: Option<usize>,
    ) -> Result<Page<AdminActivity>> {
        let (page, page_size, offset) = Page::<AdminActivity>::window(page, page_size);
        let items = self
            .ledger
            .store()
            .list_activity(filter, page_size + 1, offset)?;
        Ok(Page::from_overfetch(items, page, page_size))
    }

    fn adjust(
        &self,
        ctx: &AdminContext,
        action: AdminAction,
        user_id: &UserId,
        amount: i64,
        reason: &str,
    ) -> Result<AdminAdjustment> {
        let meta = TransactionMeta::default().with_reason(reason);
        let mut activity_id = None;

        let attach = |tx: &credit_ledger_core::CreditTransaction| {
            let activity = AdminActivity::new(
                &ctx.admin_id,
                action,
                TARGET_ACCOUNT,
                user_id.to_string(),
                ActivityStatus::Succeeded,
            )
            .with_details(json!({
                "amount": amount,
                "reason": reason,
                "transaction_id": tx.id.to_string(),
                "balance_after": tx.credit_balance_after,
            }))
            .with_ip_address(ctx.ip_address.clone());
            activity_id = Some(activity.id);
            Attachments {
                activity: Some(activity),
                ..Attachments::default()
            }
        };

        let result = match action {
            AdminAction::CreditCharge => {
                self.ledger
                    .credit_with(user_id, amount, TransactionType::AdminCharge, meta, attach)
            }
            AdminAction::CreditDeduct => {
                self.ledger
                    .debit_with(user_id, amount, TransactionType::AdminDeduct, meta, attach)
            }
        };

        match result {
            Ok(receipt) => {
                let activity_id = activity_id.ok_or_else(|| {
                    LedgerError::Storage("activity row was not built".into())
                })?;
                tracing::info!(
                    admin_id = %ctx.admin_id,
                    user_id = %user_id,
                    action = ?action,
                    amount,
                    transaction_id = %receipt.transaction_id,
                    balance = receipt.balance,
                    "Admin adjustment applied"
                );
                Ok(AdminAdjustment {
                    balance: receipt.balance,
                    transaction_id: receipt.transaction_id,
                    activity_id,
                })
            }
            Err(e) => {
                self.record_failure(ctx, action, user_id, amount, reason, &e);
                Err(e)
            }
        }
    }

    fn record_failure(
        &self,
        ctx: &AdminContext,
        action: AdminAction,
        user_id: &UserId,
        amount: i64,
        reason: &str,
        error: &LedgerError,
    ) {
        tracing::warn!(
            admin_id = %ctx.admin_id,
            user_id = %user_id,
            action = ?action,
            amount,
            error = %error,
            "Admin adjustment rejected"
        );

        let activity = AdminActivity::new(
            &ctx.admin_id,
            action,
            TARGET_ACCOUNT,
            user_id.to_string(),
            ActivityStatus::Failed,
        )
        .with_details(json!({
            "amount": amount,
            "reason": reason,
            "error": error.to_string(),
        }))
        .with_ip_address(ctx.ip_address.clone());

        if let Err(e) = self.ledger.store().append_activity(&activity) {
            tracing::error!(
                admin_id = %ctx.admin_id,
                user_id = %user_id,
                error = %e,
                "Failed to record rejected admin adjustment"
            );
        }
    }
}
