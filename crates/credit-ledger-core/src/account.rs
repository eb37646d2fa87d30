//! Account types for the credit ledger.
//!
//! An account holds a user's spendable credit balance. It is created when the
//! user registers and is only ever soft-archived.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::{TransactionType, UserId};

/// A credit account for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// The user ID (from the identity subsystem).
    pub user_id: UserId,

    /// Spendable credits. Never negative.
    pub balance: i64,

    /// Total credits ever granted through purchases and admin charges.
    pub lifetime_credits: i64,

    /// Optimistic concurrency version, incremented by every write.
    pub version: u64,

    /// Set when the account was archived. Archived accounts reject mutations.
    pub archived_at: Option<DateTime<Utc>>,

    /// When the account was created.
    pub created_at: DateTime<Utc>,

    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new account with zero balance.
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            balance: 0,
            lifetime_credits: 0,
            version: 0,
            archived_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the account has sufficient credits for a debit.
    #[must_use]
    pub fn has_sufficient_credits(&self, amount: i64) -> bool {
        self.balance >= amount
    }

    /// Whether the account has been soft-archived.
    #[must_use]
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    /// Compute the account row that results from applying a signed credit
    /// delta of the given transaction type.
    ///
    /// The returned account carries the next version. `self` is left untouched
    /// so a rejected mutation leaves no trace.
    ///
    /// # Errors
    ///
    /// - `LedgerError::AccountArchived` if the account is archived, unless the
    ///   transaction is a refund of a charge taken before archival.
    /// - `LedgerError::InsufficientCredits` if the delta would drive the
    ///   balance below zero.
    pub fn with_delta(
        &self,
        delta: i64,
        transaction_type: &TransactionType,
    ) -> Result<Self, LedgerError> {
        if self.is_archived() && *transaction_type != TransactionType::Refund {
            return Err(LedgerError::AccountArchived {
                user_id: self.user_id.to_string(),
            });
        }

        let balance = self
            .balance
            .checked_add(delta)
            .ok_or_else(|| LedgerError::InvalidAmount(format!("balance overflow: {delta}")))?;

        if balance < 0 {
            return Err(LedgerError::InsufficientCredits {
                balance: self.balance,
                required: delta.saturating_neg(),
            });
        }

        let mut next = self.clone();
        next.balance = balance;
        if delta > 0 && transaction_type.counts_toward_lifetime() {
            next.lifetime_credits = next.lifetime_credits.saturating_add(delta);
        }
        next.version += 1;
        next.updated_at = Utc::now();
        Ok(next)
    }

    /// Return the archived form of this account with the next version.
    #[must_use]
    pub fn archived(&self) -> Self {
        let now = Utc::now();
        let mut next = self.clone();
        next.archived_at = Some(now);
        next.version += 1;
        next.updated_at = now;
        next
    }
}
