//! Admin activity log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ActivityId;

/// One privileged operation, successful or not. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminActivity {
    /// Entry ID.
    pub id: ActivityId,

    /// Acting administrator.
    pub admin_id: String,

    /// What was attempted.
    pub action: AdminAction,

    /// Kind of object acted on (e.g. `account`).
    pub target_type: String,

    /// Identifier of the object acted on.
    pub target_id: String,

    /// Amount, reason, resulting transaction or error.
    pub details: serde_json::Value,

    /// Address the request came from, if known.
    pub ip_address: Option<String>,

    /// Whether the operation took effect.
    pub status: ActivityStatus,

    /// When the entry was written.
    pub created_at: DateTime<Utc>,
}

impl AdminActivity {
    /// Create a new entry stamped with the current time.
    #[must_use]
    pub fn new(
        admin_id: impl Into<String>,
        action: AdminAction,
        target_type: impl Into<String>,
        target_id: impl Into<String>,
        status: ActivityStatus,
    ) -> Self {
        Self {
            id: ActivityId::generate(),
            admin_id: admin_id.into(),
            action,
            target_type: target_type.into(),
            target_id: target_id.into(),
            details: serde_json::Value::Null,
            ip_address: None,
            status,
            created_at: Utc::now(),
        }
    }

    /// Attach details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    /// Attach the caller's address.
    #[must_use]
    pub fn with_ip_address(mut self, ip_address: Option<String>) -> Self {
        self.ip_address = ip_address;
        self
    }

    /// Whether this entry passes a filter.
    #[must_use]
    pub fn matches(&self, filter: &ActivityFilter) -> bool {
        filter.admin_id.as_ref().map_or(true, |id| *id == self.admin_id)
            && filter.action.map_or(true, |action| action == self.action)
            && filter
                .target_id
                .as_ref()
                .map_or(true, |id| *id == self.target_id)
    }
}

/// Privileged operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminAction {
    /// Manual credit.
    CreditCharge,
    /// Manual deduction.
    CreditDeduct,
}

/// Whether an admin operation took effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    /// The ledger mutation committed.
    Succeeded,
    /// The attempt was rejected; nothing changed.
    Failed,
}

/// Filters for listing the activity log. `None` matches everything.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActivityFilter {
    /// Only entries by this admin.
    pub admin_id: Option<String>,
    /// Only entries with this action.
    pub action: Option<AdminAction>,
    /// Only entries about this target.
    pub target_id: Option<String>,
}
