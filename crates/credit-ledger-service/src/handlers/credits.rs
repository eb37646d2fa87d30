//! Credit handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use credit_ledger_core::{CreditPackage, CreditTransaction};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::ledger::Page;
use crate::state::AppState;

/// Balance response.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    /// Current credit balance.
    pub balance: i64,
    /// Total credits ever granted.
    pub lifetime_credits: i64,
}

/// Pagination query for listings.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    /// 1-based page number.
    pub page: Option<usize>,
    /// Items per page.
    pub page_size: Option<usize>,
}

/// Transaction response.
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    /// Transaction ID.
    pub id: String,
    /// Position in the account's history.
    pub sequence: u64,
    /// Transaction type.
    pub transaction_type: String,
    /// Signed credit amount.
    pub credit_amount: i64,
    /// Balance after this transaction.
    pub credit_balance_after: i64,
    /// Payment method for purchases.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    /// Money paid for purchases.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_amount: Option<i64>,
    /// Free-form reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Service that consumed the credits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    /// Order that granted the credits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    /// Creation timestamp.
    pub created_at: String,
}

impl From<&CreditTransaction> for TransactionResponse {
    fn from(tx: &CreditTransaction) -> Self {
        Self {
            id: tx.id.to_string(),
            sequence: tx.sequence,
            transaction_type: tx.transaction_type.as_str().to_string(),
            credit_amount: tx.credit_amount,
            credit_balance_after: tx.credit_balance_after,
            payment_method: tx.payment_method.clone(),
            actual_amount: tx.actual_amount,
            reason: tx.reason.clone(),
            service_id: tx.service_id.clone(),
            order_id: tx.order_id.map(|id| id.to_string()),
            created_at: tx.created_at.to_rfc3339(),
        }
    }
}

/// Paginated transaction listing.
#[derive(Debug, Serialize)]
pub struct TransactionsResponse {
    /// Transactions, newest first.
    pub transactions: Vec<TransactionResponse>,
    /// 1-based page number.
    pub page: usize,
    /// Page size used.
    pub page_size: usize,
    /// Whether another page follows.
    pub has_more: bool,
}

impl From<Page<CreditTransaction>> for TransactionsResponse {
    fn from(page: Page<CreditTransaction>) -> Self {
        Self {
            transactions: page.items.iter().map(TransactionResponse::from).collect(),
            page: page.page,
            page_size: page.page_size,
            has_more: page.has_more,
        }
    }
}

/// Package catalog response.
#[derive(Debug, Serialize)]
pub struct PackagesResponse {
    /// Currency of package prices.
    pub currency: String,
    /// Packages on sale.
    pub packages: Vec<CreditPackage>,
}

/// Get current balance.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<BalanceResponse>, ApiError> {
    let account = state.ledger.account(&auth.user_id)?;

    Ok(Json(BalanceResponse {
        balance: account.balance,
        lifetime_credits: account.lifetime_credits,
    }))
}

/// List transaction history.
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<TransactionsResponse>, ApiError> {
    let page = state
        .ledger
        .transactions(&auth.user_id, query.page, query.page_size)?;
    Ok(Json(TransactionsResponse::from(page)))
}

/// List credit packages. Public.
pub async fn list_packages(State(state): State<Arc<AppState>>) -> Json<PackagesResponse> {
    let catalog = state.reconciler.catalog();
    Json(PackagesResponse {
        currency: catalog.currency.clone(),
        packages: catalog.packages.clone(),
    })
}
