//! Admin handlers.
//!
//! Every route requires a token with the admin role.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use credit_ledger_core::{ActivityFilter, AdminAction, AdminActivity, UserId};

use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::handlers::accounts::AccountResponse;
use crate::handlers::credits::{PageQuery, TransactionsResponse};
use crate::ledger::{AdminAdjustment, AdminContext, LedgerVerification};
use crate::state::AppState;

/// Manual adjustment request.
#[derive(Debug, Deserialize)]
pub struct AdjustCreditsRequest {
    /// Target user.
    pub user_id: String,
    /// Credits to grant or remove.
    pub amount: i64,
    /// Why the adjustment is made. Required.
    pub reason: String,
}

/// Activity log query.
#[derive(Debug, Default, Deserialize)]
pub struct ActivityQuery {
    /// Only entries by this admin.
    pub admin_id: Option<String>,
    /// Only entries with this action.
    pub action: Option<AdminAction>,
    /// Only entries about this target.
    pub target_id: Option<String>,
    /// 1-based page number.
    pub page: Option<usize>,
    /// Items per page.
    pub page_size: Option<usize>,
}

/// Activity log response.
#[derive(Debug, Serialize)]
pub struct ActivityResponse {
    /// Entries, newest first.
    pub activities: Vec<AdminActivity>,
    /// 1-based page number.
    pub page: usize,
    /// Page size used.
    pub page_size: usize,
    /// Whether another page follows.
    pub has_more: bool,
}

/// Account inspection response.
#[derive(Debug, Serialize)]
pub struct AdminAccountResponse {
    /// The account.
    pub account: AccountResponse,
    /// Result of replaying its history.
    pub verification: LedgerVerification,
}

/// Grant credits to a user.
pub async fn charge_credits(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(request): Json<AdjustCreditsRequest>,
) -> Result<Json<AdminAdjustment>, ApiError> {
    let (user_id, reason) = validate(&request)?;
    let adjustment =
        state
            .admin
            .admin_charge(&context(admin), &user_id, request.amount, reason)?;
    Ok(Json(adjustment))
}

/// Remove credits from a user.
pub async fn deduct_credits(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(request): Json<AdjustCreditsRequest>,
) -> Result<Json<AdminAdjustment>, ApiError> {
    let (user_id, reason) = validate(&request)?;
    let adjustment =
        state
            .admin
            .admin_deduct(&context(admin), &user_id, request.amount, reason)?;
    Ok(Json(adjustment))
}

/// List the admin activity log.
pub async fn list_activity(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<ActivityResponse>, ApiError> {
    let filter = ActivityFilter {
        admin_id: query.admin_id,
        action: query.action,
        target_id: query.target_id,
    };
    let page = state
        .admin
        .activity_log(&filter, query.page, query.page_size)?;

    Ok(Json(ActivityResponse {
        activities: page.items,
        page: page.page,
        page_size: page.page_size,
        has_more: page.has_more,
    }))
}

/// Inspect an account and verify its history.
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Path(user_id): Path<String>,
) -> Result<Json<AdminAccountResponse>, ApiError> {
    let user_id = parse_user_id(&user_id)?;
    let account = state.ledger.account(&user_id)?;
    let verification = state.ledger.verify(&user_id)?;

    Ok(Json(AdminAccountResponse {
        account: AccountResponse::from(&account),
        verification,
    }))
}

/// List a user's transactions.
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Path(user_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<TransactionsResponse>, ApiError> {
    let user_id = parse_user_id(&user_id)?;
    let page = state
        .ledger
        .transactions(&user_id, query.page, query.page_size)?;
    Ok(Json(TransactionsResponse::from(page)))
}

fn context(admin: AdminAuth) -> AdminContext {
    AdminContext {
        admin_id: admin.admin_id,
        ip_address: admin.ip_address,
    }
}

fn validate(request: &AdjustCreditsRequest) -> Result<(UserId, &str), ApiError> {
    let user_id = parse_user_id(&request.user_id)?;
    let reason = request.reason.trim();
    if reason.is_empty() {
        return Err(ApiError::BadRequest("reason is required".into()));
    }
    Ok((user_id, reason))
}

fn parse_user_id(raw: &str) -> Result<UserId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid user id: {raw}")))
}
