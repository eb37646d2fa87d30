//! Account handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use credit_ledger_core::Account;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Account response.
#[derive(Debug, Serialize)]
pub struct AccountResponse {
    /// User ID.
    pub user_id: String,
    /// Current credit balance.
    pub balance: i64,
    /// Total credits ever granted.
    pub lifetime_credits: i64,
    /// Whether the account has been archived.
    pub archived: bool,
    /// Creation timestamp.
    pub created_at: String,
    /// Last mutation timestamp.
    pub updated_at: String,
}

impl From<&Account> for AccountResponse {
    fn from(account: &Account) -> Self {
        Self {
            user_id: account.user_id.to_string(),
            balance: account.balance,
            lifetime_credits: account.lifetime_credits,
            archived: account.is_archived(),
            created_at: account.created_at.to_rfc3339(),
            updated_at: account.updated_at.to_rfc3339(),
        }
    }
}

/// Open an account for the authenticated user.
///
/// Called by the registration flow. Opening twice is a conflict.
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = state.ledger.open_account(auth.user_id)?;
    Ok(Json(AccountResponse::from(&account)))
}

/// Get the current user's account.
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = state.ledger.account(&auth.user_id)?;
    Ok(Json(AccountResponse::from(&account)))
}

/// Archive the current user's account. History and balance stay readable.
pub async fn delete_account(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = state.ledger.archive_account(&auth.user_id)?;
    tracing::info!(user_id = %auth.user_id, "Account archived on user request");
    Ok(Json(AccountResponse::from(&account)))
}
