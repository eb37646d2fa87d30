//! Credit purchase order handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use credit_ledger_core::{OrderId, PendingOrder};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::ledger::{ConfirmOrder, ConfirmationSource, OrderConfirmation};
use crate::state::AppState;

/// Reason recorded when the client fails an order without one.
const DEFAULT_FAILURE_REASON: &str = "cancelled by user";

/// Prepare order request.
#[derive(Debug, Deserialize)]
pub struct PrepareOrderRequest {
    /// Package to buy.
    pub package_id: String,
}

/// Confirm order request, sent after the checkout redirect.
#[derive(Debug, Deserialize)]
pub struct ConfirmOrderRequest {
    /// Gateway payment key from the redirect.
    pub payment_key: String,
    /// Amount the client paid.
    pub amount: i64,
    /// Payment method, if the client knows it.
    #[serde(default)]
    pub payment_method: Option<String>,
}

/// Fail order request.
#[derive(Debug, Default, Deserialize)]
pub struct FailOrderRequest {
    /// Why the payment did not go through.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Order response.
#[derive(Debug, Serialize)]
pub struct OrderResponse {
    /// Order ID to pass to the checkout.
    pub order_id: String,
    /// Package being bought.
    pub package_id: String,
    /// Amount to charge.
    pub amount: i64,
    /// Credits granted on confirmation.
    pub credits: i64,
    /// Order status.
    pub status: String,
    /// Why the order failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Creation timestamp.
    pub created_at: String,
}

impl From<&PendingOrder> for OrderResponse {
    fn from(order: &PendingOrder) -> Self {
        Self {
            order_id: order.order_id.to_string(),
            package_id: order.package_id.clone(),
            amount: order.expected_amount,
            credits: order.credits,
            status: order.status.as_str().to_string(),
            failure_reason: order.failure_reason.clone(),
            created_at: order.created_at.to_rfc3339(),
        }
    }
}

/// Create a prepared order for a package.
pub async fn prepare_order(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(request): Json<PrepareOrderRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = state
        .reconciler
        .prepare_order(&auth.user_id, &request.package_id)?;
    Ok(Json(OrderResponse::from(&order)))
}

/// Get one of the user's orders.
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(order_id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = owned_order(&state, &auth, &order_id)?;
    Ok(Json(OrderResponse::from(&order)))
}

/// Confirm an order after the checkout redirect.
pub async fn confirm_order(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(order_id): Path<String>,
    Json(request): Json<ConfirmOrderRequest>,
) -> Result<Json<OrderConfirmation>, ApiError> {
    let order = owned_order(&state, &auth, &order_id)?;

    let confirmation = state
        .reconciler
        .confirm_order(ConfirmOrder {
            order_id: order.order_id,
            gateway_payment_id: request.payment_key,
            amount: request.amount,
            payment_method: request.payment_method,
            source: ConfirmationSource::ClientRedirect,
        })
        .await?;

    Ok(Json(confirmation))
}

/// Fail an order after a cancelled or declined checkout.
pub async fn fail_order(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(order_id): Path<String>,
    body: Option<Json<FailOrderRequest>>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = owned_order(&state, &auth, &order_id)?;
    let reason = body
        .and_then(|Json(b)| b.reason)
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_FAILURE_REASON.to_string());

    let failed = state.reconciler.fail_order(&order.order_id, &reason)?;
    Ok(Json(OrderResponse::from(&failed)))
}

/// Load an order owned by the caller. Other users' orders look unknown.
fn owned_order(state: &AppState, auth: &AuthUser, order_id: &str) -> Result<PendingOrder, ApiError> {
    let id: OrderId = order_id
        .parse()
        .map_err(|_| ApiError::UnknownOrder(order_id.to_string()))?;
    let order = state.reconciler.get_order(&id)?;
    if order.user_id != auth.user_id {
        return Err(ApiError::UnknownOrder(order_id.to_string()));
    }
    Ok(order)
}
