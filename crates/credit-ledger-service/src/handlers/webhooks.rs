//! Payment gateway webhook handler.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use credit_ledger_core::{LedgerError, OrderId};

use crate::crypto::verify_signature;
use crate::error::ApiError;
use crate::ledger::{ConfirmOrder, ConfirmationSource};
use crate::state::AppState;

/// Header carrying the hex HMAC-SHA256 of the raw body.
pub const SIGNATURE_HEADER: &str = "x-gateway-signature";

/// Payment status notification.
#[derive(Debug, Deserialize)]
pub struct PaymentWebhook {
    /// Our order ID.
    pub order_id: String,
    /// Gateway payment status (`DONE`, `CANCELED`, ...).
    pub status: String,
    /// Gateway payment key.
    #[serde(default)]
    pub payment_key: Option<String>,
    /// Settled amount.
    #[serde(default)]
    pub amount: Option<i64>,
    /// Payment method.
    #[serde(default)]
    pub method: Option<String>,
    /// Failure reason for unsuccessful payments.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was received.
    pub received: bool,
    /// Set when the notification was accepted but did not change anything.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignored: Option<String>,
}

impl WebhookResponse {
    fn processed() -> Self {
        Self {
            received: true,
            ignored: None,
        }
    }

    fn ignored(reason: impl Into<String>) -> Self {
        Self {
            received: true,
            ignored: Some(reason.into()),
        }
    }
}

/// Handle payment gateway webhooks.
///
/// Rejections that retrying cannot fix are acknowledged with 200 so the
/// gateway stops redelivering. Transient failures return an error status.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    // Verify signature if webhook_secret is configured
    if let Some(secret) = &state.config.payment_webhook_secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::BadRequest("Missing webhook signature".into()))?;

        if !verify_signature(secret, &body, signature) {
            tracing::warn!("Invalid payment webhook signature");
            return Err(ApiError::BadRequest("Invalid webhook signature".into()));
        }
    } else {
        // No webhook_secret configured - skip verification (development mode)
        tracing::warn!("Payment webhook secret not configured - skipping signature verification");
    }

    let webhook: PaymentWebhook =
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    tracing::info!(
        order_id = %webhook.order_id,
        status = %webhook.status,
        "Received payment webhook"
    );

    let Ok(order_id) = webhook.order_id.parse::<OrderId>() else {
        tracing::warn!(order_id = %webhook.order_id, "Payment webhook for malformed order id");
        return Ok(Json(WebhookResponse::ignored("unknown order")));
    };

    let result = match webhook.status.to_ascii_uppercase().as_str() {
        "DONE" => handle_payment_done(&state, order_id, webhook).await,
        "CANCELED" | "ABORTED" | "EXPIRED" | "FAILED" => {
            let reason = webhook
                .reason
                .unwrap_or_else(|| format!("payment {}", webhook.status.to_ascii_lowercase()));
            state.reconciler.fail_order(&order_id, &reason).map(|_| ())
        }
        _ => {
            tracing::debug!(status = %webhook.status, "Unhandled payment status");
            return Ok(Json(WebhookResponse::ignored("unhandled status")));
        }
    };

    match result {
        Ok(()) => Ok(Json(WebhookResponse::processed())),
        Err(e) if is_permanent(&e) => {
            tracing::warn!(order_id = %order_id, error = %e, "Payment webhook rejected");
            Ok(Json(WebhookResponse::ignored(e.to_string())))
        }
        Err(e) => Err(e.into()),
    }
}

async fn handle_payment_done(
    state: &AppState,
    order_id: OrderId,
    webhook: PaymentWebhook,
) -> Result<(), LedgerError> {
    let (Some(payment_key), Some(amount)) = (webhook.payment_key, webhook.amount) else {
        return Err(LedgerError::InvalidAmount(
            "settled payment without payment_key or amount".into(),
        ));
    };

    let confirmation = state
        .reconciler
        .confirm_order(ConfirmOrder {
            order_id,
            gateway_payment_id: payment_key,
            amount,
            payment_method: webhook.method,
            source: ConfirmationSource::Webhook,
        })
        .await?;

    tracing::info!(
        order_id = %order_id,
        credits_granted = confirmation.credits_granted,
        replayed = confirmation.replayed,
        "Payment webhook processed"
    );
    Ok(())
}

/// Errors a redelivery of the same notification would hit again.
fn is_permanent(err: &LedgerError) -> bool {
    matches!(
        err,
        LedgerError::UnknownOrder { .. }
            | LedgerError::AmountMismatch { .. }
            | LedgerError::InvalidOrderState { .. }
            | LedgerError::AccountNotFound { .. }
            | LedgerError::AccountArchived { .. }
            | LedgerError::InvalidAmount(_)
    )
}
