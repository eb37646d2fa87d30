//! Paid service handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::ledger::{ChargeOutcome, ChargeRequest};
use crate::state::AppState;

/// Header carrying the client's idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Charge request body.
#[derive(Debug, Deserialize)]
pub struct ChargeServiceRequest {
    /// Service to invoke.
    pub service_id: String,
    /// Cost for services without a catalog price.
    #[serde(default)]
    pub cost: Option<i64>,
    /// Client idempotency key. The `Idempotency-Key` header is used when absent.
    #[serde(default)]
    pub idempotency_key: Option<String>,
    /// Service input passed through to the inference provider.
    #[serde(default)]
    pub input: serde_json::Value,
}

/// Charge for and invoke a paid service.
///
/// Credits are debited before the service runs and refunded if it fails.
/// Retrying with the same idempotency key returns the first outcome.
pub async fn charge_service(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(request): Json<ChargeServiceRequest>,
) -> Result<Json<ChargeOutcome>, ApiError> {
    let idempotency_key = request
        .idempotency_key
        .or_else(|| {
            headers
                .get(IDEMPOTENCY_KEY_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ApiError::BadRequest("idempotency_key is required".into()))?;

    if request.service_id.trim().is_empty() {
        return Err(ApiError::BadRequest("service_id is required".into()));
    }

    let outcome = state
        .charger
        .charge(ChargeRequest {
            user_id: auth.user_id,
            service_id: request.service_id,
            cost: request.cost,
            idempotency_key,
            input: request.input,
        })
        .await?;

    Ok(Json(outcome))
}
