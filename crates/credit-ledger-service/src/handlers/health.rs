//! Health check handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service name.
    pub service: String,
    /// Service version.
    pub version: String,
    /// Whether paid services can run.
    pub inference_configured: bool,
    /// Whether client redirects are confirmed with the gateway.
    pub payment_gateway_configured: bool,
}

/// Health check endpoint.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "credit-ledger".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        inference_configured: state.has_inference(),
        payment_gateway_configured: state.has_gateway(),
    })
}
