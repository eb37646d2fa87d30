//! Router configuration.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{accounts, admin, credits, health, orders, services, webhooks};
use crate::state::AppState;

// ============================================================================
// Concurrency Limiting Constants
// ============================================================================

/// Maximum concurrent paid service charges. Each one holds an inference call
/// open for up to the inference timeout.
const SERVICES_MAX_CONCURRENT_REQUESTS: usize = 64;

/// Maximum concurrent requests for admin endpoints.
const ADMIN_MAX_CONCURRENT_REQUESTS: usize = 10;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
/// - `GET /v1/credits/packages` - Package catalog
///
/// ## Accounts (JWT auth)
/// - `POST /v1/accounts` - Open account
/// - `GET /v1/accounts/me` - Current user's account
/// - `DELETE /v1/accounts/me` - Archive account
///
/// ## Credits (JWT auth)
/// - `GET /v1/credits/balance` - Current balance
/// - `GET /v1/credits/transactions` - Transaction history
/// - `POST /v1/services/charge` - Charge for a paid service
///
/// ## Orders (JWT auth)
/// - `POST /v1/orders` - Prepare an order
/// - `GET /v1/orders/:order_id` - Order status
/// - `POST /v1/orders/:order_id/confirm` - Confirm after checkout redirect
/// - `POST /v1/orders/:order_id/fail` - Fail a cancelled checkout
///
/// ## Admin (JWT auth, admin role)
/// - `POST /v1/admin/credits/charge` - Grant credits
/// - `POST /v1/admin/credits/deduct` - Remove credits
/// - `GET /v1/admin/activity` - Activity log
/// - `GET /v1/admin/accounts/:user_id` - Account and ledger verification
/// - `GET /v1/admin/accounts/:user_id/transactions` - A user's history
///
/// ## Webhooks (Signature verification)
/// - `POST /webhooks/payments` - Payment gateway notifications
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let service_routes = Router::new()
        .route("/charge", post(services::charge_service))
        .layer(ConcurrencyLimitLayer::new(SERVICES_MAX_CONCURRENT_REQUESTS));

    let admin_routes = Router::new()
        .route("/credits/charge", post(admin::charge_credits))
        .route("/credits/deduct", post(admin::deduct_credits))
        .route("/activity", get(admin::list_activity))
        .route("/accounts/:user_id", get(admin::get_account))
        .route(
            "/accounts/:user_id/transactions",
            get(admin::list_transactions),
        )
        .layer(ConcurrencyLimitLayer::new(ADMIN_MAX_CONCURRENT_REQUESTS));

    let api_routes = Router::new()
        // Accounts
        .route("/accounts", post(accounts::create_account))
        .route(
            "/accounts/me",
            get(accounts::get_account).delete(accounts::delete_account),
        )
        // Credits
        .route("/credits/balance", get(credits::get_balance))
        .route("/credits/transactions", get(credits::list_transactions))
        .route("/credits/packages", get(credits::list_packages))
        // Orders
        .route("/orders", post(orders::prepare_order))
        .route("/orders/:order_id", get(orders::get_order))
        .route("/orders/:order_id/confirm", post(orders::confirm_order))
        .route("/orders/:order_id/fail", post(orders::fail_order))
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS))
        // Paid services and admin carry their own limits
        .nest("/services", service_routes)
        .nest("/admin", admin_routes);

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        .nest("/v1", api_routes)
        // Webhooks (no rate limit - controlled by the gateway)
        .route("/webhooks/payments", post(webhooks::payment_webhook))
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        cors.allow_origin(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        cors.allow_origin(origins)
    }
}
