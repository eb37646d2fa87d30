//! Credit purchase integration tests.

mod common;

use axum::http::StatusCode;
use common::{TestHarness, DECLINED_PAYMENT_KEY};
use serde_json::json;

async fn prepare(harness: &TestHarness, package_id: &str) -> serde_json::Value {
    let response = harness
        .server
        .post("/v1/orders")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "package_id": package_id }))
        .await;
    response.assert_status_ok();
    response.json()
}

async fn confirm(
    harness: &TestHarness,
    order_id: &str,
    payment_key: &str,
    amount: i64,
) -> axum_test::TestResponse {
    harness
        .server
        .post(&format!("/v1/orders/{order_id}/confirm"))
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "payment_key": payment_key, "amount": amount, "payment_method": "card" }))
        .await
}

async fn order_status(harness: &TestHarness, order_id: &str) -> String {
    let body: serde_json::Value = harness
        .server
        .get(&format!("/v1/orders/{order_id}"))
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    body["status"].as_str().unwrap().to_string()
}

// ============================================================================
// Prepare
// ============================================================================

#[tokio::test]
async fn prepare_order_captures_package_price() {
    let harness = TestHarness::new();
    harness.open_account().await;

    let order = prepare(&harness, "standard").await;

    assert_eq!(order["amount"], 10000);
    assert_eq!(order["credits"], 5000);
    assert_eq!(order["status"], "prepared");
}

#[tokio::test]
async fn prepare_order_with_unknown_package_fails() {
    let harness = TestHarness::new();
    harness.open_account().await;

    let response = harness
        .server
        .post("/v1/orders")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "package_id": "platinum" }))
        .await;

    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "invalid_package");
}

// ============================================================================
// Confirm
// ============================================================================

#[tokio::test]
async fn duplicate_confirmation_grants_credits_once() {
    let harness = TestHarness::with_gateway();
    harness.open_account().await;
    let order = prepare(&harness, "standard").await;
    let order_id = order["order_id"].as_str().unwrap();

    let first = confirm(&harness, order_id, "pay_1", 10000).await;
    first.assert_status_ok();
    let first: serde_json::Value = first.json();
    assert_eq!(first["credits_granted"], 5000);
    assert_eq!(first["balance"], 5000);
    assert_eq!(first["replayed"], false);

    let second = confirm(&harness, order_id, "pay_1", 10000).await;
    second.assert_status_ok();
    let second: serde_json::Value = second.json();
    assert_eq!(second["credits_granted"], 5000);
    assert_eq!(second["replayed"], true);
    assert_eq!(second["transaction_id"], first["transaction_id"]);

    assert_eq!(harness.balance().await, 5000);
    assert_eq!(order_status(&harness, order_id).await, "confirmed");

    let body: serde_json::Value = harness
        .server
        .get("/v1/credits/transactions")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    let transactions = body["transactions"].as_array().unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0]["transaction_type"], "charge");
    assert_eq!(transactions[0]["order_id"], order_id);
    assert_eq!(transactions[0]["actual_amount"], 10000);
    assert_eq!(transactions[0]["payment_method"], "card");
}

#[tokio::test]
async fn amount_mismatch_fails_the_order() {
    let harness = TestHarness::with_gateway();
    harness.open_account().await;
    let order = prepare(&harness, "basic").await;
    let order_id = order["order_id"].as_str().unwrap();

    let response = confirm(&harness, order_id, "pay_1", 100).await;

    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "amount_mismatch");
    assert_eq!(body["error"]["details"]["expected"], 3000);
    assert_eq!(harness.balance().await, 0);
    assert_eq!(order_status(&harness, order_id).await, "failed");

    // The correct amount can no longer confirm a failed order
    let response = confirm(&harness, order_id, "pay_1", 3000).await;
    response.assert_status(StatusCode::CONFLICT);
    assert_eq!(harness.balance().await, 0);
}

#[tokio::test]
async fn unknown_order_is_not_found() {
    let harness = TestHarness::with_gateway();
    harness.open_account().await;

    let never_prepared = credit_ledger_core::OrderId::generate().to_string();
    let response = confirm(&harness, &never_prepared, "pay_1", 3000).await;
    response.assert_status_not_found();

    let response = confirm(&harness, "garbage", "pay_1", 3000).await;
    response.assert_status_not_found();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "unknown_order");
}

#[tokio::test]
async fn other_users_orders_are_hidden() {
    let harness = TestHarness::new();
    harness.open_account().await;
    let order = prepare(&harness, "basic").await;
    let order_id = order["order_id"].as_str().unwrap();

    let response = harness
        .server
        .get(&format!("/v1/orders/{order_id}"))
        .add_header("authorization", TestHarness::other_user_auth_header())
        .await;

    response.assert_status_not_found();
}

// ============================================================================
// Fail
// ============================================================================

#[tokio::test]
async fn failed_order_cannot_be_confirmed() {
    let harness = TestHarness::with_gateway();
    harness.open_account().await;
    let order = prepare(&harness, "basic").await;
    let order_id = order["order_id"].as_str().unwrap();

    let response = harness
        .server
        .post(&format!("/v1/orders/{order_id}/fail"))
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "reason": "user closed checkout" }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "failed");
    assert_eq!(body["failure_reason"], "user closed checkout");

    let response = confirm(&harness, order_id, "pay_1", 3000).await;
    response.assert_status(StatusCode::CONFLICT);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "invalid_order_state");
}

#[tokio::test]
async fn confirmed_order_cannot_be_failed() {
    let harness = TestHarness::with_gateway();
    harness.open_account().await;
    let order = prepare(&harness, "basic").await;
    let order_id = order["order_id"].as_str().unwrap();
    confirm(&harness, order_id, "pay_1", 3000).await.assert_status_ok();

    let response = harness
        .server
        .post(&format!("/v1/orders/{order_id}/fail"))
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({}))
        .await;

    response.assert_status(StatusCode::CONFLICT);
    assert_eq!(harness.balance().await, 1500);
}

// ============================================================================
// Gateway confirmation
// ============================================================================

#[tokio::test]
async fn redirect_is_confirmed_with_the_gateway() {
    let harness = TestHarness::with_gateway();
    harness.open_account().await;
    let order = prepare(&harness, "premium").await;
    let order_id = order["order_id"].as_str().unwrap();

    let response = confirm(&harness, order_id, "pay_ok", 30000).await;

    response.assert_status_ok();
    assert_eq!(harness.balance().await, 16000);
}

#[tokio::test]
async fn declined_payment_leaves_order_prepared() {
    let harness = TestHarness::with_gateway();
    harness.open_account().await;
    let order = prepare(&harness, "basic").await;
    let order_id = order["order_id"].as_str().unwrap();

    let response = confirm(&harness, order_id, DECLINED_PAYMENT_KEY, 3000).await;

    response.assert_status(StatusCode::BAD_GATEWAY);
    assert_eq!(harness.balance().await, 0);
    assert_eq!(order_status(&harness, order_id).await, "prepared");
}

#[tokio::test]
async fn redirect_without_gateway_grants_nothing() {
    let harness = TestHarness::new();
    harness.open_account().await;
    let order = prepare(&harness, "pro").await;
    let order_id = order["order_id"].as_str().unwrap();

    let response = confirm(&harness, order_id, "made-up", 50000).await;

    response.assert_status(StatusCode::BAD_GATEWAY);
    assert_eq!(harness.balance().await, 0);
    assert_eq!(order_status(&harness, order_id).await, "prepared");
}
