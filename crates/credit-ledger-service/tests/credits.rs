//! Balance, history and catalog integration tests.

mod common;

use common::TestHarness;
use serde_json::json;

// ============================================================================
// Balance
// ============================================================================

#[tokio::test]
async fn get_balance_success() {
    let harness = TestHarness::new();
    harness.open_funded_account(250).await;

    let response = harness
        .server
        .get("/v1/credits/balance")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["balance"], 250);
    assert_eq!(body["lifetime_credits"], 250);
}

#[tokio::test]
async fn get_balance_without_account_fails() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .get("/v1/credits/balance")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_not_found();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn balances_are_isolated_per_user() {
    let harness = TestHarness::new();
    harness.open_funded_account(100).await;

    let other = TestHarness::other_user_auth_header();
    harness
        .server
        .post("/v1/accounts")
        .add_header("authorization", other.clone())
        .await
        .assert_status_ok();

    let body: serde_json::Value = harness
        .server
        .get("/v1/credits/balance")
        .add_header("authorization", other)
        .await
        .json();
    assert_eq!(body["balance"], 0);
}

// ============================================================================
// Transactions
// ============================================================================

#[tokio::test]
async fn list_transactions_empty() {
    let harness = TestHarness::new();
    harness.open_account().await;

    let response = harness
        .server
        .get("/v1/credits/transactions")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert!(body["transactions"].as_array().unwrap().is_empty());
    assert_eq!(body["has_more"], false);
}

#[tokio::test]
async fn list_transactions_pages_newest_first() {
    let harness = TestHarness::new();
    harness.open_funded_account(100).await;

    for key in ["k1", "k2"] {
        harness
            .server
            .post("/v1/services/charge")
            .add_header("authorization", harness.user_auth_header())
            .json(&json!({ "service_id": "fortune_daily", "idempotency_key": key }))
            .await
            .assert_status_ok();
    }

    let response = harness
        .server
        .get("/v1/credits/transactions?page=1&page_size=2")
        .add_header("authorization", harness.user_auth_header())
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let transactions = body["transactions"].as_array().unwrap();
    assert_eq!(transactions.len(), 2);
    assert_eq!(body["has_more"], true);
    assert_eq!(transactions[0]["transaction_type"], "service_usage");
    assert_eq!(transactions[0]["credit_amount"], -10);
    assert_eq!(transactions[0]["credit_balance_after"], 80);
    assert_eq!(transactions[0]["service_id"], "fortune_daily");

    let body: serde_json::Value = harness
        .server
        .get("/v1/credits/transactions?page=2&page_size=2")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    let transactions = body["transactions"].as_array().unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(body["has_more"], false);
    assert_eq!(transactions[0]["transaction_type"], "admin_charge");
    assert_eq!(transactions[0]["reason"], "Test funding");
}

// ============================================================================
// Packages
// ============================================================================

#[tokio::test]
async fn packages_are_public() {
    let harness = TestHarness::new();

    let response = harness.server.get("/v1/credits/packages").await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["currency"], "KRW");
    let basic = body["packages"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["id"] == "basic")
        .cloned()
        .unwrap();
    assert_eq!(basic["price"], 3000);
    assert_eq!(basic["credits"], 1500);
}
