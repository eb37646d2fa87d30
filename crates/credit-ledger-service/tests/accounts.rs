//! Account management integration tests.

mod common;

use common::{bearer, TestHarness};

// ============================================================================
// Account Creation
// ============================================================================

#[tokio::test]
async fn create_account_success() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/accounts")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["user_id"], harness.test_user_id.to_string());
    assert_eq!(body["balance"], 0);
    assert_eq!(body["archived"], false);
}

#[tokio::test]
async fn create_account_without_auth_fails() {
    let harness = TestHarness::new();

    let response = harness.server.post("/v1/accounts").await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn token_signed_with_another_secret_is_rejected() {
    let harness = TestHarness::new();
    let forged = {
        use jsonwebtoken::{encode, EncodingKey, Header};
        let claims = credit_ledger_service::auth::JwtClaims {
            sub: harness.test_user_id.to_string(),
            role: None,
            exp: chrono::Utc::now().timestamp() + 3600,
            iss: None,
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"nope")).unwrap();
        format!("Bearer {token}")
    };

    let response = harness
        .server
        .post("/v1/accounts")
        .add_header("authorization", forged)
        .await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn subject_must_be_a_user_id() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/accounts")
        .add_header("authorization", bearer("not-a-uuid", None))
        .await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn create_account_duplicate_fails() {
    let harness = TestHarness::new();
    harness.open_account().await;

    let response = harness
        .server
        .post("/v1/accounts")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status(axum::http::StatusCode::CONFLICT);
}

// ============================================================================
// Get / Archive
// ============================================================================

#[tokio::test]
async fn get_account_not_found() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .get("/v1/accounts/me")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_not_found();
}

#[tokio::test]
async fn archived_account_stays_readable_but_rejects_purchases() {
    let harness = TestHarness::new();
    harness.open_funded_account(40).await;

    let response = harness
        .server
        .delete("/v1/accounts/me")
        .add_header("authorization", harness.user_auth_header())
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["archived"], true);

    // Archiving twice is a no-op
    harness
        .server
        .delete("/v1/accounts/me")
        .add_header("authorization", harness.user_auth_header())
        .await
        .assert_status_ok();

    let body: serde_json::Value = harness
        .server
        .get("/v1/accounts/me")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(body["balance"], 40);
    assert_eq!(body["archived"], true);

    let response = harness
        .server
        .post("/v1/orders")
        .add_header("authorization", harness.user_auth_header())
        .json(&serde_json::json!({ "package_id": "basic" }))
        .await;
    response.assert_status(axum::http::StatusCode::CONFLICT);
}
