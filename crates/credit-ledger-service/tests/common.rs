//! Common test utilities for credit ledger integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum_test::TestServer;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};

use credit_ledger_core::{OrderId, UserId};
use credit_ledger_service::auth::JwtClaims;
use credit_ledger_service::crypto::hmac_sha256_hex;
use credit_ledger_service::{
    create_router, AppState, GatewayConfirmation, GatewayError, InferenceError,
    InferenceProvider, PaymentGateway, ServiceConfig,
};
use credit_ledger_store::{MemoryStore, Store};

/// JWT signing secret shared with the service under test.
pub const JWT_SECRET: &str = "test-jwt-secret";

/// Webhook signing secret shared with the service under test.
pub const WEBHOOK_SECRET: &str = "test-webhook-secret";

/// Payment key the fake gateway declines.
pub const DECLINED_PAYMENT_KEY: &str = "pay_declined";

/// Inference provider that echoes its input, or fails when the input asks it to.
pub struct EchoProvider;

#[async_trait]
impl InferenceProvider for EchoProvider {
    async fn invoke(&self, service_id: &str, input: &Value) -> Result<Value, InferenceError> {
        if input["fail"] == true {
            return Err(InferenceError::Api {
                status: 503,
                message: "model overloaded".into(),
            });
        }
        Ok(json!({ "service_id": service_id, "echo": input }))
    }
}

/// Gateway that approves whatever amount it is asked to confirm.
pub struct ApprovingGateway;

#[async_trait]
impl PaymentGateway for ApprovingGateway {
    async fn confirm_payment(
        &self,
        _order_id: &OrderId,
        payment_key: &str,
        amount: i64,
    ) -> Result<GatewayConfirmation, GatewayError> {
        if payment_key == DECLINED_PAYMENT_KEY {
            return Err(GatewayError::NotSettled("ABORTED".into()));
        }
        Ok(GatewayConfirmation {
            payment_key: payment_key.to_string(),
            method: Some("card".into()),
            approved_amount: amount,
        })
    }
}

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The store behind the server, for direct inspection.
    pub store: Arc<dyn Store>,
    /// A test user ID for authenticated requests.
    pub test_user_id: UserId,
}

impl TestHarness {
    /// Create a harness with an echoing inference provider and no gateway.
    pub fn new() -> Self {
        Self::build(Some(Arc::new(EchoProvider)), None)
    }

    /// Create a harness whose client redirects are confirmed with a gateway.
    pub fn with_gateway() -> Self {
        Self::build(Some(Arc::new(EchoProvider)), Some(Arc::new(ApprovingGateway)))
    }

    /// Create a harness with no collaborators configured.
    pub fn without_collaborators() -> Self {
        Self::build(None, None)
    }

    fn build(
        inference: Option<Arc<dyn InferenceProvider>>,
        gateway: Option<Arc<dyn PaymentGateway>>,
    ) -> Self {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());

        let config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            auth_jwt_secret: Some(JWT_SECRET.into()),
            payment_webhook_secret: Some(WEBHOOK_SECRET.into()),
            inference_timeout_seconds: 5,
            ..ServiceConfig::default()
        };

        let state = AppState::with_collaborators(store.clone(), config, inference, gateway);
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            store,
            test_user_id: UserId::generate(),
        }
    }

    /// Get the authorization header for the test user.
    pub fn user_auth_header(&self) -> String {
        bearer(&self.test_user_id.to_string(), None)
    }

    /// Get a different user's auth header (for testing isolation).
    pub fn other_user_auth_header() -> String {
        bearer(&UserId::generate().to_string(), None)
    }

    /// Get an admin's auth header.
    pub fn admin_auth_header() -> String {
        bearer("ops-admin", Some("admin"))
    }

    /// Sign a webhook body with the shared secret.
    pub fn sign_webhook(body: &[u8]) -> String {
        hmac_sha256_hex(WEBHOOK_SECRET, body).expect("HMAC accepts any key")
    }

    /// Open the test user's account.
    pub async fn open_account(&self) {
        self.server
            .post("/v1/accounts")
            .add_header("authorization", self.user_auth_header())
            .await
            .assert_status_ok();
    }

    /// Open the test user's account and grant `amount` credits as an admin.
    pub async fn open_funded_account(&self, amount: i64) {
        self.open_account().await;
        if amount > 0 {
            self.server
                .post("/v1/admin/credits/charge")
                .add_header("authorization", Self::admin_auth_header())
                .json(&json!({
                    "user_id": self.test_user_id.to_string(),
                    "amount": amount,
                    "reason": "Test funding"
                }))
                .await
                .assert_status_ok();
        }
    }

    /// The test user's current balance.
    pub async fn balance(&self) -> i64 {
        let response = self
            .server
            .get("/v1/credits/balance")
            .add_header("authorization", self.user_auth_header())
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        body["balance"].as_i64().expect("balance is a number")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Mint an HS256 bearer token for `subject`.
pub fn bearer(subject: &str, role: Option<&str>) -> String {
    let claims = JwtClaims {
        sub: subject.to_string(),
        role: role.map(ToString::to_string),
        exp: chrono::Utc::now().timestamp() + 3600,
        iss: None,
    };
    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("Failed to sign test token");
    format!("Bearer {token}")
}
