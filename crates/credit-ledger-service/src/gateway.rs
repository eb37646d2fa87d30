//! Payment gateway client.
//!
//! After the user completes checkout the gateway redirects back with a
//! payment key. The payment is only final once it has been confirmed with the
//! gateway, which reports the method used and the amount it approved.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use credit_ledger_core::OrderId;

/// Status the gateway reports for a settled payment.
const STATUS_DONE: &str = "DONE";

/// Error type for gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The gateway rejected the confirmation.
    #[error("payment gateway error: {status} - {code}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Gateway error code.
        code: String,
        /// Error message.
        message: String,
    },

    /// The gateway accepted the call but the payment is not settled.
    #[error("payment not settled: status {0}")]
    NotSettled(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// A payment the gateway has confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfirmation {
    /// Gateway payment key.
    pub payment_key: String,
    /// Payment method (card, transfer, ...).
    pub method: Option<String>,
    /// Amount the gateway approved.
    pub approved_amount: i64,
}

/// Confirms payments with the payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Confirm a payment for `order_id`.
    async fn confirm_payment(
        &self,
        order_id: &OrderId,
        payment_key: &str,
        amount: i64,
    ) -> Result<GatewayConfirmation, GatewayError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmRequest<'a> {
    payment_key: &'a str,
    order_id: String,
    amount: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmResponse {
    payment_key: String,
    #[serde(default)]
    method: Option<String>,
    total_amount: i64,
    status: String,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorResponse {
    code: String,
    message: String,
}

/// HTTP payment gateway client.
#[derive(Debug, Clone)]
pub struct HttpPaymentGateway {
    client: Client,
    base_url: String,
    secret_key: String,
}

impl HttpPaymentGateway {
    /// Create a new gateway client.
    pub fn new(
        base_url: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| GatewayError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn confirm_payment(
        &self,
        order_id: &OrderId,
        payment_key: &str,
        amount: i64,
    ) -> Result<GatewayConfirmation, GatewayError> {
        let url = format!("{}/v1/payments/confirm", self.base_url);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.secret_key, None::<&str>)
            .json(&ConfirmRequest {
                payment_key,
                order_id: order_id.to_string(),
                amount,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let (code, message) = match response.json::<GatewayErrorResponse>().await {
                Ok(body) => (body.code, body.message),
                Err(_) => ("UNKNOWN".to_string(), format!("HTTP {status}")),
            };
            tracing::warn!(
                order_id = %order_id,
                status = %status,
                code = %code,
                "Payment gateway rejected confirmation"
            );
            return Err(GatewayError::Api {
                status: status.as_u16(),
                code,
                message,
            });
        }

        let body: ConfirmResponse = response.json().await?;
        if body.status != STATUS_DONE {
            return Err(GatewayError::NotSettled(body.status));
        }

        Ok(GatewayConfirmation {
            payment_key: body.payment_key,
            method: body.method,
            approved_amount: body.total_amount,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(server: &MockServer) -> HttpPaymentGateway {
        HttpPaymentGateway::new(server.uri(), "test_sk").unwrap()
    }

    #[tokio::test]
    async fn confirm_payment_success() {
        let server = MockServer::start().await;
        let order_id = OrderId::generate();

        Mock::given(method("POST"))
            .and(path("/v1/payments/confirm"))
            // base64("test_sk:")
            .and(header("authorization", "Basic dGVzdF9zazo="))
            .and(body_json(json!({
                "paymentKey": "pay_123",
                "orderId": order_id.to_string(),
                "amount": 10000
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "paymentKey": "pay_123",
                "method": "card",
                "totalAmount": 10000,
                "status": "DONE"
            })))
            .mount(&server)
            .await;

        let confirmation = gateway(&server)
            .confirm_payment(&order_id, "pay_123", 10_000)
            .await
            .unwrap();
        assert_eq!(confirmation.payment_key, "pay_123");
        assert_eq!(confirmation.method.as_deref(), Some("card"));
        assert_eq!(confirmation.approved_amount, 10_000);
    }

    #[tokio::test]
    async fn confirm_payment_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payments/confirm"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "code": "REJECT_CARD_PAYMENT",
                "message": "card declined"
            })))
            .mount(&server)
            .await;

        let err = gateway(&server)
            .confirm_payment(&OrderId::generate(), "pay_1", 3000)
            .await
            .unwrap_err();
        match err {
            GatewayError::Api { status, code, .. } => {
                assert_eq!(status, 400);
                assert_eq!(code, "REJECT_CARD_PAYMENT");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn unsettled_payment_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payments/confirm"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "paymentKey": "pay_1",
                "totalAmount": 3000,
                "status": "WAITING_FOR_DEPOSIT"
            })))
            .mount(&server)
            .await;

        let err = gateway(&server)
            .confirm_payment(&OrderId::generate(), "pay_1", 3000)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotSettled(s) if s == "WAITING_FOR_DEPOSIT"));
    }
}
