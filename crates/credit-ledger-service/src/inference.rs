//! AI inference provider client.
//!
//! Paid services are executed by an external inference API. The charger only
//! sees the `InferenceProvider` trait so tests can script outcomes.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Error type for inference calls.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with an error status.
    #[error("inference API error: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Executes one paid AI service invocation.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Run `service_id` on `input` and return its JSON result.
    async fn invoke(
        &self,
        service_id: &str,
        input: &serde_json::Value,
    ) -> Result<serde_json::Value, InferenceError>;
}

#[derive(Debug, Serialize)]
struct InvokeRequest<'a> {
    service_id: &'a str,
    input: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct InvokeResponse {
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorResponse {
    #[serde(alias = "message")]
    error: String,
}

/// HTTP inference client.
#[derive(Debug, Clone)]
pub struct HttpInferenceProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpInferenceProvider {
    /// Create a new inference client.
    ///
    /// The request timeout is left to the caller, which bounds the whole call
    /// with its own deadline.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, InferenceError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| InferenceError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl InferenceProvider for HttpInferenceProvider {
    async fn invoke(
        &self,
        service_id: &str,
        input: &serde_json::Value,
    ) -> Result<serde_json::Value, InferenceError> {
        let url = format!("{}/v1/invoke", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&InvokeRequest { service_id, input })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let body: InvokeResponse = response.json().await?;
            return Ok(body.result);
        }

        let message = match response.json::<ProviderErrorResponse>().await {
            Ok(body) => body.error,
            Err(_) => format!("HTTP {status}"),
        };
        Err(InferenceError::Api {
            status: status.as_u16(),
            message,
        })
    }
}
