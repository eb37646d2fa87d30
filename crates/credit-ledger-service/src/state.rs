//! Application state.

use std::sync::Arc;
use std::time::Duration;

use credit_ledger_store::Store;

use crate::config::ServiceConfig;
use crate::gateway::{HttpPaymentGateway, PaymentGateway};
use crate::inference::{HttpInferenceProvider, InferenceProvider};
use crate::ledger::{
    AdminLedger, CreditLedger, PaymentReconciler, ServiceCharger, SettlementQueue,
    SettlementWorker,
};

/// Connect timeout for the inference provider; the whole call is bounded by
/// `inference_timeout_seconds`.
const INFERENCE_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Balance reads and writes.
    pub ledger: CreditLedger,

    /// Paid service charging.
    pub charger: ServiceCharger,

    /// Purchase orders.
    pub reconciler: PaymentReconciler,

    /// Admin adjustments.
    pub admin: AdminLedger,
}

impl AppState {
    /// Create a new application state, building collaborator clients from the
    /// configuration.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        // Create inference client if configured
        let inference = config
            .inference_api_url
            .as_ref()
            .zip(config.inference_api_key.as_ref())
            .and_then(|(url, key)| {
                match HttpInferenceProvider::new(url, key, INFERENCE_CONNECT_TIMEOUT) {
                    Ok(client) => {
                        tracing::info!(inference_url = %url, "Inference provider enabled");
                        Some(Arc::new(client) as Arc<dyn InferenceProvider>)
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to create inference client");
                        None
                    }
                }
            });

        if inference.is_none() {
            tracing::warn!("Inference provider not configured - paid services will fail");
        }

        // Create payment gateway client if configured
        let gateway = config
            .payment_gateway_url
            .as_ref()
            .zip(config.payment_gateway_secret_key.as_ref())
            .and_then(|(url, key)| match HttpPaymentGateway::new(url, key) {
                Ok(client) => {
                    tracing::info!(gateway_url = %url, "Payment gateway enabled");
                    Some(Arc::new(client) as Arc<dyn PaymentGateway>)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create payment gateway client");
                    None
                }
            });

        if gateway.is_none() {
            tracing::warn!(
                "Payment gateway not configured - client redirects are rejected, only signed webhooks confirm orders"
            );
        }

        Self::with_collaborators(store, config, inference, gateway)
    }

    /// Create application state with explicit collaborators.
    ///
    /// Spawns the settlement worker when called inside a tokio runtime.
    #[must_use]
    pub fn with_collaborators(
        store: Arc<dyn Store>,
        config: ServiceConfig,
        inference: Option<Arc<dyn InferenceProvider>>,
        gateway: Option<Arc<dyn PaymentGateway>>,
    ) -> Self {
        let ledger = CreditLedger::new(store.clone()).with_max_retries(config.ledger_max_retries);

        let (queue, rx) = SettlementQueue::channel();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(SettlementWorker::new(ledger.clone(), rx).run());
            }
            Err(_) => {
                tracing::warn!("No tokio runtime - settlement worker not started");
            }
        }

        let charger = ServiceCharger::new(
            ledger.clone(),
            inference,
            config.pricing.clone(),
            Duration::from_secs(config.inference_timeout_seconds),
            queue,
        );
        let reconciler = PaymentReconciler::new(ledger.clone(), config.packages.clone(), gateway);
        let admin = AdminLedger::new(ledger.clone());

        Self {
            store,
            config,
            ledger,
            charger,
            reconciler,
            admin,
        }
    }

    /// Check if an inference provider is configured.
    #[must_use]
    pub fn has_inference(&self) -> bool {
        self.charger.has_inference()
    }

    /// Check if a payment gateway is configured.
    #[must_use]
    pub fn has_gateway(&self) -> bool {
        self.reconciler.has_gateway()
    }
}
