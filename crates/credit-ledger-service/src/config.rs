//! Service configuration.

use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

use credit_ledger_core::{PackageCatalog, ServicePricing};

/// Which `Store` backend the service runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// In-process maps. Data is lost on restart.
    Memory,
    /// `RocksDB` under `data_dir` (feature `rocksdb-backend`).
    RocksDb,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "rocksdb" => Ok(Self::RocksDb),
            other => Err(format!("unknown storage backend: {other}")),
        }
    }
}

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Storage backend (default: `rocksdb` when compiled in, else `memory`).
    pub storage_backend: StorageBackend,

    /// Path to `RocksDB` data directory (default: "/data/credit-ledger").
    pub data_dir: String,

    /// HS256 secret shared with the identity subsystem.
    pub auth_jwt_secret: Option<String>,

    /// Expected JWT issuer, if the identity subsystem sets one.
    pub auth_issuer: Option<String>,

    /// AI inference API base URL (optional).
    pub inference_api_url: Option<String>,

    /// AI inference API key (optional).
    pub inference_api_key: Option<String>,

    /// Upper bound on one inference call, in seconds.
    pub inference_timeout_seconds: u64,

    /// Payment gateway API base URL (optional).
    pub payment_gateway_url: Option<String>,

    /// Payment gateway secret key (optional).
    pub payment_gateway_secret_key: Option<String>,

    /// Shared secret for payment webhook signatures (optional).
    pub payment_webhook_secret: Option<String>,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Attempts per ledger mutation before reporting a conflict.
    pub ledger_max_retries: u32,

    /// How often held reservations are swept, in seconds.
    pub reservation_sweep_interval_seconds: u64,

    /// Credit packages on sale.
    pub packages: PackageCatalog,

    /// Default cost of each paid service.
    pub pricing: ServicePricing,
}

/// Payment gateway secrets file structure.
#[derive(Debug, Deserialize)]
struct GatewaySecrets {
    api_url: String,
    secret_key: String,
    #[serde(default)]
    webhook_secret: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        // Try to load gateway secrets from file first, then fall back to env vars
        let (payment_gateway_url, payment_gateway_secret_key, payment_webhook_secret) =
            load_gateway_secrets();

        let storage_backend = match std::env::var("STORAGE_BACKEND") {
            Ok(value) => value.parse().unwrap_or_else(|e: String| {
                tracing::warn!(error = %e, "Falling back to default storage backend");
                defaults.storage_backend
            }),
            Err(_) => defaults.storage_backend,
        };

        let packages = std::env::var("PACKAGES_FILE")
            .ok()
            .and_then(|path| match load_json_file::<PackageCatalog>(&path) {
                Ok(catalog) => {
                    tracing::info!(path = %path, packages = catalog.packages.len(), "Loaded package catalog");
                    Some(catalog)
                }
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "Failed to load package catalog - using defaults");
                    None
                }
            })
            .unwrap_or_default();

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            storage_backend,
            data_dir: std::env::var("DATA_DIR").unwrap_or(defaults.data_dir),
            auth_jwt_secret: std::env::var("AUTH_JWT_SECRET").ok(),
            auth_issuer: std::env::var("AUTH_ISSUER").ok(),
            inference_api_url: std::env::var("INFERENCE_API_URL").ok(),
            inference_api_key: std::env::var("INFERENCE_API_KEY").ok(),
            inference_timeout_seconds: env_parse(
                "INFERENCE_TIMEOUT_SECONDS",
                defaults.inference_timeout_seconds,
            ),
            payment_gateway_url,
            payment_gateway_secret_key,
            payment_webhook_secret,
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_parse("MAX_BODY_BYTES", defaults.max_body_bytes),
            request_timeout_seconds: env_parse(
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            ),
            ledger_max_retries: env_parse("LEDGER_MAX_RETRIES", defaults.ledger_max_retries),
            reservation_sweep_interval_seconds: env_parse(
                "RESERVATION_SWEEP_INTERVAL_SECONDS",
                defaults.reservation_sweep_interval_seconds,
            ),
            packages,
            pricing: defaults.pricing,
        }
    }
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Load payment gateway secrets from file or environment.
fn load_gateway_secrets() -> (Option<String>, Option<String>, Option<String>) {
    let secret_paths = [
        ".secrets/payment-gateway.json",
        "credit-ledger/.secrets/payment-gateway.json",
        "../.secrets/payment-gateway.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_json_file::<GatewaySecrets>(path) {
            tracing::info!(path = %path, "Loaded payment gateway secrets from file");
            return (
                Some(secrets.api_url),
                Some(secrets.secret_key),
                secrets
                    .webhook_secret
                    .or_else(|| std::env::var("PAYMENT_WEBHOOK_SECRET").ok()),
            );
        }
    }

    // Fall back to environment variables
    tracing::debug!("Payment gateway secrets file not found, using environment variables");
    (
        std::env::var("PAYMENT_GATEWAY_URL").ok(),
        std::env::var("PAYMENT_GATEWAY_SECRET_KEY").ok(),
        std::env::var("PAYMENT_WEBHOOK_SECRET").ok(),
    )
}

/// Load a JSON file.
fn load_json_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "File not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            storage_backend: if cfg!(feature = "rocksdb-backend") {
                StorageBackend::RocksDb
            } else {
                StorageBackend::Memory
            },
            data_dir: "/data/credit-ledger".into(),
            auth_jwt_secret: None,
            auth_issuer: None,
            inference_api_url: None,
            inference_api_key: None,
            inference_timeout_seconds: 25,
            payment_gateway_url: None,
            payment_gateway_secret_key: None,
            payment_webhook_secret: None,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
            ledger_max_retries: 5,
            reservation_sweep_interval_seconds: 300,
            packages: PackageCatalog::default(),
            pricing: ServicePricing::default(),
        }
    }
}
