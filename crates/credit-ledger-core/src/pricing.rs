//! Credit packages and paid service prices.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A purchasable bundle of credits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditPackage {
    /// Package identifier used by clients.
    pub id: String,

    /// Display name.
    pub name: String,

    /// Price in minor currency units.
    pub price: i64,

    /// Credits granted on purchase.
    pub credits: i64,
}

impl CreditPackage {
    fn new(id: &str, name: &str, price: i64, credits: i64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            price,
            credits,
        }
    }
}

/// The set of packages on sale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageCatalog {
    /// ISO 4217 currency code the prices are expressed in.
    pub currency: String,

    /// Packages on sale.
    pub packages: Vec<CreditPackage>,
}

impl Default for PackageCatalog {
    fn default() -> Self {
        Self {
            currency: "KRW".to_string(),
            packages: vec![
                CreditPackage::new("basic", "Basic", 3_000, 1_500),
                CreditPackage::new("standard", "Standard", 10_000, 5_000),
                CreditPackage::new("premium", "Premium", 30_000, 16_000),
                CreditPackage::new("pro", "Pro", 50_000, 28_000),
            ],
        }
    }
}

impl PackageCatalog {
    /// Look up a package by ID.
    #[must_use]
    pub fn find(&self, package_id: &str) -> Option<&CreditPackage> {
        self.packages.iter().find(|p| p.id == package_id)
    }
}

/// Default credit cost of each paid AI service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicePricing {
    /// Cost in credits by service ID.
    pub costs: HashMap<String, i64>,
}

impl Default for ServicePricing {
    fn default() -> Self {
        let costs = [
            ("fortune_daily", 10),
            ("fortune_saju", 30),
            ("personality_report", 20),
            ("image_edit", 50),
        ]
        .into_iter()
        .map(|(id, cost)| (id.to_string(), cost))
        .collect();

        Self { costs }
    }
}

impl ServicePricing {
    /// Cost of a service, if it is priced.
    #[must_use]
    pub fn cost_of(&self, service_id: &str) -> Option<i64> {
        self.costs.get(service_id).copied()
    }
}
