use serde::{Deserialize, Serialize};

use crate::{ProviderId, UtcDateTime};

/// Canonical product listing produced by a provider normalizer.
///
/// Identity is `(source, source_id)`; a version additionally includes `raw_hash`.
/// Records are never mutated after construction, only superseded or appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalProductRecord {
    pub source: ProviderId,
    pub source_id: String,
    pub title: Option<String>,
    pub price_amount: Option<f64>,
    pub price_currency: Option<String>,
    pub image_url: Option<String>,
    pub category: Option<String>,
    pub url: Option<String>,
    pub collected_at: UtcDateTime,
    pub raw_hash: String,
    pub raw_file: String,
    /// Sorted-key JSON of provider extras, truncated to a bounded length.
    pub additional: String,
}

/// Canonical order produced by a provider normalizer.
///
/// The customer's e-mail is only ever held as a SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalOrderRecord {
    pub source: ProviderId,
    pub order_id: String,
    pub source_order_number: Option<String>,
    /// Provider-reported creation time, kept verbatim.
    pub created_at: Option<String>,
    pub closed_at: Option<String>,
    pub currency: Option<String>,
    pub total_price: Option<f64>,
    pub subtotal_price: Option<f64>,
    pub total_tax: Option<f64>,
    pub total_discount: Option<f64>,
    pub total_shipping: Option<f64>,
    pub financial_status: Option<String>,
    pub fulfillment_status: Option<String>,
    pub line_items_count: u32,
    pub line_items_skus: Option<String>,
    pub customer_id: Option<String>,
    pub customer_email_hash: Option<String>,
    pub raw_file: String,
    pub raw_hash: String,
    pub ingested_at: UtcDateTime,
    pub additional: String,
}

/// Entity tables handled by the reconciliation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Products,
    Orders,
}

impl EntityKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Products => "products",
            Self::Orders => "orders",
        }
    }
}

/// Identity of a logical entity across captures.
pub type IdentityKey = (ProviderId, String);

/// Identity plus the content hash of the raw capture that produced the row.
pub type VersionKey = (ProviderId, String, String);
