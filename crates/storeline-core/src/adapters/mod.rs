//! Provider sources.
//!
//! A source issues its provider's resource requests through a
//! [`ResilientTransport`](crate::transport::ResilientTransport) and returns the
//! raw payloads untouched. Archiving, hashing and normalization happen in the
//! pipeline.
//!
//! | Source | Resources | Payload format |
//! |--------|-----------|----------------|
//! | [`ShopifySource`] | `products`, `orders` | [`PayloadFormat::ShopifyProducts`], [`PayloadFormat::ShopifyOrders`] |
//! | [`AmazonSource`] | `items` | [`PayloadFormat::AmazonItems`] |
//! | [`EbaySource`] | `search` (one capture per query) | [`PayloadFormat::EbaySearch`] |
//! | [`MockSource`] | `products`, `orders` | storefront formats |

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::Value;

use crate::normalize::{
    AmazonItemNormalizer, EbaySearchNormalizer, Normalizer, Provenance, ShopifyOrderNormalizer,
    ShopifyProductNormalizer,
};
use crate::transport::TransportError;
use crate::ProviderId;

pub mod amazon;
pub mod ebay;
pub mod mock;
pub mod shopify;

pub use amazon::{AmazonCredentials, AmazonSource};
pub use ebay::{EbayCredentials, EbaySource};
pub use mock::{MockSource, SyntheticCatalog, SyntheticFallback};
pub use shopify::{ShopifyCredentials, ShopifySource};

/// Which normalizer understands a raw payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    ShopifyProducts,
    ShopifyOrders,
    AmazonItems,
    EbaySearch,
}

/// One raw provider response destined for the archive.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCapture {
    pub resource: String,
    pub tag: Option<String>,
    pub format: PayloadFormat,
    pub payload: Value,
}

impl RawCapture {
    pub fn new(resource: impl Into<String>, format: PayloadFormat, payload: Value) -> Self {
        Self {
            resource: resource.into(),
            tag: None,
            format,
            payload,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

/// Canonical records produced from one capture.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBatch {
    pub products: Vec<crate::CanonicalProductRecord>,
    pub orders: Vec<crate::CanonicalOrderRecord>,
}

impl NormalizedBatch {
    pub fn extend(&mut self, other: NormalizedBatch) {
        self.products.extend(other.products);
        self.orders.extend(other.orders);
    }
}

/// Runs the normalizer matching `capture.format`, stamping `source` on storefront records.
pub fn normalize_capture(
    source: ProviderId,
    capture: &RawCapture,
    provenance: &Provenance,
) -> NormalizedBatch {
    let payload = &capture.payload;
    match capture.format {
        PayloadFormat::ShopifyProducts => NormalizedBatch {
            products: ShopifyProductNormalizer { source }.normalize(payload, provenance),
            orders: Vec::new(),
        },
        PayloadFormat::ShopifyOrders => NormalizedBatch {
            products: Vec::new(),
            orders: ShopifyOrderNormalizer { source }.normalize(payload, provenance),
        },
        PayloadFormat::AmazonItems => NormalizedBatch {
            products: AmazonItemNormalizer.normalize(payload, provenance),
            orders: Vec::new(),
        },
        PayloadFormat::EbaySearch => NormalizedBatch {
            products: EbaySearchNormalizer.normalize(payload, provenance),
            orders: Vec::new(),
        },
    }
}

/// Per-run fetch knobs shared by every source.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOptions {
    /// Overrides each resource's configured page size.
    pub limit: Option<u32>,
    pub default_limit: u32,
    pub default_max_pages: u32,
    pub use_cache: bool,
    pub cache_ttl: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            limit: None,
            default_limit: 50,
            default_max_pages: 1,
            use_cache: true,
            cache_ttl: Duration::ZERO,
        }
    }
}

impl FetchOptions {
    /// `--limit`, then the resource setting, then the global default.
    pub fn resolve_limit(&self, configured: Option<u32>) -> u32 {
        self.limit
            .or(configured)
            .unwrap_or(self.default_limit)
            .max(1)
    }
}

/// Async contract implemented by every provider source.
pub trait ProviderSource: Send + Sync {
    fn id(&self) -> ProviderId;

    fn fetch<'a>(
        &'a self,
        options: &'a FetchOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RawCapture>, TransportError>> + Send + 'a>>;
}

/// Missing credential surfaced as an authentication failure.
pub(crate) fn missing_credential(name: &str) -> TransportError {
    TransportError::auth(None, format!("missing credential {name}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_resolution_prefers_override() {
        let options = FetchOptions {
            limit: Some(5),
            ..FetchOptions::default()
        };
        assert_eq!(options.resolve_limit(Some(20)), 5);
        assert_eq!(FetchOptions::default().resolve_limit(Some(20)), 20);
        assert_eq!(FetchOptions::default().resolve_limit(None), 50);
    }

    #[test]
    fn storefront_payloads_are_stamped_with_the_capturing_source() {
        let capture = RawCapture::new(
            "orders",
            PayloadFormat::ShopifyOrders,
            serde_json::json!([{"id": "mock-order-1", "line_items": []}]),
        );
        let provenance = Provenance {
            raw_file: String::from("raw.json"),
            raw_hash: String::from("h"),
            collected_at: crate::UtcDateTime::parse("2024-01-01T00:00:00Z").expect("timestamp"),
        };

        let batch = normalize_capture(ProviderId::Mock, &capture, &provenance);

        assert!(batch.products.is_empty());
        assert_eq!(batch.orders[0].source, ProviderId::Mock);
    }
}
