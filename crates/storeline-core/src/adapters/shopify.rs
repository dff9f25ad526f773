use std::future::Future;
use std::pin::Pin;

use serde_json::{json, Value};
use tracing::debug;

use crate::adapters::{missing_credential, FetchOptions, PayloadFormat, ProviderSource, RawCapture};
use crate::cache::ContentCache;
use crate::config::{env_credential, OrdersConfig, PageConfig, ShopifyConfig};
use crate::http_client::{HttpAuth, HttpRequest};
use crate::transport::{ResilientTransport, TransportError};
use crate::ProviderId;

const DEFAULT_API_VERSION: &str = "2025-07";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShopifyCredentials {
    pub shop_domain: String,
    pub api_version: String,
    pub access_token: String,
}

impl ShopifyCredentials {
    pub fn from_env(env: &impl Fn(&str) -> Option<String>) -> Result<Self, TransportError> {
        Ok(Self {
            shop_domain: env_credential(env, "SHOPIFY_SHOP_DOMAIN")
                .ok_or_else(|| missing_credential("SHOPIFY_SHOP_DOMAIN"))?,
            api_version: env_credential(env, "SHOPIFY_API_VERSION")
                .unwrap_or_else(|| String::from(DEFAULT_API_VERSION)),
            access_token: env_credential(env, "SHOPIFY_ACCESS_TOKEN")
                .ok_or_else(|| missing_credential("SHOPIFY_ACCESS_TOKEN"))?,
        })
    }

    pub fn base_url(&self) -> String {
        format!(
            "https://{}/admin/api/{}",
            self.shop_domain.trim_end_matches('/'),
            self.api_version
        )
    }
}

/// Shopify Admin REST listing of products and, when configured, orders.
#[derive(Clone)]
pub struct ShopifySource {
    transport: ResilientTransport,
    cache: ContentCache,
    credentials: ShopifyCredentials,
    base_url: String,
    products: PageConfig,
    orders: Option<OrdersConfig>,
}

impl ShopifySource {
    pub fn new(
        transport: ResilientTransport,
        cache: ContentCache,
        credentials: ShopifyCredentials,
        config: &ShopifyConfig,
    ) -> Self {
        Self {
            transport,
            cache,
            base_url: credentials.base_url(),
            credentials,
            products: config.products.clone().unwrap_or_default(),
            orders: config.orders.clone(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn list(
        &self,
        listing: Listing<'_>,
        options: &FetchOptions,
    ) -> Result<Vec<Value>, TransportError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0;

        while pages < listing.max_pages {
            let key_parts = listing.cache_key(cursor.as_deref());

            let page = match options
                .use_cache
                .then(|| self.cache.get(ProviderId::Shopify, &key_parts, options.cache_ttl))
                .flatten()
                .and_then(CachedPage::from_value)
            {
                Some(page) => {
                    debug!(resource = listing.resource, "serving shopify page from cache");
                    page
                }
                None => {
                    let page = self.fetch_page(&listing, cursor.as_deref()).await?;
                    self.cache
                        .put(ProviderId::Shopify, &key_parts, &page.to_value());
                    page
                }
            };

            pages += 1;
            let short = page.items.len() < listing.limit as usize;
            items.extend(page.items);
            match page.next_page_info {
                Some(next) if !short => cursor = Some(next),
                _ => break,
            }
        }

        Ok(items)
    }

    async fn fetch_page(
        &self,
        listing: &Listing<'_>,
        cursor: Option<&str>,
    ) -> Result<CachedPage, TransportError> {
        let mut request = HttpRequest::get(format!("{}/{}.json", self.base_url, listing.resource))
            .with_query("limit", listing.limit.to_string())
            .with_header("accept", "application/json")
            .with_auth(&HttpAuth::Header {
                name: String::from("X-Shopify-Access-Token"),
                value: self.credentials.access_token.clone(),
            });
        if let Some(status) = listing.status {
            request = request.with_query("status", status);
        }
        if let Some(cursor) = cursor {
            request = request.with_query("page_info", cursor);
        }

        let response = self.transport.send(request).await?;
        let next_page_info = response.header("link").and_then(next_page_info);
        let body = response.payload.into_json()?;
        let items = body
            .get(listing.resource)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(CachedPage {
            items,
            next_page_info,
        })
    }
}

impl ProviderSource for ShopifySource {
    fn id(&self) -> ProviderId {
        ProviderId::Shopify
    }

    fn fetch<'a>(
        &'a self,
        options: &'a FetchOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RawCapture>, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            let product_limit = options.resolve_limit(self.products.limit);
            let products = self
                .list(
                    Listing {
                        resource: "products",
                        status: None,
                        limit: product_limit,
                        max_pages: self.products.max_pages.unwrap_or(options.default_max_pages),
                    },
                    options,
                )
                .await?;
            let mut captures = vec![RawCapture::new(
                "products",
                PayloadFormat::ShopifyProducts,
                Value::Array(products),
            )];

            if let Some(orders) = &self.orders {
                let listed = self
                    .list(
                        Listing {
                            resource: "orders",
                            status: orders.status.as_deref(),
                            limit: options.limit.or(orders.limit).unwrap_or(product_limit).max(1),
                            max_pages: orders.max_pages.unwrap_or(1),
                        },
                        options,
                    )
                    .await?;
                if !listed.is_empty() {
                    captures.push(RawCapture::new(
                        "orders",
                        PayloadFormat::ShopifyOrders,
                        Value::Array(listed),
                    ));
                }
            }

            Ok(captures)
        })
    }
}

struct Listing<'a> {
    resource: &'static str,
    status: Option<&'a str>,
    limit: u32,
    max_pages: u32,
}

impl Listing<'_> {
    fn cache_key(&self, cursor: Option<&str>) -> Vec<String> {
        let mut parts = vec![String::from(self.resource)];
        if self.resource == "orders" {
            parts.push(self.status.unwrap_or("any").to_owned());
        }
        parts.push(self.limit.to_string());
        parts.push(cursor.unwrap_or("first").to_owned());
        parts
    }
}

/// One listing page as held in the response cache.
struct CachedPage {
    items: Vec<Value>,
    next_page_info: Option<String>,
}

impl CachedPage {
    fn from_value(value: Value) -> Option<Self> {
        match value {
            // Pages cached without a cursor envelope.
            Value::Array(items) => Some(Self {
                items,
                next_page_info: None,
            }),
            Value::Object(mut map) => Some(Self {
                items: match map.remove("items")? {
                    Value::Array(items) => items,
                    _ => return None,
                },
                next_page_info: map
                    .remove("next_page_info")
                    .and_then(|next| next.as_str().map(str::to_owned)),
            }),
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        json!({
            "items": self.items,
            "next_page_info": self.next_page_info,
        })
    }
}

/// Extracts `page_info` from the `rel="next"` entry of a `Link` header.
fn next_page_info(link: &str) -> Option<String> {
    link.split(',')
        .find(|entry| entry.contains(r#"rel="next""#))
        .and_then(|entry| {
            let start = entry.find('<')? + 1;
            let end = entry.find('>')?;
            entry.get(start..end)
        })
        .and_then(|url| url.split_once('?').map(|(_, query)| query))
        .and_then(|query| {
            query
                .split('&')
                .find_map(|pair| pair.strip_prefix("page_info="))
        })
        .map(|raw| {
            urlencoding::decode(raw)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| raw.to_owned())
        })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::clock::ManualClock;
    use crate::http_client::{HttpResponse, ScriptedHttpClient};
    use crate::retry::RetryPolicy;
    use crate::throttling::RateLimiter;

    fn credentials() -> ShopifyCredentials {
        ShopifyCredentials {
            shop_domain: String::from("demo.myshopify.test"),
            api_version: String::from("2025-07"),
            access_token: String::from("shpat_test"),
        }
    }

    fn source(client: &ScriptedHttpClient, cache: ContentCache, config: ShopifyConfig) -> ShopifySource {
        let transport = ResilientTransport::new(
            ProviderId::Shopify,
            Arc::new(client.clone()),
            RateLimiter::disabled(),
            RetryPolicy::no_retry(),
        );
        ShopifySource::new(transport, cache, credentials(), &config)
    }

    fn page(items: Value) -> HttpResponse {
        HttpResponse::ok_json(items.to_string())
    }

    #[test]
    fn link_header_yields_next_cursor() {
        let link = r#"<https://demo.myshopify.test/admin/api/2025-07/products.json?limit=2&page_info=eyJsYXN0X2lkIjo0fQ%3D%3D>; rel="next""#;
        assert_eq!(next_page_info(link).as_deref(), Some("eyJsYXN0X2lkIjo0fQ=="));

        let previous_only = r#"<https://x.test/products.json?page_info=abc>; rel="previous""#;
        assert_eq!(next_page_info(previous_only), None);
    }

    #[test]
    fn missing_token_is_an_auth_error() {
        let env = |name: &str| (name == "SHOPIFY_SHOP_DOMAIN").then(|| String::from("demo.test"));
        let error = ShopifyCredentials::from_env(&env).expect_err("token missing");
        assert_eq!(error.kind(), crate::transport::TransportErrorKind::Auth);
    }

    #[tokio::test]
    async fn follows_cursor_until_a_short_page() {
        let client = ScriptedHttpClient::new(vec![
            Ok(page(json!({"products": [{"id": 1}, {"id": 2}]})).with_header(
                "link",
                r#"<https://demo.myshopify.test/admin/api/2025-07/products.json?limit=2&page_info=p2>; rel="next""#,
            )),
            Ok(page(json!({"products": [{"id": 3}]}))),
        ]);
        let cache = ContentCache::in_memory(Arc::new(ManualClock::default()));
        let config = ShopifyConfig {
            products: Some(PageConfig {
                limit: Some(2),
                max_pages: Some(5),
            }),
            ..ShopifyConfig::default()
        };

        let captures = source(&client, cache, config)
            .fetch(&FetchOptions::default())
            .await
            .expect("fetch");

        assert_eq!(captures.len(), 1);
        assert_eq!(captures[0].payload.as_array().map(Vec::len), Some(3));
        let requests = client.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(
            requests[0].full_url(),
            "https://demo.myshopify.test/admin/api/2025-07/products.json?limit=2"
        );
        assert!(requests[1].full_url().ends_with("page_info=p2"));
        assert_eq!(
            requests[0].headers.get("x-shopify-access-token").map(String::as_str),
            Some("shpat_test")
        );
    }

    #[tokio::test]
    async fn cached_pages_skip_the_network() {
        let client = ScriptedHttpClient::new(vec![
            Ok(page(json!({"products": [{"id": 1}]}))),
            Ok(page(json!({"orders": [{"id": 10}]}))),
        ]);
        let cache = ContentCache::in_memory(Arc::new(ManualClock::default()));
        let config = ShopifyConfig {
            orders: Some(OrdersConfig {
                limit: Some(5),
                max_pages: None,
                status: Some(String::from("any")),
            }),
            ..ShopifyConfig::default()
        };
        let source = source(&client, cache.clone(), config);
        let options = FetchOptions {
            cache_ttl: Duration::from_secs(3600),
            ..FetchOptions::default()
        };

        let first = source.fetch(&options).await.expect("first fetch");
        let second = source.fetch(&options).await.expect("second fetch from cache");

        assert_eq!(client.request_count(), 2);
        assert_eq!(first, second);
        assert_eq!(second[1].resource, "orders");
        assert!(cache
            .get(ProviderId::Shopify, &["orders", "any", "5", "first"], Duration::ZERO)
            .is_some());
    }

    #[tokio::test]
    async fn empty_order_listing_produces_no_capture() {
        let client = ScriptedHttpClient::new(vec![
            Ok(page(json!({"products": []}))),
            Ok(page(json!({"orders": []}))),
        ]);
        let cache = ContentCache::in_memory(Arc::new(ManualClock::default()));
        let config = ShopifyConfig {
            orders: Some(OrdersConfig::default()),
            ..ShopifyConfig::default()
        };
        let options = FetchOptions {
            use_cache: false,
            ..FetchOptions::default()
        };

        let captures = source(&client, cache, config)
            .fetch(&options)
            .await
            .expect("fetch");

        assert_eq!(captures.len(), 1);
        assert_eq!(captures[0].resource, "products");
    }
}
