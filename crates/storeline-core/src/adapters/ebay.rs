use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tracing::{debug, warn};

use crate::adapters::{missing_credential, FetchOptions, PayloadFormat, ProviderSource, RawCapture};
use crate::cache::ContentCache;
use crate::config::{env_credential, EbayConfig};
use crate::http_client::{HttpAuth, HttpRequest};
use crate::transport::{ResilientTransport, TransportError};
use crate::ProviderId;

const BROWSE_BASE_URL: &str = "https://api.ebay.com/buy/browse/v1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EbayCredentials {
    pub oauth_token: String,
    pub marketplace_id: String,
}

impl EbayCredentials {
    pub fn from_env(env: &impl Fn(&str) -> Option<String>) -> Result<Self, TransportError> {
        Ok(Self {
            oauth_token: env_credential(env, "EBAY_OAUTH_TOKEN")
                .ok_or_else(|| missing_credential("EBAY_OAUTH_TOKEN"))?,
            marketplace_id: env_credential(env, "EBAY_MARKETPLACE_ID")
                .unwrap_or_else(|| String::from("EBAY_US")),
        })
    }
}

/// eBay Browse API keyword search, one capture per configured query.
#[derive(Clone)]
pub struct EbaySource {
    transport: ResilientTransport,
    cache: ContentCache,
    credentials: EbayCredentials,
    queries: Vec<String>,
    base_url: String,
}

impl EbaySource {
    pub fn new(
        transport: ResilientTransport,
        cache: ContentCache,
        credentials: EbayCredentials,
        config: &EbayConfig,
    ) -> Self {
        Self {
            transport,
            cache,
            credentials,
            queries: config.search.queries.clone(),
            base_url: String::from(BROWSE_BASE_URL),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn search(
        &self,
        query: &str,
        limit: u32,
        options: &FetchOptions,
    ) -> Result<Vec<Value>, TransportError> {
        let key_parts = [String::from("search"), query.to_owned(), limit.to_string()];
        if options.use_cache {
            if let Some(Value::Array(items)) =
                self.cache.get(ProviderId::Ebay, &key_parts, options.cache_ttl)
            {
                debug!(query, "serving ebay search from cache");
                return Ok(items);
            }
        }

        let request = HttpRequest::get(format!("{}/item_summary/search", self.base_url))
            .with_query("q", query)
            .with_query("limit", limit.to_string())
            .with_header("accept", "application/json")
            .with_header("X-EBAY-C-MARKETPLACE-ID", &self.credentials.marketplace_id)
            .with_auth(&HttpAuth::BearerToken(self.credentials.oauth_token.clone()));

        let body = self.transport.request_json(request).await?;
        let items = body
            .get("itemSummaries")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        self.cache
            .put(ProviderId::Ebay, &key_parts, &Value::Array(items.clone()));
        Ok(items)
    }
}

impl ProviderSource for EbaySource {
    fn id(&self) -> ProviderId {
        ProviderId::Ebay
    }

    fn fetch<'a>(
        &'a self,
        options: &'a FetchOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RawCapture>, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            let limit = options.resolve_limit(None);
            let mut captures = Vec::with_capacity(self.queries.len());

            for query in &self.queries {
                let query = query.trim();
                if query.is_empty() {
                    warn!("skipping empty ebay search query");
                    continue;
                }
                let items = self.search(query, limit, options).await?;
                captures.push(
                    RawCapture::new("search", PayloadFormat::EbaySearch, Value::Array(items))
                        .with_tag(query),
                );
            }

            Ok(captures)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::clock::ManualClock;
    use crate::config::EbaySearchConfig;
    use crate::http_client::{HttpResponse, ScriptedHttpClient};
    use crate::retry::RetryPolicy;
    use crate::throttling::RateLimiter;

    #[tokio::test]
    async fn issues_one_tagged_search_per_query() {
        let client = ScriptedHttpClient::new(vec![
            Ok(HttpResponse::ok_json(
                json!({"itemSummaries": [{"itemId": "v1|1|0"}]}).to_string(),
            )),
            Ok(HttpResponse::ok_json(json!({"total": 0}).to_string())),
        ]);
        let transport = ResilientTransport::new(
            ProviderId::Ebay,
            Arc::new(client.clone()),
            RateLimiter::disabled(),
            RetryPolicy::no_retry(),
        );
        let config = EbayConfig {
            rps: None,
            search: EbaySearchConfig {
                queries: vec![String::from("wireless mouse"), String::from("  "), String::from("usb hub")],
            },
        };
        let source = EbaySource::new(
            transport,
            ContentCache::in_memory(Arc::new(ManualClock::default())),
            EbayCredentials {
                oauth_token: String::from("v^1.1#token"),
                marketplace_id: String::from("EBAY_DE"),
            },
            &config,
        );
        let options = FetchOptions {
            limit: Some(5),
            ..FetchOptions::default()
        };

        let captures = source.fetch(&options).await.expect("fetch");

        assert_eq!(captures.len(), 2);
        assert_eq!(captures[0].tag.as_deref(), Some("wireless mouse"));
        assert_eq!(captures[1].payload, json!([]));
        let requests = client.requests();
        assert_eq!(
            requests[0].full_url(),
            "https://api.ebay.com/buy/browse/v1/item_summary/search?q=wireless%20mouse&limit=5"
        );
        assert_eq!(
            requests[0].headers.get("authorization").map(String::as_str),
            Some("Bearer v^1.1#token")
        );
        assert_eq!(
            requests[0].headers.get("x-ebay-c-marketplace-id").map(String::as_str),
            Some("EBAY_DE")
        );
    }
}
