use std::future::Future;
use std::pin::Pin;

use serde_json::json;
use tracing::warn;

use crate::adapters::{missing_credential, FetchOptions, PayloadFormat, ProviderSource, RawCapture};
use crate::config::{env_credential, AmazonConfig};
use crate::http_client::{HttpAuth, HttpRequest};
use crate::transport::{ResilientTransport, TransportError};
use crate::ProviderId;

/// PA-API `GetItems` accepts at most this many ASINs per call.
pub const MAX_ASINS_PER_CALL: usize = 10;

const GET_ITEMS_TARGET: &str = "com.amazon.paapi5.v1.ProductAdvertisingAPIv1.GetItems";
const DEFAULT_RESOURCES: [&str; 3] = [
    "Images.Primary.Small",
    "ItemInfo.Title",
    "Offers.Listings.Price",
];

/// Request signing happens outside this crate; the signed `Authorization`
/// value and the matching `X-Amz-Date` are supplied as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmazonCredentials {
    /// Full `.../paapi5/getitems` URL.
    pub endpoint: String,
    pub authorization: String,
    pub amz_date: Option<String>,
    pub partner_tag: String,
}

impl AmazonCredentials {
    pub fn from_env(env: &impl Fn(&str) -> Option<String>) -> Result<Self, TransportError> {
        Ok(Self {
            endpoint: env_credential(env, "AMAZON_PAAPI_ENDPOINT")
                .ok_or_else(|| missing_credential("AMAZON_PAAPI_ENDPOINT"))?,
            authorization: env_credential(env, "AMAZON_PAAPI_AUTHORIZATION")
                .ok_or_else(|| missing_credential("AMAZON_PAAPI_AUTHORIZATION"))?,
            amz_date: env_credential(env, "AMAZON_PAAPI_AMZ_DATE"),
            partner_tag: env_credential(env, "AMAZON_PARTNER_TAG")
                .ok_or_else(|| missing_credential("AMAZON_PARTNER_TAG"))?,
        })
    }
}

/// Amazon Product Advertising API item lookup by ASIN.
#[derive(Clone)]
pub struct AmazonSource {
    transport: ResilientTransport,
    credentials: AmazonCredentials,
    asins: Vec<String>,
}

impl AmazonSource {
    pub fn new(
        transport: ResilientTransport,
        credentials: AmazonCredentials,
        config: &AmazonConfig,
    ) -> Self {
        let mut asins = config.items.asins.clone();
        if asins.len() > MAX_ASINS_PER_CALL {
            warn!(
                configured = asins.len(),
                kept = MAX_ASINS_PER_CALL,
                "truncating amazon asin list"
            );
            asins.truncate(MAX_ASINS_PER_CALL);
        }
        Self {
            transport,
            credentials,
            asins,
        }
    }

    fn get_items_request(&self) -> HttpRequest {
        let body = json!({
            "ItemIds": self.asins,
            "PartnerTag": self.credentials.partner_tag,
            "PartnerType": "Associates",
            "Resources": DEFAULT_RESOURCES,
        });

        let mut request = HttpRequest::post(&self.credentials.endpoint)
            .with_header("content-type", "application/json; charset=UTF-8")
            .with_header("x-amz-target", GET_ITEMS_TARGET)
            .with_auth(&HttpAuth::Header {
                name: String::from("authorization"),
                value: self.credentials.authorization.clone(),
            })
            .with_body(body.to_string());
        if let Some(amz_date) = &self.credentials.amz_date {
            request = request.with_header("x-amz-date", amz_date);
        }
        request
    }
}

impl ProviderSource for AmazonSource {
    fn id(&self) -> ProviderId {
        ProviderId::Amazon
    }

    fn fetch<'a>(
        &'a self,
        _options: &'a FetchOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RawCapture>, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            if self.asins.is_empty() {
                return Ok(Vec::new());
            }

            let response = self.transport.request_json(self.get_items_request()).await?;
            Ok(vec![RawCapture::new(
                "items",
                PayloadFormat::AmazonItems,
                response,
            )])
        })
    }
}
