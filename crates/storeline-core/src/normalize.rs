//! Provider payload normalizers.
//!
//! Each normalizer maps one archived raw payload to canonical records stamped
//! with provenance. Records that lack a native id are skipped with a warning;
//! every other missing field becomes `None`.

use std::collections::BTreeSet;

use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::archive::canonical_json;
use crate::domain::{CanonicalOrderRecord, CanonicalProductRecord};
use crate::{ProviderId, UtcDateTime};

pub const ADDITIONAL_MAX_CHARS: usize = 8000;

/// Provenance stamped onto every record from one raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub raw_file: String,
    pub raw_hash: String,
    pub collected_at: UtcDateTime,
}

pub trait Normalizer: Send + Sync {
    type Record;

    fn normalize(&self, payload: &Value, provenance: &Provenance) -> Vec<Self::Record>;
}

/// Shopify `products.json` listings. Also used for synthetic storefront data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShopifyProductNormalizer {
    pub source: ProviderId,
}

/// Shopify `orders.json` listings. Also used for synthetic storefront data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShopifyOrderNormalizer {
    pub source: ProviderId,
}

/// Amazon PA-API `GetItems` responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AmazonItemNormalizer;

/// eBay Browse `item_summary/search` results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EbaySearchNormalizer;

impl Normalizer for ShopifyProductNormalizer {
    type Record = CanonicalProductRecord;

    fn normalize(&self, payload: &Value, provenance: &Provenance) -> Vec<Self::Record> {
        records(payload, "products")
            .filter_map(|product| {
                let source_id = required_id(self.source, product, "id")?;
                let variant = product.pointer("/variants/0");
                let price_amount = variant.and_then(|v| v.get("price")).and_then(number);
                let price_currency = variant.and_then(|v| {
                    text(v.get("currency")).or_else(|| {
                        text(v.pointer("/presentment_prices/0/price/currency_code"))
                    })
                });
                let category = text(product.get("product_type")).or_else(|| {
                    text(product.get("tags")).and_then(|tags| {
                        tags.split(',')
                            .next()
                            .map(str::trim)
                            .filter(|tag| !tag.is_empty())
                            .map(str::to_owned)
                    })
                });

                Some(CanonicalProductRecord {
                    source: self.source,
                    source_id,
                    title: text(product.get("title")),
                    price_amount,
                    price_currency,
                    image_url: text(product.pointer("/images/0/src")),
                    category,
                    url: None,
                    collected_at: provenance.collected_at,
                    raw_hash: provenance.raw_hash.clone(),
                    raw_file: provenance.raw_file.clone(),
                    additional: limit_additional(&json!({
                        "handle": product.get("handle"),
                        "vendor": product.get("vendor"),
                    })),
                })
            })
            .collect()
    }
}

impl Normalizer for AmazonItemNormalizer {
    type Record = CanonicalProductRecord;

    fn normalize(&self, payload: &Value, provenance: &Provenance) -> Vec<Self::Record> {
        let items = payload
            .pointer("/ItemsResult/Items")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        items
            .iter()
            .filter_map(|item| {
                let source_id = required_id(ProviderId::Amazon, item, "ASIN")?;
                let price = item.pointer("/Offers/Listings/0/Price");

                Some(CanonicalProductRecord {
                    source: ProviderId::Amazon,
                    source_id,
                    title: text(item.pointer("/ItemInfo/Title/DisplayValue")),
                    price_amount: price.and_then(|p| p.get("Amount")).and_then(number),
                    price_currency: text(price.and_then(|p| p.get("Currency"))),
                    image_url: text(item.pointer("/Images/Primary/Small/URL")),
                    category: None,
                    url: text(item.get("DetailPageURL")),
                    collected_at: provenance.collected_at,
                    raw_hash: provenance.raw_hash.clone(),
                    raw_file: provenance.raw_file.clone(),
                    additional: limit_additional(&json!({
                        "browseNodeInfo": item.get("BrowseNodeInfo"),
                    })),
                })
            })
            .collect()
    }
}

impl Normalizer for EbaySearchNormalizer {
    type Record = CanonicalProductRecord;

    fn normalize(&self, payload: &Value, provenance: &Provenance) -> Vec<Self::Record> {
        records(payload, "itemSummaries")
            .filter_map(|item| {
                let source_id = required_id(ProviderId::Ebay, item, "itemId")?;
                let category = item
                    .get("categoryPath")
                    .and_then(Value::as_array)
                    .and_then(|path| path.last())
                    .and_then(|last| text(Some(last)));

                Some(CanonicalProductRecord {
                    source: ProviderId::Ebay,
                    source_id,
                    title: text(item.get("title")),
                    price_amount: item.pointer("/price/value").and_then(number),
                    price_currency: text(item.pointer("/price/currency")),
                    image_url: text(item.pointer("/image/imageUrl")),
                    category,
                    url: text(item.get("itemWebUrl")),
                    collected_at: provenance.collected_at,
                    raw_hash: provenance.raw_hash.clone(),
                    raw_file: provenance.raw_file.clone(),
                    additional: limit_additional(&json!({
                        "seller": item.get("seller"),
                        "condition": item.get("condition"),
                    })),
                })
            })
            .collect()
    }
}

impl Normalizer for ShopifyOrderNormalizer {
    type Record = CanonicalOrderRecord;

    fn normalize(&self, payload: &Value, provenance: &Provenance) -> Vec<Self::Record> {
        records(payload, "orders")
            .filter_map(|order| {
                let order_id = required_id(self.source, order, "id")?;
                let line_items = order
                    .get("line_items")
                    .and_then(Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                let customer = order.get("customer").filter(|c| c.is_object());

                Some(CanonicalOrderRecord {
                    source: self.source,
                    order_id,
                    source_order_number: text(order.get("order_number"))
                        .or_else(|| text(order.get("name"))),
                    created_at: text(order.get("created_at")),
                    closed_at: text(order.get("closed_at")),
                    currency: text(order.get("currency")),
                    total_price: order.get("total_price").and_then(number),
                    subtotal_price: order.get("subtotal_price").and_then(number),
                    total_tax: order.get("total_tax").and_then(number),
                    total_discount: total_discount(order),
                    total_shipping: total_shipping(order),
                    financial_status: text(order.get("financial_status")),
                    fulfillment_status: text(order.get("fulfillment_status")),
                    line_items_count: u32::try_from(line_items.len()).unwrap_or(u32::MAX),
                    line_items_skus: joined_skus(line_items),
                    customer_id: customer.and_then(|c| text(c.get("id"))),
                    customer_email_hash: customer
                        .and_then(|c| text(c.get("email")))
                        .filter(|email| !email.trim().is_empty())
                        .map(|email| hash_email(&email)),
                    raw_file: provenance.raw_file.clone(),
                    raw_hash: provenance.raw_hash.clone(),
                    ingested_at: provenance.collected_at,
                    additional: limit_additional(&json!({
                        "gateway": order.get("gateway"),
                        "processing_method": order.get("processing_method"),
                        "cancelled_at": order.get("cancelled_at"),
                        "tags": order.get("tags"),
                    })),
                })
            })
            .collect()
    }
}

/// Iterates the record list of a payload that is either a bare array or an
/// object wrapping the array under `envelope`.
fn records<'a>(payload: &'a Value, envelope: &str) -> impl Iterator<Item = &'a Value> {
    let list = match payload {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => map
            .get(envelope)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default(),
        _ => &[],
    };
    list.iter()
}

fn required_id(source: ProviderId, record: &Value, field: &str) -> Option<String> {
    let id = text(record.get(field));
    if id.is_none() {
        warn!(%source, field, "skipping record without a native id");
    }
    id
}

/// String form of a scalar; `null`, empty strings and containers yield `None`.
fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Numeric value of a number or a numeric string.
fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn total_shipping(order: &Value) -> Option<f64> {
    let lines = order.get("shipping_lines")?.as_array()?;
    if lines.is_empty() {
        return None;
    }
    Some(
        lines
            .iter()
            .filter_map(|line| line.get("price").and_then(number))
            .sum(),
    )
}

fn total_discount(order: &Value) -> Option<f64> {
    let total: f64 = order
        .get("discount_applications")?
        .as_array()?
        .iter()
        .filter_map(|discount| discount.get("value").and_then(number))
        .sum();
    (total > 0.0).then_some(total)
}

fn joined_skus(line_items: &[Value]) -> Option<String> {
    let skus: BTreeSet<String> = line_items
        .iter()
        .filter_map(|item| text(item.get("sku")).or_else(|| text(item.get("variant_id"))))
        .collect();
    if skus.is_empty() {
        return None;
    }
    Some(skus.into_iter().collect::<Vec<_>>().join(","))
}

/// SHA-256 hex of the trimmed, lower-cased address.
pub fn hash_email(email: &str) -> String {
    hex::encode(Sha256::digest(email.trim().to_lowercase().as_bytes()))
}

/// Sorted-key JSON, cut at [`ADDITIONAL_MAX_CHARS`] characters with a `...` marker.
pub fn limit_additional(extra: &Value) -> String {
    let raw = canonical_json(extra);
    if raw.chars().count() <= ADDITIONAL_MAX_CHARS {
        return raw;
    }
    let mut truncated: String = raw.chars().take(ADDITIONAL_MAX_CHARS).collect();
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provenance() -> Provenance {
        Provenance {
            raw_file: String::from("data/raw/shopify/products/x.json"),
            raw_hash: String::from("abc123"),
            collected_at: UtcDateTime::parse("2024-06-01T12:00:00Z").expect("timestamp"),
        }
    }

    #[test]
    fn shopify_products_map_first_variant_and_image() {
        let payload = json!([{
            "id": 632910392,
            "title": "IPod Nano - 8GB",
            "handle": "ipod-nano",
            "vendor": "Apple",
            "tags": "Emotive, Flash Memory",
            "variants": [{"price": "199.00", "presentment_prices": [{"price": {"currency_code": "USD"}}]}],
            "images": [{"src": "https://cdn.test/ipod.png"}]
        }]);

        let records = ShopifyProductNormalizer { source: ProviderId::Shopify }
            .normalize(&payload, &provenance());

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.source_id, "632910392");
        assert_eq!(record.price_amount, Some(199.0));
        assert_eq!(record.price_currency.as_deref(), Some("USD"));
        assert_eq!(record.category.as_deref(), Some("Emotive"));
        assert_eq!(record.image_url.as_deref(), Some("https://cdn.test/ipod.png"));
        assert_eq!(record.raw_hash, "abc123");
        assert_eq!(record.additional, r#"{"handle":"ipod-nano","vendor":"Apple"}"#);
    }

    #[test]
    fn records_without_ids_are_skipped() {
        let payload = json!({"products": [{"title": "no id"}, {"id": 7, "title": "ok"}]});

        let records = ShopifyProductNormalizer { source: ProviderId::Mock }
            .normalize(&payload, &provenance());

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source, ProviderId::Mock);
        assert_eq!(records[0].price_amount, None);
    }

    #[test]
    fn amazon_items_read_nested_offer_fields() {
        let payload = json!({"ItemsResult": {"Items": [{
            "ASIN": "B00X4WHP5E",
            "DetailPageURL": "https://www.amazon.test/dp/B00X4WHP5E",
            "ItemInfo": {"Title": {"DisplayValue": "Echo Dot"}},
            "Offers": {"Listings": [{"Price": {"Amount": 49.99, "Currency": "USD"}}]},
            "Images": {"Primary": {"Small": {"URL": "https://img.test/s.jpg"}}}
        }]}});

        let records = AmazonItemNormalizer.normalize(&payload, &provenance());

        assert_eq!(records[0].source_id, "B00X4WHP5E");
        assert_eq!(records[0].title.as_deref(), Some("Echo Dot"));
        assert_eq!(records[0].price_amount, Some(49.99));
        assert_eq!(records[0].url.as_deref(), Some("https://www.amazon.test/dp/B00X4WHP5E"));
        assert_eq!(records[0].additional, r#"{"browseNodeInfo":null}"#);
    }

    #[test]
    fn ebay_search_uses_last_category_and_string_price() {
        let payload = json!([{
            "itemId": "v1|1234|0",
            "title": "Trail shoe",
            "price": {"value": "59.90", "currency": "EUR"},
            "categoryPath": ["Clothing", "Shoes"],
            "itemWebUrl": "https://ebay.test/itm/1234"
        }]);

        let records = EbaySearchNormalizer.normalize(&payload, &provenance());

        assert_eq!(records[0].price_amount, Some(59.9));
        assert_eq!(records[0].price_currency.as_deref(), Some("EUR"));
        assert_eq!(records[0].category.as_deref(), Some("Shoes"));
    }

    #[test]
    fn shopify_orders_hash_email_and_collect_skus() {
        let payload = json!([{
            "id": 450789469,
            "order_number": 1001,
            "created_at": "2024-05-30T08:00:00-04:00",
            "currency": "USD",
            "total_price": "598.94",
            "shipping_lines": [{"price": "4.00"}, {"price": "1.50"}],
            "discount_applications": [{"value": "10.0"}],
            "line_items": [{"sku": "B"}, {"sku": "A"}, {"variant_id": 9}, {"sku": "A"}],
            "customer": {"id": 207119551, "email": "  Bob.Norman@Mail.Example.COM "}
        }]);

        let records = ShopifyOrderNormalizer { source: ProviderId::Shopify }
            .normalize(&payload, &provenance());

        let order = &records[0];
        assert_eq!(order.order_id, "450789469");
        assert_eq!(order.source_order_number.as_deref(), Some("1001"));
        assert_eq!(order.total_price, Some(598.94));
        assert_eq!(order.total_shipping, Some(5.5));
        assert_eq!(order.total_discount, Some(10.0));
        assert_eq!(order.line_items_count, 4);
        assert_eq!(order.line_items_skus.as_deref(), Some("9,A,B"));
        assert_eq!(order.customer_id.as_deref(), Some("207119551"));
        assert_eq!(
            order.customer_email_hash,
            Some(hash_email("bob.norman@mail.example.com"))
        );
        assert_eq!(order.ingested_at, provenance().collected_at);
    }

    #[test]
    fn email_hash_normalizes_case_and_whitespace() {
        assert_eq!(hash_email(" A@B.com "), hash_email("a@b.com"));
        assert_eq!(hash_email("a@b.com").len(), 64);
    }

    #[test]
    fn additional_is_truncated_with_marker() {
        let long = "x".repeat(ADDITIONAL_MAX_CHARS * 2);
        let limited = limit_additional(&json!({ "note": long }));

        assert_eq!(limited.chars().count(), ADDITIONAL_MAX_CHARS + 3);
        assert!(limited.ends_with("..."));
    }
}
