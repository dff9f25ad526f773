//! Synthetic commerce data: the offline `mock` provider and the fallback used
//! when a real provider fails.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use crate::adapters::{FetchOptions, PayloadFormat, ProviderSource, RawCapture};
use crate::clock::Clock;
use crate::config::{MockConfig, PipelineConfig};
use crate::transport::TransportError;
use crate::{ProviderId, UtcDateTime};

const CATEGORIES: [&str; 6] = ["Electronics", "Books", "Home", "Toys", "Sports", "Fashion"];
const ADJECTIVES: [&str; 10] = [
    "Smart", "Eco", "Ultra", "Mini", "Pro", "Air", "Max", "Hyper", "Nano", "Prime",
];
const NOUNS: [&str; 10] = [
    "Speaker", "Lamp", "Bottle", "Backpack", "Watch", "Camera", "Helmet", "Router", "Shirt",
    "Drone",
];
const CURRENCIES: [&str; 4] = ["USD", "EUR", "GBP", "BRL"];
const FINANCIAL_STATUSES: [&str; 3] = ["paid", "pending", "refunded"];
const FULFILLMENT_STATUSES: [&str; 3] = ["fulfilled", "partial", "restocked"];

const MOCK_PRODUCTS_DEFAULT: u32 = 20;
const MOCK_ORDERS_DEFAULT: u32 = 10;

/// Seedable generator of storefront, marketplace and search payloads.
#[derive(Debug)]
pub struct SyntheticCatalog {
    rng: Mutex<fastrand::Rng>,
}

impl SyntheticCatalog {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => fastrand::Rng::with_seed(seed),
            None => fastrand::Rng::new(),
        };
        Self {
            rng: Mutex::new(rng),
        }
    }

    fn with_rng<T>(&self, generate: impl FnOnce(&mut Draw<'_>) -> T) -> T {
        let mut guard = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        generate(&mut Draw { rng: &mut guard })
    }

    /// Shopify-shaped product listing.
    pub fn products(&self, count: u32) -> Value {
        self.with_rng(|draw| {
            let products: Vec<Value> = (1..=count)
                .map(|index| {
                    let id = format!("mock-prod-{index}");
                    let price = draw.amount(5.0, 300.0);
                    let currency = draw.pick(&CURRENCIES);
                    let variants: Vec<Value> = (1..=draw.range(0, 2))
                        .map(|variant| {
                            json!({
                                "id": format!("{id}-v{variant}"),
                                "price": format!("{:.2}", price * (1.0 + draw.uniform(-0.1, 0.15))),
                                "currency": currency,
                            })
                        })
                        .collect();
                    let variants = if variants.is_empty() {
                        vec![json!({"id": format!("{id}-v1"), "price": format!("{price:.2}"), "currency": currency})]
                    } else {
                        variants
                    };
                    let images = if draw.chance(0.8) {
                        json!([{"src": format!("https://example.com/img/{id}.png")}])
                    } else {
                        json!([])
                    };
                    let tags = if draw.chance(0.5) {
                        draw.pick(&CATEGORIES).to_owned()
                    } else {
                        String::new()
                    };

                    json!({
                        "id": id,
                        "title": format!("{} {}", draw.pick(&ADJECTIVES), draw.pick(&NOUNS)),
                        "variants": variants,
                        "images": images,
                        "product_type": draw.pick(&CATEGORIES),
                        "handle": id,
                        "vendor": "MockVendor",
                        "tags": tags,
                    })
                })
                .collect();
            Value::Array(products)
        })
    }

    /// Shopify-shaped order listing referencing `product_ids`.
    pub fn orders(&self, count: u32, product_ids: &[String], now: UtcDateTime) -> Value {
        self.with_rng(|draw| {
            let orders: Vec<Value> = (1..=count)
                .map(|index| {
                    let id = format!("mock-order-{index}");
                    let created = now.into_inner() - time::Duration::hours(draw.range(1, 240).into());
                    let created = UtcDateTime::from_offset_datetime(created)
                        .map(UtcDateTime::format_rfc3339)
                        .ok();

                    let mut subtotal = 0.0;
                    let line_items: Vec<Value> = (1..=draw.range(1, 4))
                        .map(|line| {
                            let sku = if product_ids.is_empty() {
                                format!("mock-prod-{}", draw.range(1, 30))
                            } else {
                                product_ids[draw.index(product_ids.len())].clone()
                            };
                            let quantity = draw.range(1, 3);
                            let unit_price = draw.amount(5.0, 250.0);
                            subtotal += unit_price * f64::from(quantity);
                            json!({
                                "id": format!("{id}-li{line}"),
                                "sku": sku,
                                "quantity": quantity,
                                "price": format!("{unit_price:.2}"),
                                "variant_id": format!("{sku}-v1"),
                            })
                        })
                        .collect();
                    let tax = round2(subtotal * draw.uniform(0.0, 0.18));
                    let shipping = if draw.chance(0.6) {
                        draw.amount(0.0, 25.0)
                    } else {
                        0.0
                    };
                    let shipping_lines = if shipping > 0.0 {
                        json!([{"price": format!("{shipping:.2}")}])
                    } else {
                        json!([])
                    };
                    let fulfillment = if draw.chance(0.7) {
                        Value::from(draw.pick(&FULFILLMENT_STATUSES))
                    } else {
                        Value::Null
                    };

                    json!({
                        "id": id,
                        "order_number": index,
                        "created_at": created,
                        "closed_at": null,
                        "currency": draw.pick(&CURRENCIES),
                        "total_price": format!("{:.2}", subtotal + tax + shipping),
                        "subtotal_price": format!("{subtotal:.2}"),
                        "total_tax": format!("{tax:.2}"),
                        "shipping_lines": shipping_lines,
                        "discount_applications": [],
                        "financial_status": draw.pick(&FINANCIAL_STATUSES),
                        "fulfillment_status": fulfillment,
                        "line_items": line_items,
                        "customer": {"id": format!("cust-{index}"), "email": format!("user{index}@example.com")},
                        "gateway": "mock_gateway",
                        "processing_method": "mock",
                        "cancelled_at": null,
                        "tags": "mock",
                    })
                })
                .collect();
            Value::Array(orders)
        })
    }

    /// PA-API `GetItems`-shaped response.
    pub fn amazon_items(&self, count: u32) -> Value {
        self.with_rng(|draw| {
            let items: Vec<Value> = (1..=count)
                .map(|index| {
                    let asin = format!("FAKEASIN{index:03}");
                    json!({
                        "ASIN": asin,
                        "ItemInfo": {"Title": {"DisplayValue": format!("{} {}", draw.pick(&ADJECTIVES), draw.pick(&NOUNS))}},
                        "Offers": {"Listings": [{"Price": {"Amount": draw.amount(5.0, 400.0), "Currency": draw.pick(&CURRENCIES)}}]},
                        "Images": {"Primary": {"Small": {"URL": format!("https://example.com/img/{asin}.png")}}},
                        "BrowseNodeInfo": {"BrowseNodes": []},
                        "DetailPageURL": format!("https://example.com/dp/{asin}"),
                    })
                })
                .collect();
            json!({"ItemsResult": {"Items": items}})
        })
    }

    /// Browse search item summaries for `query`.
    pub fn ebay_items(&self, count: u32, query: &str) -> Value {
        self.with_rng(|draw| {
            let items: Vec<Value> = (1..=count)
                .map(|index| {
                    let item_id = format!("FAKEEBAY{index:03}");
                    json!({
                        "itemId": item_id,
                        "title": format!("{} {} for {query}", draw.pick(&ADJECTIVES), draw.pick(&NOUNS)),
                        "price": {"value": draw.amount(3.0, 350.0), "currency": draw.pick(&CURRENCIES)},
                        "image": {"imageUrl": format!("https://example.com/img/{item_id}.jpg")},
                        "categoryPath": ["Root", draw.pick(&CATEGORIES)],
                        "itemWebUrl": format!("https://example.com/itm/{item_id}"),
                        "seller": {"username": "mock_seller"},
                        "condition": "NEW",
                    })
                })
                .collect();
            Value::Array(items)
        })
    }
}

struct Draw<'a> {
    rng: &'a mut fastrand::Rng,
}

impl Draw<'_> {
    fn uniform(&mut self, low: f64, high: f64) -> f64 {
        low + (high - low) * self.rng.f64()
    }

    fn amount(&mut self, low: f64, high: f64) -> f64 {
        round2(self.uniform(low, high))
    }

    /// Inclusive on both ends.
    fn range(&mut self, low: u32, high: u32) -> u32 {
        self.rng.u32(low..=high)
    }

    fn index(&mut self, len: usize) -> usize {
        self.rng.usize(..len)
    }

    fn pick<'v>(&mut self, values: &[&'v str]) -> &'v str {
        values[self.index(values.len())]
    }

    fn chance(&mut self, probability: f64) -> bool {
        self.rng.f64() < probability
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn product_ids(products: &Value) -> Vec<String> {
    products
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("id").and_then(Value::as_str).map(str::to_owned))
                .collect()
        })
        .unwrap_or_default()
}

/// Offline provider serving synthetic storefront data.
#[derive(Clone)]
pub struct MockSource {
    catalog: Arc<SyntheticCatalog>,
    clock: Arc<dyn Clock>,
    products_limit: Option<u32>,
    orders_limit: Option<u32>,
}

impl MockSource {
    pub fn new(catalog: Arc<SyntheticCatalog>, clock: Arc<dyn Clock>, config: &MockConfig) -> Self {
        Self {
            catalog,
            clock,
            products_limit: config.products.limit,
            orders_limit: config.orders.limit,
        }
    }
}

impl ProviderSource for MockSource {
    fn id(&self) -> ProviderId {
        ProviderId::Mock
    }

    fn fetch<'a>(
        &'a self,
        options: &'a FetchOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RawCapture>, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            let products = self.catalog.products(
                options
                    .limit
                    .or(self.products_limit)
                    .unwrap_or(MOCK_PRODUCTS_DEFAULT),
            );
            let orders = self.catalog.orders(
                options.limit.or(self.orders_limit).unwrap_or(MOCK_ORDERS_DEFAULT),
                &product_ids(&products),
                self.clock.now_utc(),
            );

            let mut captures = vec![RawCapture::new(
                "products",
                PayloadFormat::ShopifyProducts,
                products,
            )];
            if orders.as_array().is_some_and(|orders| !orders.is_empty()) {
                captures.push(RawCapture::new("orders", PayloadFormat::ShopifyOrders, orders));
            }
            Ok(captures)
        })
    }
}

/// Substitutes synthetic captures for a provider whose real fetch failed.
///
/// Resources are suffixed `_fake` so the archive never mixes them with real captures.
#[derive(Debug, Clone)]
pub struct SyntheticFallback {
    catalog: Arc<SyntheticCatalog>,
    clock: Arc<dyn Clock>,
}

impl SyntheticFallback {
    pub fn new(catalog: Arc<SyntheticCatalog>, clock: Arc<dyn Clock>) -> Self {
        Self { catalog, clock }
    }

    pub fn captures(
        &self,
        provider: ProviderId,
        config: &PipelineConfig,
        options: &FetchOptions,
    ) -> Vec<RawCapture> {
        match provider {
            ProviderId::Shopify => {
                let shopify = config.providers.shopify.clone().unwrap_or_default();
                let product_count = options
                    .limit
                    .or(shopify.products.and_then(|products| products.limit))
                    .unwrap_or(config.defaults.limit);
                let order_count = options
                    .limit
                    .or(shopify.orders.and_then(|orders| orders.limit))
                    .unwrap_or(MOCK_ORDERS_DEFAULT);

                let products = self.catalog.products(product_count);
                let orders =
                    self.catalog
                        .orders(order_count, &product_ids(&products), self.clock.now_utc());
                let mut captures = vec![RawCapture::new(
                    "products_fake",
                    PayloadFormat::ShopifyProducts,
                    products,
                )];
                if order_count > 0 {
                    captures.push(RawCapture::new(
                        "orders_fake",
                        PayloadFormat::ShopifyOrders,
                        orders,
                    ));
                }
                captures
            }
            ProviderId::Amazon => vec![RawCapture::new(
                "items_fake",
                PayloadFormat::AmazonItems,
                self.catalog.amazon_items(options.limit.unwrap_or(10)),
            )],
            ProviderId::Ebay => {
                let mut queries = config
                    .providers
                    .ebay
                    .as_ref()
                    .map(|ebay| ebay.search.queries.clone())
                    .unwrap_or_default();
                if queries.is_empty() {
                    queries.push(String::from("mock"));
                }
                let count = options.limit.unwrap_or(config.defaults.limit);
                queries
                    .iter()
                    .map(|query| {
                        RawCapture::new(
                            "search_fake",
                            PayloadFormat::EbaySearch,
                            self.catalog.ebay_items(count, query),
                        )
                        .with_tag(query.as_str())
                    })
                    .collect()
            }
            ProviderId::Mock => Vec::new(),
        }
    }
}
