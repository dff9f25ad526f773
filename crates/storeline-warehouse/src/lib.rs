//! DuckDB-backed product and order dataset.
//!
//! Each entity table is read in full and rewritten in full inside one
//! transaction, which is all the reconciliation engine asks of its store.

pub mod duckdb;
pub mod migrations;

use std::fs;
use std::path::{Path, PathBuf};

use ::duckdb::{params, Connection, Row};
use storeline_core::{
    CanonicalOrderRecord, CanonicalProductRecord, DatasetError, DatasetStore, EntityKind,
    ProviderId, UtcDateTime,
};
use thiserror::Error;
use tracing::debug;

pub use duckdb::{DuckDbConnectionManager, PooledConnection};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{table} row {position}: {message}")]
    Decode {
        table: &'static str,
        position: i64,
        message: String,
    },

    #[error("duckdb connection pool lock poisoned")]
    PoolPoisoned,
}

#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    pub db_path: PathBuf,
    pub max_pool_size: usize,
}

impl WarehouseConfig {
    pub fn at(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            max_pool_size: 2,
        }
    }
}

#[derive(Clone)]
pub struct Warehouse {
    manager: DuckDbConnectionManager,
}

impl Warehouse {
    pub fn open(config: WarehouseConfig) -> Result<Self, StoreError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let manager = DuckDbConnectionManager::new(config.db_path, config.max_pool_size);
        let warehouse = Self { manager };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        let connection = self.manager.acquire()?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        self.manager.db_path()
    }

    pub fn read_products(&self) -> Result<Vec<CanonicalProductRecord>, StoreError> {
        let connection = self.manager.acquire()?;
        let mut statement = connection.prepare(
            r#"
SELECT position, source, source_id, title, price_amount, price_currency, image_url,
       category, url, collected_at, raw_hash, raw_file, additional
FROM products
ORDER BY position
"#,
        )?;
        let rows = statement.query_map([], ProductRow::from_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }
        Ok(records)
    }

    pub fn replace_products(&self, rows: &[CanonicalProductRecord]) -> Result<(), StoreError> {
        let connection = self.manager.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<(), StoreError> {
            connection.execute_batch("DELETE FROM products")?;
            let mut insert = connection.prepare(
                r#"
INSERT INTO products (
    position, source, source_id, title, price_amount, price_currency, image_url,
    category, url, collected_at, raw_hash, raw_file, additional
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#,
            )?;
            for (position, row) in (0_i64..).zip(rows) {
                insert.execute(params![
                    position,
                    row.source.as_str(),
                    row.source_id,
                    row.title,
                    row.price_amount,
                    row.price_currency,
                    row.image_url,
                    row.category,
                    row.url,
                    row.collected_at.format_rfc3339(),
                    row.raw_hash,
                    row.raw_file,
                    row.additional,
                ])?;
            }
            Ok(())
        })();

        finalize_transaction(&connection, result)?;
        debug!(rows = rows.len(), "rewrote products table");
        Ok(())
    }

    pub fn read_orders(&self) -> Result<Vec<CanonicalOrderRecord>, StoreError> {
        let connection = self.manager.acquire()?;
        let mut statement = connection.prepare(
            r#"
SELECT position, source, order_id, source_order_number, created_at, closed_at, currency,
       total_price, subtotal_price, total_tax, total_discount, total_shipping,
       financial_status, fulfillment_status, line_items_count, line_items_skus,
       customer_id, customer_email_hash, raw_file, raw_hash, ingested_at, additional
FROM orders
ORDER BY position
"#,
        )?;
        let rows = statement.query_map([], OrderRow::from_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }
        Ok(records)
    }

    pub fn replace_orders(&self, rows: &[CanonicalOrderRecord]) -> Result<(), StoreError> {
        let connection = self.manager.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<(), StoreError> {
            connection.execute_batch("DELETE FROM orders")?;
            let mut insert = connection.prepare(
                r#"
INSERT INTO orders (
    position, source, order_id, source_order_number, created_at, closed_at, currency,
    total_price, subtotal_price, total_tax, total_discount, total_shipping,
    financial_status, fulfillment_status, line_items_count, line_items_skus,
    customer_id, customer_email_hash, raw_file, raw_hash, ingested_at, additional
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#,
            )?;
            for (position, row) in (0_i64..).zip(rows) {
                insert.execute(params![
                    position,
                    row.source.as_str(),
                    row.order_id,
                    row.source_order_number,
                    row.created_at,
                    row.closed_at,
                    row.currency,
                    row.total_price,
                    row.subtotal_price,
                    row.total_tax,
                    row.total_discount,
                    row.total_shipping,
                    row.financial_status,
                    row.fulfillment_status,
                    i64::from(row.line_items_count),
                    row.line_items_skus,
                    row.customer_id,
                    row.customer_email_hash,
                    row.raw_file,
                    row.raw_hash,
                    row.ingested_at.format_rfc3339(),
                    row.additional,
                ])?;
            }
            Ok(())
        })();

        finalize_transaction(&connection, result)?;
        debug!(rows = rows.len(), "rewrote orders table");
        Ok(())
    }
}

impl DatasetStore for Warehouse {
    fn load_products(&self) -> Result<Vec<CanonicalProductRecord>, DatasetError> {
        self.read_products()
            .map_err(|error| DatasetError::with_source(EntityKind::Products, error))
    }

    fn overwrite_products(&self, rows: &[CanonicalProductRecord]) -> Result<(), DatasetError> {
        self.replace_products(rows)
            .map_err(|error| DatasetError::with_source(EntityKind::Products, error))
    }

    fn load_orders(&self) -> Result<Vec<CanonicalOrderRecord>, DatasetError> {
        self.read_orders()
            .map_err(|error| DatasetError::with_source(EntityKind::Orders, error))
    }

    fn overwrite_orders(&self, rows: &[CanonicalOrderRecord]) -> Result<(), DatasetError> {
        self.replace_orders(rows)
            .map_err(|error| DatasetError::with_source(EntityKind::Orders, error))
    }
}

fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, StoreError>,
) -> Result<T, StoreError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

fn decode_source(table: &'static str, position: i64, value: &str) -> Result<ProviderId, StoreError> {
    value.parse().map_err(|error: storeline_core::ValidationError| StoreError::Decode {
        table,
        position,
        message: error.to_string(),
    })
}

fn decode_timestamp(
    table: &'static str,
    position: i64,
    value: &str,
) -> Result<UtcDateTime, StoreError> {
    UtcDateTime::parse(value).map_err(|error| StoreError::Decode {
        table,
        position,
        message: error.to_string(),
    })
}

struct ProductRow {
    position: i64,
    source: String,
    source_id: String,
    title: Option<String>,
    price_amount: Option<f64>,
    price_currency: Option<String>,
    image_url: Option<String>,
    category: Option<String>,
    url: Option<String>,
    collected_at: String,
    raw_hash: String,
    raw_file: String,
    additional: String,
}

impl ProductRow {
    fn from_row(row: &Row<'_>) -> Result<Self, ::duckdb::Error> {
        Ok(Self {
            position: row.get(0)?,
            source: row.get(1)?,
            source_id: row.get(2)?,
            title: row.get(3)?,
            price_amount: row.get(4)?,
            price_currency: row.get(5)?,
            image_url: row.get(6)?,
            category: row.get(7)?,
            url: row.get(8)?,
            collected_at: row.get(9)?,
            raw_hash: row.get(10)?,
            raw_file: row.get(11)?,
            additional: row.get(12)?,
        })
    }

    fn into_record(self) -> Result<CanonicalProductRecord, StoreError> {
        Ok(CanonicalProductRecord {
            source: decode_source("products", self.position, &self.source)?,
            collected_at: decode_timestamp("products", self.position, &self.collected_at)?,
            source_id: self.source_id,
            title: self.title,
            price_amount: self.price_amount,
            price_currency: self.price_currency,
            image_url: self.image_url,
            category: self.category,
            url: self.url,
            raw_hash: self.raw_hash,
            raw_file: self.raw_file,
            additional: self.additional,
        })
    }
}

struct OrderRow {
    position: i64,
    source: String,
    order_id: String,
    source_order_number: Option<String>,
    created_at: Option<String>,
    closed_at: Option<String>,
    currency: Option<String>,
    total_price: Option<f64>,
    subtotal_price: Option<f64>,
    total_tax: Option<f64>,
    total_discount: Option<f64>,
    total_shipping: Option<f64>,
    financial_status: Option<String>,
    fulfillment_status: Option<String>,
    line_items_count: i64,
    line_items_skus: Option<String>,
    customer_id: Option<String>,
    customer_email_hash: Option<String>,
    raw_file: String,
    raw_hash: String,
    ingested_at: String,
    additional: String,
}

impl OrderRow {
    fn from_row(row: &Row<'_>) -> Result<Self, ::duckdb::Error> {
        Ok(Self {
            position: row.get(0)?,
            source: row.get(1)?,
            order_id: row.get(2)?,
            source_order_number: row.get(3)?,
            created_at: row.get(4)?,
            closed_at: row.get(5)?,
            currency: row.get(6)?,
            total_price: row.get(7)?,
            subtotal_price: row.get(8)?,
            total_tax: row.get(9)?,
            total_discount: row.get(10)?,
            total_shipping: row.get(11)?,
            financial_status: row.get(12)?,
            fulfillment_status: row.get(13)?,
            line_items_count: row.get(14)?,
            line_items_skus: row.get(15)?,
            customer_id: row.get(16)?,
            customer_email_hash: row.get(17)?,
            raw_file: row.get(18)?,
            raw_hash: row.get(19)?,
            ingested_at: row.get(20)?,
            additional: row.get(21)?,
        })
    }

    fn into_record(self) -> Result<CanonicalOrderRecord, StoreError> {
        let line_items_count =
            u32::try_from(self.line_items_count).map_err(|_| StoreError::Decode {
                table: "orders",
                position: self.position,
                message: format!("line_items_count {} out of range", self.line_items_count),
            })?;

        Ok(CanonicalOrderRecord {
            source: decode_source("orders", self.position, &self.source)?,
            ingested_at: decode_timestamp("orders", self.position, &self.ingested_at)?,
            line_items_count,
            order_id: self.order_id,
            source_order_number: self.source_order_number,
            created_at: self.created_at,
            closed_at: self.closed_at,
            currency: self.currency,
            total_price: self.total_price,
            subtotal_price: self.subtotal_price,
            total_tax: self.total_tax,
            total_discount: self.total_discount,
            total_shipping: self.total_shipping,
            financial_status: self.financial_status,
            fulfillment_status: self.fulfillment_status,
            line_items_skus: self.line_items_skus,
            customer_id: self.customer_id,
            customer_email_hash: self.customer_email_hash,
            raw_file: self.raw_file,
            raw_hash: self.raw_hash,
            additional: self.additional,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn product(id: &str, raw_hash: &str, title: Option<&str>) -> CanonicalProductRecord {
        CanonicalProductRecord {
            source: ProviderId::Shopify,
            source_id: id.to_owned(),
            title: title.map(str::to_owned),
            price_amount: Some(19.99),
            price_currency: Some(String::from("USD")),
            image_url: None,
            category: Some(String::from("Home")),
            url: None,
            collected_at: UtcDateTime::parse("2024-02-01T10:00:00Z").expect("timestamp"),
            raw_hash: raw_hash.to_owned(),
            raw_file: String::from("data/raw/shopify/products/x.json"),
            additional: String::from("{\"vendor\":\"Acme\"}"),
        }
    }

    fn order(id: &str) -> CanonicalOrderRecord {
        CanonicalOrderRecord {
            source: ProviderId::Mock,
            order_id: id.to_owned(),
            source_order_number: Some(String::from("1001")),
            created_at: Some(String::from("2024-02-01T09:00:00-05:00")),
            closed_at: None,
            currency: Some(String::from("EUR")),
            total_price: Some(120.5),
            subtotal_price: Some(100.0),
            total_tax: Some(15.5),
            total_discount: None,
            total_shipping: Some(5.0),
            financial_status: Some(String::from("paid")),
            fulfillment_status: None,
            line_items_count: 2,
            line_items_skus: Some(String::from("a,b")),
            customer_id: Some(String::from("cust-1")),
            customer_email_hash: Some(String::from("ab".repeat(32))),
            raw_file: String::from("data/raw/mock/orders/y.json"),
            raw_hash: String::from("h1"),
            ingested_at: UtcDateTime::parse("2024-02-01T10:00:00.250Z").expect("timestamp"),
            additional: String::from("{}"),
        }
    }

    fn open(root: &Path) -> Warehouse {
        Warehouse::open(WarehouseConfig::at(root.join("db").join("storeline.duckdb")))
            .expect("warehouse open")
    }

    #[test]
    fn fresh_warehouse_is_empty() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open(temp.path());

        assert!(warehouse.read_products().expect("products").is_empty());
        assert!(warehouse.read_orders().expect("orders").is_empty());
        assert!(warehouse.db_path().exists());
    }

    #[test]
    fn overwrite_replaces_products_and_keeps_order() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open(temp.path());

        warehouse
            .replace_products(&[product("a", "h1", Some("Lamp")), product("b", "h1", None)])
            .expect("first write");
        let second = vec![
            product("b", "h2", Some("Desk")),
            product("a", "h2", Some("Lamp")),
            product("c", "h2", Some("O'Brien's Chair")),
        ];
        warehouse.replace_products(&second).expect("second write");

        assert_eq!(warehouse.read_products().expect("read"), second);
    }

    #[test]
    fn orders_round_trip_through_dataset_store() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open(temp.path());
        let rows = vec![order("o-1"), order("o-2")];

        warehouse.overwrite_orders(&rows).expect("write");

        assert_eq!(warehouse.load_orders().expect("read"), rows);
    }

    #[test]
    fn reopening_keeps_persisted_rows() {
        let temp = tempdir().expect("tempdir");
        {
            let warehouse = open(temp.path());
            warehouse
                .replace_products(&[product("a", "h1", Some("Lamp"))])
                .expect("write");
        }

        let reopened = open(temp.path());
        assert_eq!(reopened.read_products().expect("read").len(), 1);
    }
}
