use ::duckdb::{params, Connection};

struct Migration {
    version: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_dataset_tables",
        sql: r#"
CREATE TABLE IF NOT EXISTS products (
    position BIGINT NOT NULL,
    source TEXT NOT NULL,
    source_id TEXT NOT NULL,
    title TEXT,
    price_amount DOUBLE,
    price_currency TEXT,
    image_url TEXT,
    category TEXT,
    url TEXT,
    collected_at TEXT NOT NULL,
    raw_hash TEXT NOT NULL,
    raw_file TEXT NOT NULL,
    additional TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS orders (
    position BIGINT NOT NULL,
    source TEXT NOT NULL,
    order_id TEXT NOT NULL,
    source_order_number TEXT,
    created_at TEXT,
    closed_at TEXT,
    currency TEXT,
    total_price DOUBLE,
    subtotal_price DOUBLE,
    total_tax DOUBLE,
    total_discount DOUBLE,
    total_shipping DOUBLE,
    financial_status TEXT,
    fulfillment_status TEXT,
    line_items_count BIGINT NOT NULL,
    line_items_skus TEXT,
    customer_id TEXT,
    customer_email_hash TEXT,
    raw_file TEXT NOT NULL,
    raw_hash TEXT NOT NULL,
    ingested_at TEXT NOT NULL,
    additional TEXT NOT NULL
);
"#,
    },
    Migration {
        version: "0002_identity_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_products_identity ON products(source, source_id);
CREATE INDEX IF NOT EXISTS idx_orders_identity ON orders(source, order_id);
"#,
    },
];

pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let applied_count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            params![migration.version],
            |row| row.get(0),
        )?;

        if applied_count == 0 {
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                params![migration.version],
            )?;
        }
    }

    Ok(())
}
