use std::collections::HashSet;

use storeline_core::{
    merge, CanonicalOrderRecord, CanonicalProductRecord, KeyMode, ProviderId, UtcDateTime,
    ValidationError,
};

fn at(value: &str) -> UtcDateTime {
    UtcDateTime::parse(value).expect("valid timestamp")
}

fn product(id: &str, raw_hash: &str, price: f64, collected_at: &str) -> CanonicalProductRecord {
    CanonicalProductRecord {
        source: ProviderId::Shopify,
        source_id: id.to_owned(),
        title: Some(format!("Product {id}")),
        price_amount: Some(price),
        price_currency: Some(String::from("USD")),
        image_url: None,
        category: None,
        url: None,
        collected_at: at(collected_at),
        raw_hash: raw_hash.to_owned(),
        raw_file: format!("data/raw/shopify/products/{raw_hash}.json"),
        additional: String::from("{}"),
    }
}

fn order(id: &str, raw_hash: &str, total: f64, ingested_at: &str) -> CanonicalOrderRecord {
    CanonicalOrderRecord {
        source: ProviderId::Shopify,
        order_id: id.to_owned(),
        source_order_number: None,
        created_at: None,
        closed_at: None,
        currency: Some(String::from("USD")),
        total_price: Some(total),
        subtotal_price: None,
        total_tax: None,
        total_discount: None,
        total_shipping: None,
        financial_status: Some(String::from("paid")),
        fulfillment_status: None,
        line_items_count: 1,
        line_items_skus: None,
        customer_id: None,
        customer_email_hash: None,
        raw_file: format!("data/raw/shopify/orders/{raw_hash}.json"),
        raw_hash: raw_hash.to_owned(),
        ingested_at: at(ingested_at),
        additional: String::from("{}"),
    }
}

fn first_batch() -> Vec<CanonicalProductRecord> {
    vec![
        product("A", "h1", 10.0, "2024-01-01T00:00:00Z"),
        product("B", "h1", 20.0, "2024-01-01T00:00:00Z"),
    ]
}

fn second_batch() -> Vec<CanonicalProductRecord> {
    vec![
        product("A", "h2", 11.0, "2024-01-02T00:00:00Z"),
        product("B", "h2", 21.0, "2024-01-02T00:00:00Z"),
    ]
}

#[test]
fn triple_mode_seeds_an_empty_dataset() {
    let outcome = merge(Vec::new(), first_batch(), KeyMode::Triple);

    assert_eq!(outcome.new_count, 2);
    assert_eq!(outcome.updated_count, 0);
    assert_eq!(outcome.dataset.len(), 2);
}

#[test]
fn triple_mode_keeps_every_version() {
    let seeded = merge(Vec::new(), first_batch(), KeyMode::Triple).dataset;

    let outcome = merge(seeded, second_batch(), KeyMode::Triple);

    assert_eq!(outcome.new_count, 2);
    assert_eq!(outcome.updated_count, 0);
    assert_eq!(outcome.dataset.len(), 4);
}

#[test]
fn pair_mode_supersedes_previous_rows() {
    let seeded = merge(Vec::new(), first_batch(), KeyMode::Triple).dataset;

    let outcome = merge(seeded, second_batch(), KeyMode::Pair);

    assert_eq!(outcome.new_count, 0);
    assert_eq!(outcome.updated_count, 2);
    assert_eq!(outcome.dataset, second_batch());
}

#[test]
fn triple_mode_is_idempotent() {
    let once = merge(Vec::new(), first_batch(), KeyMode::Triple).dataset;

    let twice = merge(once.clone(), first_batch(), KeyMode::Triple);

    assert_eq!(twice.new_count, 0);
    assert!(!twice.changed());
    assert_eq!(twice.dataset, once);
}

#[test]
fn pair_mode_prunes_stale_versions_from_triple_history() {
    let history = merge(
        merge(Vec::new(), first_batch(), KeyMode::Triple).dataset,
        second_batch(),
        KeyMode::Triple,
    )
    .dataset;
    assert_eq!(history.len(), 4);

    let latest = product("A", "h3", 12.0, "2024-01-03T00:00:00Z");
    let outcome = merge(history, vec![latest.clone()], KeyMode::Pair);

    let rows_for_a: Vec<_> = outcome
        .dataset
        .iter()
        .filter(|record| record.source_id == "A")
        .collect();
    assert_eq!(rows_for_a, vec![&latest]);
    assert_eq!(outcome.updated_count, 1);
    // B keeps both of its versions
    assert_eq!(outcome.dataset.len(), 3);
}

#[test]
fn pair_mode_keeps_latest_record_within_a_batch() {
    let batch = vec![
        product("A", "late", 13.0, "2024-01-05T00:00:00Z"),
        product("A", "early", 12.0, "2024-01-04T00:00:00Z"),
    ];

    let outcome = merge(Vec::new(), batch, KeyMode::Pair);

    assert_eq!(outcome.new_count, 1);
    assert_eq!(outcome.dataset.len(), 1);
    assert_eq!(outcome.dataset[0].raw_hash, "late");
}

#[test]
fn pair_mode_breaks_timestamp_ties_by_input_order() {
    let batch = vec![
        product("A", "first", 1.0, "2024-01-04T00:00:00Z"),
        product("A", "second", 2.0, "2024-01-04T00:00:00Z"),
    ];

    let outcome = merge(Vec::new(), batch, KeyMode::Pair);

    assert_eq!(outcome.dataset.len(), 1);
    assert_eq!(outcome.dataset[0].raw_hash, "second");
}

#[test]
fn pair_mode_orders_by_instant_not_text() {
    // lexically "…09.5Z" < "…09Z", but it is the later capture
    let batch = vec![
        product("A", "fractional", 2.0, "2024-01-04T00:00:09.5Z"),
        product("A", "whole", 1.0, "2024-01-04T00:00:09Z"),
    ];

    let outcome = merge(Vec::new(), batch, KeyMode::Pair);

    assert_eq!(outcome.dataset[0].raw_hash, "fractional");
}

#[test]
fn empty_batch_is_a_no_op() {
    let seeded = merge(Vec::new(), first_batch(), KeyMode::Triple).dataset;

    for mode in [KeyMode::Triple, KeyMode::Pair] {
        let outcome = merge(seeded.clone(), Vec::new(), mode);
        assert_eq!(outcome.new_count, 0);
        assert_eq!(outcome.updated_count, 0);
        assert_eq!(outcome.dataset, seeded);
    }
}

#[test]
fn counts_never_exceed_distinct_incoming_identities() {
    let existing = vec![
        order("o1", "h1", 10.0, "2024-01-01T00:00:00Z"),
        order("o2", "h1", 20.0, "2024-01-01T00:00:00Z"),
    ];
    let batch = vec![
        order("o1", "h2", 11.0, "2024-01-02T00:00:00Z"),
        order("o1", "h3", 12.0, "2024-01-03T00:00:00Z"),
        order("o3", "h1", 30.0, "2024-01-02T00:00:00Z"),
        order("o3", "h1", 30.0, "2024-01-02T00:00:00Z"),
    ];
    let distinct: HashSet<_> = batch.iter().map(|record| record.order_id.clone()).collect();

    for mode in [KeyMode::Triple, KeyMode::Pair] {
        let outcome = merge(existing.clone(), batch.clone(), mode);
        assert!(outcome.new_count + outcome.updated_count <= batch.len());
        if mode == KeyMode::Pair {
            assert!(outcome.new_count + outcome.updated_count <= distinct.len());
            assert_eq!((outcome.new_count, outcome.updated_count), (1, 1));
        }
    }
}

#[test]
fn pair_mode_leaves_one_row_per_order() {
    let existing = vec![order("o1", "h1", 10.0, "2024-01-01T00:00:00Z")];
    let batch = vec![
        order("o1", "h2", 15.0, "2024-01-02T00:00:00Z"),
        order("o2", "h1", 5.0, "2024-01-02T00:00:00Z"),
    ];

    let outcome = merge(existing, batch, KeyMode::Pair);

    assert_eq!(outcome.dataset.len(), 2);
    let o1 = outcome
        .dataset
        .iter()
        .find(|record| record.order_id == "o1")
        .expect("o1 present");
    assert_eq!(o1.total_price, Some(15.0));
}

#[test]
fn unknown_key_mode_is_rejected() {
    let error = "quad".parse::<KeyMode>().expect_err("must fail");

    assert_eq!(
        error,
        ValidationError::InvalidKeyMode {
            value: String::from("quad")
        }
    );
    assert_eq!("pair".parse::<KeyMode>(), Ok(KeyMode::Pair));
}
