//! Persisted dataset boundary.
//!
//! The pipeline needs only a full read and a full overwrite per entity table.

use std::sync::RwLock;

use thiserror::Error;

use crate::domain::{CanonicalOrderRecord, CanonicalProductRecord, EntityKind};

/// Failure reported by a [`DatasetStore`] implementation.
#[derive(Debug, Error)]
#[error("{entity} dataset: {message}")]
pub struct DatasetError {
    pub entity: &'static str,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl DatasetError {
    pub fn new(entity: EntityKind, message: impl Into<String>) -> Self {
        Self {
            entity: entity.as_str(),
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        entity: EntityKind,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            entity: entity.as_str(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }
}

pub trait DatasetStore: Send + Sync {
    fn load_products(&self) -> Result<Vec<CanonicalProductRecord>, DatasetError>;

    fn overwrite_products(&self, rows: &[CanonicalProductRecord]) -> Result<(), DatasetError>;

    fn load_orders(&self) -> Result<Vec<CanonicalOrderRecord>, DatasetError>;

    fn overwrite_orders(&self, rows: &[CanonicalOrderRecord]) -> Result<(), DatasetError>;
}

/// Volatile store for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryDatasetStore {
    products: RwLock<Vec<CanonicalProductRecord>>,
    orders: RwLock<Vec<CanonicalOrderRecord>>,
}

impl InMemoryDatasetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_products(self, rows: Vec<CanonicalProductRecord>) -> Self {
        Self {
            products: RwLock::new(rows),
            ..self
        }
    }

    pub fn with_orders(self, rows: Vec<CanonicalOrderRecord>) -> Self {
        Self {
            orders: RwLock::new(rows),
            ..self
        }
    }
}

fn poisoned(entity: EntityKind) -> DatasetError {
    DatasetError::new(entity, "in-memory store lock poisoned")
}

impl DatasetStore for InMemoryDatasetStore {
    fn load_products(&self) -> Result<Vec<CanonicalProductRecord>, DatasetError> {
        self.products
            .read()
            .map(|rows| rows.clone())
            .map_err(|_| poisoned(EntityKind::Products))
    }

    fn overwrite_products(&self, rows: &[CanonicalProductRecord]) -> Result<(), DatasetError> {
        let mut stored = self
            .products
            .write()
            .map_err(|_| poisoned(EntityKind::Products))?;
        *stored = rows.to_vec();
        Ok(())
    }

    fn load_orders(&self) -> Result<Vec<CanonicalOrderRecord>, DatasetError> {
        self.orders
            .read()
            .map(|rows| rows.clone())
            .map_err(|_| poisoned(EntityKind::Orders))
    }

    fn overwrite_orders(&self, rows: &[CanonicalOrderRecord]) -> Result<(), DatasetError> {
        let mut stored = self
            .orders
            .write()
            .map_err(|_| poisoned(EntityKind::Orders))?;
        *stored = rows.to_vec();
        Ok(())
    }
}
