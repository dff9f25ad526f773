//! Reconciliation of a normalized batch against the persisted dataset.
//!
//! Two policies are supported:
//!
//! | Mode | Identity | Existing rows | Counts |
//! |------|----------|---------------|--------|
//! | [`KeyMode::Triple`] | `(source, id, raw_hash)` | kept; history accumulates | every appended version is new |
//! | [`KeyMode::Pair`] | `(source, id)` | superseded by the latest batch record | new vs. updated identity keys |
//!
//! Merges read and then rewrite a whole entity table, so callers must hold the
//! entity's [`MergeGate`] lock for the full load-merge-persist sequence.

use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

use crate::domain::{
    CanonicalOrderRecord, CanonicalProductRecord, EntityKind, IdentityKey, VersionKey,
};
use crate::{UtcDateTime, ValidationError};

/// Key-consistency policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyMode {
    /// Keep every distinct raw capture of an entity.
    #[default]
    Triple,
    /// Keep one row per entity, latest capture wins.
    Pair,
}

impl KeyMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Triple => "triple",
            Self::Pair => "pair",
        }
    }
}

impl Display for KeyMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyMode {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "triple" => Ok(Self::Triple),
            "pair" => Ok(Self::Pair),
            _ => Err(ValidationError::InvalidKeyMode {
                value: value.to_owned(),
            }),
        }
    }
}

/// A canonical record the engine can reconcile.
pub trait Reconcilable: Clone {
    const ENTITY: EntityKind;

    fn identity_key(&self) -> IdentityKey;

    fn version_key(&self) -> VersionKey {
        let (source, id) = self.identity_key();
        (source, id, self.raw_hash().to_owned())
    }

    fn raw_hash(&self) -> &str;

    /// Capture time used to pick the latest record in pair mode.
    fn observed_at(&self) -> UtcDateTime;
}

impl Reconcilable for CanonicalProductRecord {
    const ENTITY: EntityKind = EntityKind::Products;

    fn identity_key(&self) -> IdentityKey {
        (self.source, self.source_id.clone())
    }

    fn raw_hash(&self) -> &str {
        &self.raw_hash
    }

    fn observed_at(&self) -> UtcDateTime {
        self.collected_at
    }
}

impl Reconcilable for CanonicalOrderRecord {
    const ENTITY: EntityKind = EntityKind::Orders;

    fn identity_key(&self) -> IdentityKey {
        (self.source, self.order_id.clone())
    }

    fn raw_hash(&self) -> &str {
        &self.raw_hash
    }

    fn observed_at(&self) -> UtcDateTime {
        self.ingested_at
    }
}

/// Result of one merge.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome<T> {
    pub dataset: Vec<T>,
    pub new_count: usize,
    pub updated_count: usize,
}

impl<T> MergeOutcome<T> {
    /// Whether the dataset differs from what was persisted.
    pub fn changed(&self) -> bool {
        self.new_count > 0 || self.updated_count > 0
    }
}

/// Merges `batch` into `existing` under `mode`.
pub fn merge<T: Reconcilable>(existing: Vec<T>, batch: Vec<T>, mode: KeyMode) -> MergeOutcome<T> {
    if batch.is_empty() {
        return MergeOutcome {
            dataset: existing,
            new_count: 0,
            updated_count: 0,
        };
    }

    match mode {
        KeyMode::Triple => merge_versions(existing, batch),
        KeyMode::Pair => merge_latest(existing, batch),
    }
}

fn merge_versions<T: Reconcilable>(existing: Vec<T>, batch: Vec<T>) -> MergeOutcome<T> {
    let mut seen: HashSet<VersionKey> = existing.iter().map(Reconcilable::version_key).collect();
    let mut dataset = existing;
    let mut new_count = 0;

    for record in batch {
        if seen.insert(record.version_key()) {
            dataset.push(record);
            new_count += 1;
        }
    }

    MergeOutcome {
        dataset,
        new_count,
        updated_count: 0,
    }
}

fn merge_latest<T: Reconcilable>(existing: Vec<T>, batch: Vec<T>) -> MergeOutcome<T> {
    let latest = latest_per_identity(batch);
    let incoming: HashSet<IdentityKey> = latest.iter().map(Reconcilable::identity_key).collect();
    let persisted: HashSet<IdentityKey> = existing.iter().map(Reconcilable::identity_key).collect();

    let updated_count = incoming.intersection(&persisted).count();
    let new_count = incoming.len() - updated_count;

    let mut dataset: Vec<T> = existing
        .into_iter()
        .filter(|record| !incoming.contains(&record.identity_key()))
        .collect();
    dataset.extend(latest);

    MergeOutcome {
        dataset,
        new_count,
        updated_count,
    }
}

/// Keeps the latest record per identity key; ties go to the later input.
///
/// The result is ordered by capture time.
pub fn latest_per_identity<T: Reconcilable>(batch: Vec<T>) -> Vec<T> {
    let mut ordered = batch;
    ordered.sort_by_key(Reconcilable::observed_at);

    let mut seen = HashSet::new();
    let mut kept: Vec<T> = ordered
        .into_iter()
        .rev()
        .filter(|record| seen.insert(record.identity_key()))
        .collect();
    kept.reverse();
    kept
}

/// Serialises merges per entity table.
#[derive(Debug, Default)]
pub struct MergeGate {
    products: Mutex<()>,
    orders: Mutex<()>,
}

impl MergeGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Held for the whole load, merge and persist of `entity`.
    pub async fn lock(&self, entity: EntityKind) -> MutexGuard<'_, ()> {
        match entity {
            EntityKind::Products => self.products.lock().await,
            EntityKind::Orders => self.orders.lock().await,
        }
    }
}
