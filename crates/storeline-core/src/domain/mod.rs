//! Canonical domain records.
//!
//! | Type | Identity key | Timestamp used for ordering |
//! |------|--------------|-----------------------------|
//! | [`CanonicalProductRecord`] | `(source, source_id)` | `collected_at` |
//! | [`CanonicalOrderRecord`] | `(source, order_id)` | `ingested_at` |

pub mod models;
pub mod timestamp;

pub use models::{
    CanonicalOrderRecord, CanonicalProductRecord, EntityKind, IdentityKey, VersionKey,
};
pub use timestamp::UtcDateTime;
