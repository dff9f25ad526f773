//! Write-once archive of raw provider responses.
//!
//! Layout: `<root>/<provider>/<resource>/<stamp>_<run_id>[_<tag>].json`. A
//! name collision (two captures in the same instant) gets a `-<n>` suffix
//! instead of replacing the earlier file.

use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::{CoreError, ProviderId, UtcDateTime};

const MAX_COLLISION_SUFFIX: u32 = 10_000;

/// Where a raw capture was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLocation {
    pub path: PathBuf,
    pub provider: ProviderId,
    pub resource: String,
    pub run_id: String,
    pub tag: Option<String>,
    pub captured_at: UtcDateTime,
}

impl ArchiveLocation {
    /// Provenance string stored as `raw_file` on canonical records.
    pub fn locator(&self) -> String {
        self.path.display().to_string()
    }
}

#[derive(Debug, Clone)]
pub struct RawArchive {
    root: PathBuf,
    clock: Arc<dyn Clock>,
}

impl RawArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_clock(root, Arc::new(SystemClock))
    }

    pub fn with_clock(root: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            root: root.into(),
            clock,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes `payload` to a new file and returns its location. Existing files are never touched.
    pub fn save(
        &self,
        provider: ProviderId,
        resource: &str,
        payload: &Value,
        run_id: &str,
        tag: Option<&str>,
    ) -> Result<ArchiveLocation, CoreError> {
        let captured_at = self.clock.now_utc();
        let tag = tag.map(sanitize_tag).filter(|tag| !tag.is_empty());
        let directory = self.root.join(provider.as_str()).join(resource);
        fs::create_dir_all(&directory)?;

        let mut stem = format!("{}_{run_id}", captured_at.file_stamp());
        if let Some(tag) = &tag {
            stem.push('_');
            stem.push_str(tag);
        }

        let (path, file) = create_unique(&directory, &stem)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, payload)?;
        writer.flush()?;

        debug!(%provider, resource, path = %path.display(), "archived raw payload");
        Ok(ArchiveLocation {
            path,
            provider,
            resource: resource.to_owned(),
            run_id: run_id.to_owned(),
            tag,
            captured_at,
        })
    }
}

fn create_unique(directory: &Path, stem: &str) -> io::Result<(PathBuf, fs::File)> {
    let mut candidate = directory.join(format!("{stem}.json"));
    for suffix in 1..=MAX_COLLISION_SUFFIX {
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => return Ok((candidate, file)),
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
                candidate = directory.join(format!("{stem}-{suffix}.json"));
            }
            Err(error) => return Err(error),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free archive name for '{stem}' in {}", directory.display()),
    ))
}

/// Lower-cases and replaces path-hostile characters so a tag can live in a file name.
pub fn sanitize_tag(tag: &str) -> String {
    tag.trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            ' ' | '/' | '\\' | ':' => '-',
            other => other,
        })
        .collect()
}

/// Recursively re-emits `value` with object keys in sorted order.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key.as_str()]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Compact sorted-key JSON.
pub fn canonical_json(value: &Value) -> String {
    canonicalize(value).to_string()
}

/// SHA-256 hex digest of the canonical JSON encoding; independent of source key order.
pub fn content_hash(payload: &Value) -> String {
    hex::encode(Sha256::digest(canonical_json(payload).as_bytes()))
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use serde_json::json;

    use super::*;
    use crate::clock::ManualClock;

    fn fixed_archive(root: &Path) -> RawArchive {
        let clock = ManualClock::new(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000));
        RawArchive::with_clock(root, Arc::new(clock))
    }

    #[test]
    fn content_hash_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":{"y":[1,2],"x":null}}"#).expect("json");
        let b: Value = serde_json::from_str(r#"{"a":{"x":null,"y":[1,2]},"b":1}"#).expect("json");

        assert_eq!(content_hash(&a), content_hash(&b));
        assert_eq!(canonical_json(&a), r#"{"a":{"x":null,"y":[1,2]},"b":1}"#);
    }

    #[test]
    fn content_hash_distinguishes_payloads() {
        assert_ne!(
            content_hash(&json!({"id": 1, "price": "10.00"})),
            content_hash(&json!({"id": 1, "price": "11.00"}))
        );
        assert_eq!(content_hash(&json!({})).len(), 64);
    }

    #[test]
    fn save_writes_named_file_under_provider_and_resource() {
        let temp = tempfile::tempdir().expect("tempdir");
        let archive = fixed_archive(temp.path());
        let payload = json!({"itemSummaries": [{"itemId": "v1|1|0"}]});

        let location = archive
            .save(ProviderId::Ebay, "search", &payload, "ab12cd34", Some("Running Shoes/Men"))
            .expect("save");

        assert_eq!(
            location.path,
            temp.path()
                .join("ebay")
                .join("search")
                .join("2023-11-14T22-13-20Z_ab12cd34_running-shoes-men.json")
        );
        let stored: Value =
            serde_json::from_str(&fs::read_to_string(&location.path).expect("read")).expect("json");
        assert_eq!(stored, payload);
    }

    #[test]
    fn same_instant_saves_never_overwrite() {
        let temp = tempfile::tempdir().expect("tempdir");
        let archive = fixed_archive(temp.path());

        let first = archive
            .save(ProviderId::Shopify, "products", &json!({"n": 1}), "run1", None)
            .expect("first");
        let second = archive
            .save(ProviderId::Shopify, "products", &json!({"n": 2}), "run1", None)
            .expect("second");

        assert_ne!(first.path, second.path);
        assert!(second.locator().ends_with("_run1-1.json"));
        let first_body: Value =
            serde_json::from_str(&fs::read_to_string(&first.path).expect("read")).expect("json");
        assert_eq!(first_body, json!({"n": 1}));
    }

    #[test]
    fn sanitize_tag_lowercases_and_replaces_separators() {
        assert_eq!(sanitize_tag("Wireless Mouse"), "wireless-mouse");
        assert_eq!(sanitize_tag("a/b"), "a-b");
    }
}
