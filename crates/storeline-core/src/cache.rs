//! Content-addressed response cache.
//!
//! Entries are addressed by `(provider, sha256(key_parts...))`. Reads honour an
//! optional TTL measured against the entry's `stored_at`; writes are
//! best-effort and never surface an error to the caller.

use std::collections::HashMap;
use std::fmt::Debug;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::ProviderId;

/// A cached provider response.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub provider: ProviderId,
    pub key_hash: String,
    pub payload: Value,
    pub stored_at: SystemTime,
}

/// Blob as held by a backend, before JSON decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub body: String,
    pub stored_at: SystemTime,
}

/// Key-value blob store addressed by `(provider, sha256_hex)`.
pub trait CacheBackend: Send + Sync + Debug {
    fn read(&self, provider: ProviderId, key_hash: &str) -> io::Result<Option<StoredBlob>>;

    fn write(
        &self,
        provider: ProviderId,
        key_hash: &str,
        body: &str,
        stored_at: SystemTime,
    ) -> io::Result<()>;
}

/// Stores one `<root>/<provider>/<hash>.json` file per entry; age comes from the file mtime.
#[derive(Debug, Clone)]
pub struct FsCacheBackend {
    root: PathBuf,
}

impl FsCacheBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_path(&self, provider: ProviderId, key_hash: &str) -> PathBuf {
        self.root
            .join(provider.as_str())
            .join(format!("{key_hash}.json"))
    }
}

impl CacheBackend for FsCacheBackend {
    fn read(&self, provider: ProviderId, key_hash: &str) -> io::Result<Option<StoredBlob>> {
        let path = self.entry_path(provider, key_hash);
        let body = match fs::read_to_string(&path) {
            Ok(body) => body,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error),
        };
        let stored_at = fs::metadata(&path)?.modified()?;
        Ok(Some(StoredBlob { body, stored_at }))
    }

    fn write(
        &self,
        provider: ProviderId,
        key_hash: &str,
        body: &str,
        stored_at: SystemTime,
    ) -> io::Result<()> {
        let path = self.entry_path(provider, key_hash);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write aside and rename so readers never observe a torn entry.
        let staging = path.with_extension("json.tmp");
        let mut file = File::create(&staging)?;
        file.write_all(body.as_bytes())?;
        file.set_modified(stored_at)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&staging, &path)
    }
}

/// Process-local backend used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryCacheBackend {
    entries: RwLock<HashMap<(ProviderId, String), StoredBlob>>,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheBackend for MemoryCacheBackend {
    fn read(&self, provider: ProviderId, key_hash: &str) -> io::Result<Option<StoredBlob>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| io::Error::other("memory cache lock poisoned"))?;
        Ok(entries.get(&(provider, key_hash.to_owned())).cloned())
    }

    fn write(
        &self,
        provider: ProviderId,
        key_hash: &str,
        body: &str,
        stored_at: SystemTime,
    ) -> io::Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| io::Error::other("memory cache lock poisoned"))?;
        entries.insert(
            (provider, key_hash.to_owned()),
            StoredBlob {
                body: body.to_owned(),
                stored_at,
            },
        );
        Ok(())
    }
}

/// Deterministic cache key: SHA-256 over the concatenated parts, hex encoded.
///
/// Order matters; `["products", "50", "first"]` and `["50", "products", "first"]`
/// address different entries.
pub fn key_hash<S: AsRef<str>>(parts: &[S]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_ref().as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Response cache facade over a [`CacheBackend`].
#[derive(Debug, Clone)]
pub struct ContentCache {
    backend: Arc<dyn CacheBackend>,
    clock: Arc<dyn Clock>,
}

impl ContentCache {
    pub fn new(backend: Arc<dyn CacheBackend>, clock: Arc<dyn Clock>) -> Self {
        Self { backend, clock }
    }

    /// Filesystem cache rooted at `root` using the system clock.
    pub fn on_disk(root: impl Into<PathBuf>) -> Self {
        Self::new(
            Arc::new(FsCacheBackend::new(root)),
            Arc::new(SystemClock),
        )
    }

    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self::new(Arc::new(MemoryCacheBackend::new()), clock)
    }

    /// Cached entry for `key_parts`, or `None` when absent, unreadable or older than `ttl`.
    ///
    /// A zero `ttl` disables the age check.
    pub fn entry<S: AsRef<str>>(
        &self,
        provider: ProviderId,
        key_parts: &[S],
        ttl: Duration,
    ) -> Option<CacheEntry> {
        let key_hash = key_hash(key_parts);
        let blob = match self.backend.read(provider, &key_hash) {
            Ok(Some(blob)) => blob,
            Ok(None) => return None,
            Err(error) => {
                warn!(%provider, key_hash = %key_hash, %error, "cache read failed, treating as miss");
                return None;
            }
        };

        if !ttl.is_zero() {
            let age = self
                .clock
                .now()
                .duration_since(blob.stored_at)
                .unwrap_or(Duration::ZERO);
            if age > ttl {
                debug!(%provider, key_hash = %key_hash, age_secs = age.as_secs(), "cache entry expired");
                return None;
            }
        }

        match serde_json::from_str(&blob.body) {
            Ok(payload) => Some(CacheEntry {
                provider,
                key_hash,
                payload,
                stored_at: blob.stored_at,
            }),
            Err(error) => {
                warn!(%provider, key_hash = %key_hash, %error, "cache entry is not valid JSON, ignoring");
                None
            }
        }
    }

    pub fn get<S: AsRef<str>>(
        &self,
        provider: ProviderId,
        key_parts: &[S],
        ttl: Duration,
    ) -> Option<Value> {
        self.entry(provider, key_parts, ttl).map(|entry| entry.payload)
    }

    /// Stores `payload`. Failures are logged and swallowed.
    pub fn put<S: AsRef<str>>(&self, provider: ProviderId, key_parts: &[S], payload: &Value) {
        let key_hash = key_hash(key_parts);
        let body = match serde_json::to_string(payload) {
            Ok(body) => body,
            Err(error) => {
                warn!(%provider, key_hash = %key_hash, %error, "cache payload could not be serialised");
                return;
            }
        };

        if let Err(error) = self
            .backend
            .write(provider, &key_hash, &body, self.clock.now())
        {
            warn!(%provider, key_hash = %key_hash, %error, "cache write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::clock::ManualClock;

    fn epoch_clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000),
        ))
    }

    #[test]
    fn key_hash_is_order_sensitive_sha256() {
        assert_eq!(
            key_hash(&["abc"]),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(key_hash(&["a", "bc"]), key_hash(&["abc"]));
        assert_ne!(
            key_hash(&["products", "50", "first"]),
            key_hash(&["50", "products", "first"])
        );
    }

    #[test]
    fn put_then_get_without_ttl_returns_payload() {
        let clock = epoch_clock();
        let cache = ContentCache::in_memory(clock.clone());
        let payload = json!({"products": [{"id": 1}]});

        cache.put(ProviderId::Shopify, &["products", "50", "first"], &payload);
        clock.advance(Duration::from_secs(365 * 24 * 3600));

        assert_eq!(
            cache.get(ProviderId::Shopify, &["products", "50", "first"], Duration::ZERO),
            Some(payload)
        );
    }

    #[test]
    fn entries_older_than_ttl_are_absent() {
        let clock = epoch_clock();
        let cache = ContentCache::in_memory(clock.clone());
        let parts = ["search", "shoes", "5"];

        cache.put(ProviderId::Ebay, &parts, &json!({"itemSummaries": []}));
        clock.advance(Duration::from_secs(60));
        assert!(cache
            .get(ProviderId::Ebay, &parts, Duration::from_secs(60))
            .is_some());

        clock.advance(Duration::from_secs(1));
        assert!(cache
            .get(ProviderId::Ebay, &parts, Duration::from_secs(60))
            .is_none());
    }

    #[test]
    fn namespaces_are_per_provider() {
        let cache = ContentCache::in_memory(epoch_clock());
        cache.put(ProviderId::Shopify, &["products"], &json!([1]));

        assert!(cache
            .get(ProviderId::Mock, &["products"], Duration::ZERO)
            .is_none());
    }

    #[test]
    fn filesystem_backend_uses_mtime_for_age() {
        let temp = tempfile::tempdir().expect("tempdir");
        let clock = epoch_clock();
        let backend = Arc::new(FsCacheBackend::new(temp.path()));
        let cache = ContentCache::new(backend.clone(), clock.clone());
        let payload = json!({"orders": [{"id": 42}]});

        cache.put(ProviderId::Shopify, &["orders", "any", "50", "first"], &payload);

        let path = backend.entry_path(
            ProviderId::Shopify,
            &key_hash(&["orders", "any", "50", "first"]),
        );
        assert!(path.exists());
        assert_eq!(
            cache.get(
                ProviderId::Shopify,
                &["orders", "any", "50", "first"],
                Duration::from_secs(3600)
            ),
            Some(payload)
        );

        clock.advance(Duration::from_secs(7200));
        assert!(cache
            .get(
                ProviderId::Shopify,
                &["orders", "any", "50", "first"],
                Duration::from_secs(3600)
            )
            .is_none());
    }

    #[test]
    fn write_failures_are_swallowed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let blocker = temp.path().join("not-a-dir");
        fs::write(&blocker, b"file").expect("write blocker");
        let cache = ContentCache::new(Arc::new(FsCacheBackend::new(&blocker)), epoch_clock());

        cache.put(ProviderId::Amazon, &["items", "B000"], &json!({"ok": true}));

        assert!(cache
            .get(ProviderId::Amazon, &["items", "B000"], Duration::ZERO)
            .is_none());
    }

    #[test]
    fn corrupt_entries_read_as_misses() {
        let temp = tempfile::tempdir().expect("tempdir");
        let backend = FsCacheBackend::new(temp.path());
        let hash = key_hash(&["products"]);
        let path = backend.entry_path(ProviderId::Mock, &hash);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(&path, "{truncated").expect("write");

        let cache = ContentCache::new(Arc::new(backend), epoch_clock());
        assert!(cache
            .get(ProviderId::Mock, &["products"], Duration::ZERO)
            .is_none());
    }
}
