//! Core contracts for storeline.
//!
//! This crate contains:
//! - Canonical product and order records with their identity and version keys
//! - Per-provider rate limiting and the resilient HTTP transport
//! - The content cache and the write-once raw archive
//! - Provider sources and payload normalizers
//! - The merge/reconciliation engine and the run ledger
//! - Pipeline orchestration and configuration

pub mod adapters;
pub mod archive;
pub mod cache;
pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod http_client;
pub mod ledger;
pub mod merge;
pub mod normalize;
pub mod pipeline;
pub mod retry;
pub mod source;
pub mod store;
pub mod throttling;
pub mod transport;

pub use adapters::{
    FetchOptions, MockSource, PayloadFormat, ProviderSource, RawCapture, SyntheticCatalog,
    SyntheticFallback,
};
pub use archive::{canonical_json, content_hash, ArchiveLocation, RawArchive};
pub use cache::{CacheBackend, ContentCache, FsCacheBackend, MemoryCacheBackend};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, PipelineConfig};
pub use domain::{
    CanonicalOrderRecord, CanonicalProductRecord, EntityKind, IdentityKey, UtcDateTime,
    VersionKey,
};
pub use error::{CoreError, ValidationError};
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient,
    ScriptedHttpClient,
};
pub use ledger::{RunLedger, RunLedgerEntry, RunStatus};
pub use merge::{merge, KeyMode, MergeGate, MergeOutcome, Reconcilable};
pub use pipeline::{
    Pipeline, PipelineError, ProviderReport, ProviderStatus, RunOptions, RunReport,
};
pub use retry::{Backoff, RetryPolicy};
pub use source::ProviderId;
pub use store::{DatasetError, DatasetStore, InMemoryDatasetStore};
pub use throttling::{RateLimiter, RateLimiterRegistry};
pub use transport::{ResilientTransport, TransportError, TransportErrorKind};
