//! Ingestion run orchestration.
//!
//! A run fetches every enabled provider concurrently, archives and normalizes
//! each raw capture, reconciles the batch with the persisted dataset under the
//! requested [`KeyMode`] and appends one entry to the run ledger.
//!
//! Provider failures stay local to the provider: they are logged and, with
//! `fake` set, replaced by synthetic captures. Only failures of the archive,
//! the dataset store or the merge step flip the run to `error`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::adapters::{
    normalize_capture, AmazonCredentials, AmazonSource, EbayCredentials, EbaySource, FetchOptions,
    MockSource, NormalizedBatch, ProviderSource, RawCapture, ShopifyCredentials, ShopifySource,
    SyntheticCatalog, SyntheticFallback,
};
use crate::archive::{content_hash, RawArchive};
use crate::cache::ContentCache;
use crate::clock::{Clock, SystemClock};
use crate::config::{process_env, PipelineConfig};
use crate::http_client::HttpClient;
use crate::ledger::{RunLedger, RunLedgerEntry, RunStatus};
use crate::merge::{merge, KeyMode, MergeGate, MergeOutcome, Reconcilable};
use crate::normalize::Provenance;
use crate::retry::RetryPolicy;
use crate::store::{DatasetError, DatasetStore};
use crate::throttling::RateLimiterRegistry;
use crate::transport::{ResilientTransport, TransportError};
use crate::{CoreError, ProviderId, UtcDateTime};

const AUTO_RUN_ID: &str = "auto";

type EnvLookup = dyn Fn(&str) -> Option<String> + Send + Sync;

/// Failures that abort a run and mark its ledger entry as `error`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to archive {provider}/{resource}: {source}")]
    Archive {
        provider: ProviderId,
        resource: String,
        #[source]
        source: CoreError,
    },

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error("failed to append run ledger entry: {0}")]
    Ledger(#[source] CoreError),
}

/// Per-run switches, usually taken from the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// `auto` generates a short random id.
    pub run_id: String,
    pub providers: Option<Vec<ProviderId>>,
    pub dry_run: bool,
    pub no_cache: bool,
    pub limit: Option<u32>,
    pub ttl: Option<Duration>,
    pub key_mode: KeyMode,
    pub fake: bool,
    pub fake_only: bool,
    pub seed: Option<u64>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            run_id: String::from(AUTO_RUN_ID),
            providers: None,
            dry_run: false,
            no_cache: false,
            limit: None,
            ttl: None,
            key_mode: KeyMode::default(),
            fake: false,
            fake_only: false,
            seed: None,
        }
    }
}

/// `auto` (or blank) becomes 8 hex characters of a v4 UUID.
pub fn resolve_run_id(requested: &str) -> String {
    let requested = requested.trim();
    if requested.is_empty() || requested == AUTO_RUN_ID {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(8);
        id
    } else {
        requested.to_owned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStatus {
    Fetched,
    /// Real fetch skipped or failed; synthetic captures were used.
    Synthetic,
    Failed,
}

impl ProviderStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fetched => "fetched",
            Self::Synthetic => "synthetic",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderReport {
    pub provider: ProviderId,
    pub status: ProviderStatus,
    pub captures: usize,
    pub error: Option<String>,
}

/// Everything a caller needs to know about a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    pub started_at: UtcDateTime,
    pub finished_at: UtcDateTime,
    pub dry_run: bool,
    pub key_mode: KeyMode,
    pub raw_files: Vec<PathBuf>,
    pub new_products: usize,
    pub updated_products: usize,
    pub new_orders: usize,
    pub updated_orders: usize,
    pub providers: Vec<ProviderReport>,
    pub error: Option<String>,
}

impl RunReport {
    pub fn ledger_entry(&self) -> RunLedgerEntry {
        RunLedgerEntry {
            run_id: self.run_id.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            status: self.status,
            raw_files_count: self.raw_files.len() as u64,
            new_products: self.new_products as u64,
            updated_products: self.updated_products as u64,
            new_orders: self.new_orders as u64,
            updated_orders: self.updated_orders as u64,
            providers: self.providers.iter().map(|report| report.provider).collect(),
            error: self.error.clone(),
        }
    }
}

/// Ingestion pipeline bound to one configuration and one dataset store.
pub struct Pipeline {
    config: PipelineConfig,
    http: Arc<dyn HttpClient>,
    store: Arc<dyn DatasetStore>,
    clock: Arc<dyn Clock>,
    env: Arc<EnvLookup>,
    ledger: RunLedger,
    gate: MergeGate,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        http: Arc<dyn HttpClient>,
        store: Arc<dyn DatasetStore>,
    ) -> Self {
        let ledger = RunLedger::new(config.paths.ledger_path.clone());
        Self {
            config,
            http,
            store,
            clock: Arc::new(SystemClock),
            env: Arc::new(process_env),
            ledger,
            gate: MergeGate::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the process environment as the source of credentials and rate overrides.
    pub fn with_env(mut self, env: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        self.env = Arc::new(env);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &RunLedger {
        &self.ledger
    }

    /// Executes one run.
    ///
    /// Run-level failures are reported through [`RunReport::status`]; the
    /// returned error is reserved for a ledger that cannot be written.
    pub async fn run(&self, options: &RunOptions) -> Result<RunReport, PipelineError> {
        let run_id = resolve_run_id(&options.run_id);
        let providers = self.config.enabled_providers(options.providers.as_deref());
        let mut report = RunReport {
            run_id: run_id.clone(),
            status: RunStatus::Success,
            started_at: self.clock.now_utc(),
            finished_at: self.clock.now_utc(),
            dry_run: options.dry_run,
            key_mode: options.key_mode,
            raw_files: Vec::new(),
            new_products: 0,
            updated_products: 0,
            new_orders: 0,
            updated_orders: 0,
            providers: Vec::new(),
            error: None,
        };
        info!(
            run_id = %run_id,
            key_mode = %options.key_mode,
            providers = ?providers,
            dry_run = options.dry_run,
            "starting ingestion run"
        );

        if let Err(failure) = self.ingest(&run_id, &providers, options, &mut report).await {
            error!(run_id = %run_id, error = %failure, "ingestion run failed");
            report.status = RunStatus::Error;
            report.error = Some(failure.to_string());
        }
        report.finished_at = self.clock.now_utc();

        if !options.dry_run {
            self.ledger
                .append(&report.ledger_entry())
                .map_err(PipelineError::Ledger)?;
        }
        info!(
            run_id = %run_id,
            status = %report.status,
            raw_files = report.raw_files.len(),
            new_products = report.new_products,
            updated_products = report.updated_products,
            new_orders = report.new_orders,
            updated_orders = report.updated_orders,
            "ingestion run finished"
        );
        Ok(report)
    }

    async fn ingest(
        &self,
        run_id: &str,
        providers: &[ProviderId],
        options: &RunOptions,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        let catalog = Arc::new(SyntheticCatalog::new(options.seed));
        let fallback = SyntheticFallback::new(Arc::clone(&catalog), Arc::clone(&self.clock));
        let fetch_options = FetchOptions {
            limit: options.limit,
            default_limit: self.config.defaults.limit,
            default_max_pages: self.config.defaults.max_pages,
            use_cache: !options.no_cache,
            cache_ttl: options.ttl.unwrap_or_else(|| self.config.cache_ttl()),
        };

        let mut fetched = self.fetch_all(providers, options, &fetch_options, &catalog).await;
        let archive = RawArchive::with_clock(&self.config.paths.raw_dir, Arc::clone(&self.clock));
        let mut batch = NormalizedBatch::default();

        for &provider in providers {
            let outcome = fetched
                .remove(&provider)
                .unwrap_or_else(|| Err(TransportError::network("fetch task did not complete")));
            let (status, captures, failure) = match outcome {
                Ok(captures) => (ProviderStatus::Fetched, captures, None),
                Err(failure) if options.fake || options.fake_only => {
                    warn!(
                        %provider,
                        code = failure.code(),
                        error = %failure,
                        "provider fetch failed, using synthetic data"
                    );
                    let captures = fallback.captures(provider, &self.config, &fetch_options);
                    (ProviderStatus::Synthetic, captures, Some(failure))
                }
                Err(failure) => {
                    warn!(
                        %provider,
                        code = failure.code(),
                        error = %failure,
                        "provider skipped"
                    );
                    (ProviderStatus::Failed, Vec::new(), Some(failure))
                }
            };

            report.providers.push(ProviderReport {
                provider,
                status,
                captures: captures.len(),
                error: failure.map(|failure| failure.to_string()),
            });
            for capture in &captures {
                let location = archive
                    .save(
                        provider,
                        &capture.resource,
                        &capture.payload,
                        run_id,
                        capture.tag.as_deref(),
                    )
                    .map_err(|source| PipelineError::Archive {
                        provider,
                        resource: capture.resource.clone(),
                        source,
                    })?;
                let provenance = Provenance {
                    raw_file: location.locator(),
                    raw_hash: content_hash(&capture.payload),
                    collected_at: self.clock.now_utc(),
                };
                batch.extend(normalize_capture(provider, capture, &provenance));
                report.raw_files.push(location.path);
            }
        }

        let products = self
            .reconcile(
                batch.products,
                options.key_mode,
                options.dry_run,
                |store| store.load_products(),
                |store, rows| store.overwrite_products(rows),
            )
            .await?;
        report.new_products = products.new_count;
        report.updated_products = products.updated_count;

        let orders = self
            .reconcile(
                batch.orders,
                options.key_mode,
                options.dry_run,
                |store| store.load_orders(),
                |store, rows| store.overwrite_orders(rows),
            )
            .await?;
        report.new_orders = orders.new_count;
        report.updated_orders = orders.updated_count;

        Ok(())
    }

    /// Runs every provider fetch on its own task so one provider's backoff never stalls another.
    async fn fetch_all(
        &self,
        providers: &[ProviderId],
        options: &RunOptions,
        fetch_options: &FetchOptions,
        catalog: &Arc<SyntheticCatalog>,
    ) -> HashMap<ProviderId, Result<Vec<RawCapture>, TransportError>> {
        let registry = RateLimiterRegistry::new(self.config.rates(|name| (self.env)(name)));
        let cache = ContentCache::new(
            Arc::new(crate::cache::FsCacheBackend::new(&self.config.paths.cache_dir)),
            Arc::clone(&self.clock),
        );
        let timeout = self.config.fetch_timeout();
        let mut results = HashMap::new();
        let mut tasks = JoinSet::new();

        for &provider in providers {
            if !self.config.has_requests(provider) {
                info!(%provider, "nothing configured to fetch");
                results.insert(provider, Ok(Vec::new()));
                continue;
            }
            if options.fake_only && provider != ProviderId::Mock {
                results.insert(
                    provider,
                    Err(TransportError::network("real provider calls disabled (fake-only)")),
                );
                continue;
            }

            let source = match self.build_source(provider, &registry, &cache, catalog) {
                Ok(source) => source,
                Err(failure) => {
                    results.insert(provider, Err(failure));
                    continue;
                }
            };
            let fetch_options = fetch_options.clone();
            tasks.spawn(async move {
                let fetch = source.fetch(&fetch_options);
                let outcome = if timeout.is_zero() {
                    fetch.await
                } else {
                    match tokio::time::timeout(timeout, fetch).await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(TransportError::network(format!(
                            "fetch timed out after {}s",
                            timeout.as_secs()
                        ))),
                    }
                };
                (source.id(), outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((provider, outcome)) => {
                    results.insert(provider, outcome);
                }
                Err(join_error) => {
                    error!(error = %join_error, "provider fetch task aborted");
                }
            }
        }
        results
    }

    fn build_source(
        &self,
        provider: ProviderId,
        registry: &RateLimiterRegistry,
        cache: &ContentCache,
        catalog: &Arc<SyntheticCatalog>,
    ) -> Result<Arc<dyn ProviderSource>, TransportError> {
        let env = |name: &str| (self.env)(name);
        let transport = ResilientTransport::new(
            provider,
            Arc::clone(&self.http),
            registry.for_provider(provider),
            RetryPolicy::exponential(self.config.defaults.retries),
        );
        let providers = &self.config.providers;

        let source: Arc<dyn ProviderSource> = match provider {
            ProviderId::Shopify => Arc::new(ShopifySource::new(
                transport,
                cache.clone(),
                ShopifyCredentials::from_env(&env)?,
                &providers.shopify.clone().unwrap_or_default(),
            )),
            ProviderId::Amazon => Arc::new(AmazonSource::new(
                transport,
                AmazonCredentials::from_env(&env)?,
                &providers.amazon.clone().unwrap_or_default(),
            )),
            ProviderId::Ebay => Arc::new(EbaySource::new(
                transport,
                cache.clone(),
                EbayCredentials::from_env(&env)?,
                &providers.ebay.clone().unwrap_or_default(),
            )),
            ProviderId::Mock => Arc::new(MockSource::new(
                Arc::clone(catalog),
                Arc::clone(&self.clock),
                &providers.mock.clone().unwrap_or_default(),
            )),
        };
        Ok(source)
    }

    /// Load, merge and persist one entity table while holding its merge gate.
    async fn reconcile<T: Reconcilable>(
        &self,
        batch: Vec<T>,
        mode: KeyMode,
        dry_run: bool,
        load: impl FnOnce(&dyn DatasetStore) -> Result<Vec<T>, DatasetError>,
        persist: impl FnOnce(&dyn DatasetStore, &[T]) -> Result<(), DatasetError>,
    ) -> Result<MergeOutcome<T>, PipelineError> {
        if batch.is_empty() {
            return Ok(MergeOutcome {
                dataset: Vec::new(),
                new_count: 0,
                updated_count: 0,
            });
        }

        let _guard = self.gate.lock(T::ENTITY).await;
        let existing = load(self.store.as_ref())?;
        let outcome = merge(existing, batch, mode);

        if outcome.changed() && !dry_run {
            persist(self.store.as_ref(), &outcome.dataset)?;
        }
        info!(
            entity = T::ENTITY.as_str(),
            new = outcome.new_count,
            updated = outcome.updated_count,
            total = outcome.dataset.len(),
            persisted = outcome.changed() && !dry_run,
            "reconciled batch"
        );
        Ok(outcome)
    }
}
