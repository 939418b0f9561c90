// cached-purifier/src/purifier.rs
//! The caching gate.
//!
//! `CachedPurifier::purify` derives a content-addressed key for the input,
//! serves a stored output when there is one, and otherwise runs the sanitizer
//! and stores its output. Cache backend failures never reach the caller: a
//! failed lookup is a miss and a failed store is logged and counted.
//!
//! License: MIT OR APACHE 2.0

use log::{debug, info, warn};
use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::config::{EmptyValuePolicy, PurifierOptions, RuleConfig};
use crate::errors::PurifierError;
use crate::inflight::{Flight, InFlight};
use crate::key::{HashAlgorithm, KeyDeriver};
use crate::sanitizer::Sanitizer;
use crate::storage;
use crate::store::CacheStore;

/// Point-in-time view of the gate's counters.
///
/// With a cache configured, every `purify` call lands in exactly one of
/// `hits` or `misses`. A coalesced caller that waited on another caller's
/// computation is a miss, and is also counted in `coalesced_waits`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurifierStats {
    pub hits: u64,
    pub misses: u64,
    pub sanitizations: u64,
    pub lookup_failures: u64,
    pub population_failures: u64,
    pub coalesced_waits: u64,
}

#[derive(Debug, Default)]
struct StatCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    sanitizations: AtomicU64,
    lookup_failures: AtomicU64,
    population_failures: AtomicU64,
    coalesced_waits: AtomicU64,
}

impl StatCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PurifierStats {
        PurifierStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sanitizations: self.sanitizations.load(Ordering::Relaxed),
            lookup_failures: self.lookup_failures.load(Ordering::Relaxed),
            population_failures: self.population_failures.load(Ordering::Relaxed),
            coalesced_waits: self.coalesced_waits.load(Ordering::Relaxed),
        }
    }
}

/// A sanitizer wrapped in a content-addressed output cache.
///
/// Built once per host scope with [`CachedPurifier::new`]. `purify` takes
/// `&self` and may run concurrently; changing the default rule set takes
/// `&mut self`.
pub struct CachedPurifier {
    cache: Option<Arc<dyn CacheStore>>,
    sanitizer: Arc<dyn Sanitizer>,
    default_config: RuleConfig,
    default_fingerprint: OnceLock<String>,
    keys: KeyDeriver,
    ttl: Option<Duration>,
    key_includes_config: bool,
    empty_value_policy: EmptyValuePolicy,
    inflight: Option<InFlight>,
    storage_path: PathBuf,
    storage_permissions: u32,
    stats: StatCounters,
}

impl fmt::Debug for CachedPurifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedPurifier")
            .field("caching", &self.cache.is_some())
            .field("keys", &self.keys)
            .field("ttl", &self.ttl)
            .field("key_includes_config", &self.key_includes_config)
            .field("empty_value_policy", &self.empty_value_policy)
            .field("coalesce_misses", &self.inflight.is_some())
            .field("storage_path", &self.storage_path)
            .finish_non_exhaustive()
    }
}

impl CachedPurifier {
    /// Builds the gate.
    ///
    /// `cache == None` disables caching: every call sanitizes.
    ///
    /// # Errors
    /// `PurifierError::Configuration` if the hash algorithm is unknown, the
    /// cache backend fails its probe, the default rules cannot be loaded, or
    /// the storage directory is unwritable or cannot be created.
    pub fn new(
        options: PurifierOptions,
        sanitizer: Arc<dyn Sanitizer>,
        cache: Option<Arc<dyn CacheStore>>,
    ) -> Result<Self, PurifierError> {
        let ttl = options.ttl();
        let PurifierOptions {
            config,
            cache_path,
            cache_permissions,
            key_prefix,
            hash_algorithm,
            key_includes_config,
            empty_value_policy,
            coalesce_misses,
            ..
        } = options;

        let algorithm: HashAlgorithm = hash_algorithm.parse()?;

        if let Some(store) = &cache {
            store
                .probe()
                .map_err(|e| PurifierError::config(format!("Cache backend is not usable: {}", e)))?;
        }

        let mut default_config = match config {
            Some(config) => config,
            None => RuleConfig::load_default_rules()
                .map_err(|e| PurifierError::config(format!("Failed to load default rules: {:#}", e)))?,
        };

        let storage_path = cache_path.unwrap_or_else(storage::default_storage_path);
        storage::provision_dir(&storage_path, cache_permissions)?;
        default_config.serializer_path = Some(storage_path.clone());
        default_config.serializer_permissions = Some(cache_permissions);

        info!(
            "CachedPurifier ready: caching={}, hash={}, ttl={:?}, key_includes_config={}, coalesce_misses={}",
            cache.is_some(),
            algorithm,
            ttl,
            key_includes_config,
            coalesce_misses
        );

        Ok(Self {
            inflight: (coalesce_misses && cache.is_some()).then(InFlight::new),
            cache,
            sanitizer,
            default_config,
            default_fingerprint: OnceLock::new(),
            keys: KeyDeriver::new(key_prefix, algorithm),
            ttl,
            key_includes_config,
            empty_value_policy,
            storage_path,
            storage_permissions: cache_permissions,
            stats: StatCounters::default(),
        })
    }

    /// Replaces the default rule set if `config` is well-formed.
    ///
    /// Only the shape is checked; the storage settings of the current default
    /// are carried over. Returns whether the replacement happened.
    pub fn set_config(&mut self, config: RuleConfig) -> bool {
        if !config.is_well_formed() {
            warn!("Rejected replacement rule set: every rule needs a name and a pattern.");
            return false;
        }
        self.default_config = self.with_storage(config);
        self.default_fingerprint = OnceLock::new();
        debug!("Default rule set replaced ({} rules).", self.default_config.rules.len());
        true
    }

    pub fn default_config(&self) -> &RuleConfig {
        &self.default_config
    }

    /// Mutable access to the default rule set for in-place adjustment.
    pub fn default_config_mut(&mut self) -> &mut RuleConfig {
        self.default_fingerprint = OnceLock::new();
        &mut self.default_config
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    pub fn key_deriver(&self) -> &KeyDeriver {
        &self.keys
    }

    pub fn is_caching(&self) -> bool {
        self.cache.is_some()
    }

    pub fn stats(&self) -> PurifierStats {
        self.stats.snapshot()
    }

    /// The cache key `purify` would use for `input` under `config`.
    pub fn cache_key(&self, input: &str, config: Option<&RuleConfig>) -> String {
        let (_, fingerprint) = self.effective_config(config);
        self.keys.derive(input, fingerprint.as_deref())
    }

    pub fn purify_default(&self, input: &str) -> Result<String, PurifierError> {
        self.purify(input, None)
    }

    /// Returns the sanitized form of `input`, from cache when possible.
    ///
    /// `config` overrides the default rule set for this call only; a
    /// malformed override is ignored with a warning.
    ///
    /// # Errors
    /// Only sanitizer failures, as `PurifierError::Sanitization`.
    pub fn purify(&self, input: &str, config: Option<&RuleConfig>) -> Result<String, PurifierError> {
        let (effective, fingerprint) = self.effective_config(config);
        let key = self.keys.derive(input, fingerprint.as_deref());

        let Some(cache) = self.cache.as_deref() else {
            return self.sanitize(input, &effective);
        };

        match &self.inflight {
            None => {
                if let Some(hit) = self.lookup(cache, &key) {
                    return Ok(hit);
                }
                self.sanitize_and_store(cache, &key, input, &effective)
            }
            Some(inflight) => {
                // Only the first lookup of a request is counted; re-checks
                // after waiting on a leader are not.
                let mut first_lookup = true;
                loop {
                    if let Some(hit) = self.lookup_as(cache, &key, first_lookup) {
                        return Ok(hit);
                    }
                    first_lookup = false;
                    match inflight.begin(&key) {
                        Flight::Leader(_guard) => {
                            // A previous leader may have stored the value between
                            // our lookup and taking the slot.
                            if let Some(hit) = self.lookup_as(cache, &key, false) {
                                return Ok(hit);
                            }
                            return self.sanitize_and_store(cache, &key, input, &effective);
                        }
                        Flight::Follower(slot) => {
                            debug!("Waiting on in-flight computation for key {}", key);
                            StatCounters::bump(&self.stats.coalesced_waits);
                            // If the leader failed, the next pass finds no value
                            // and one of the waiters takes over.
                            slot.wait();
                        }
                    }
                }
            }
        }
    }

    /// Runs `purify` on tokio's blocking pool.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_purify(
        self: &Arc<Self>,
        input: String,
        config: Option<RuleConfig>,
    ) -> JoinHandle<Result<String, PurifierError>> {
        let this = Arc::clone(self);
        tokio::task::spawn_blocking(move || this.purify(&input, config.as_ref()))
    }

    fn effective_config<'a>(&'a self, config: Option<&'a RuleConfig>) -> (Cow<'a, RuleConfig>, Option<Cow<'a, str>>) {
        let effective = match config {
            Some(config) if config.is_well_formed() => {
                if config.serializer_path.is_some() {
                    Cow::Borrowed(config)
                } else {
                    Cow::Owned(self.with_storage(config.clone()))
                }
            }
            Some(_) => {
                warn!("Ignoring malformed rule set override; using the default rule set.");
                Cow::Borrowed(&self.default_config)
            }
            None => Cow::Borrowed(&self.default_config),
        };

        if !self.key_includes_config {
            return (effective, None);
        }
        let fingerprint = match &effective {
            Cow::Borrowed(c) if std::ptr::eq(*c, &self.default_config) => Cow::Borrowed(
                self.default_fingerprint
                    .get_or_init(|| self.default_config.fingerprint())
                    .as_str(),
            ),
            other => Cow::Owned(other.fingerprint()),
        };
        (effective, Some(fingerprint))
    }

    fn with_storage(&self, mut config: RuleConfig) -> RuleConfig {
        config.serializer_path = Some(self.storage_path.clone());
        config.serializer_permissions = Some(self.storage_permissions);
        config
    }

    fn lookup(&self, cache: &dyn CacheStore, key: &str) -> Option<String> {
        self.lookup_as(cache, key, true)
    }

    /// `counted == false` is used for re-checks, so a request lands in
    /// exactly one of `hits` or `misses`. Backend failures are always counted.
    fn lookup_as(&self, cache: &dyn CacheStore, key: &str, counted: bool) -> Option<String> {
        let record = |counter: &AtomicU64| {
            if counted {
                StatCounters::bump(counter);
            }
        };
        match cache.get(key) {
            Ok(Some(value)) if value.is_empty() && self.empty_value_policy == EmptyValuePolicy::Miss => {
                debug!("Cache entry for key {} is empty; treating as miss.", key);
                record(&self.stats.misses);
                None
            }
            Ok(Some(value)) => {
                debug!("Cache hit for key {} ({} bytes).", key, value.len());
                record(&self.stats.hits);
                Some(value)
            }
            Ok(None) => {
                debug!("Cache miss for key {}.", key);
                record(&self.stats.misses);
                None
            }
            Err(e) => {
                warn!("Cache lookup failed for key {}; recomputing: {}", key, e);
                StatCounters::bump(&self.stats.lookup_failures);
                record(&self.stats.misses);
                None
            }
        }
    }

    fn sanitize(&self, input: &str, config: &RuleConfig) -> Result<String, PurifierError> {
        StatCounters::bump(&self.stats.sanitizations);
        self.sanitizer
            .sanitize(input, config)
            .map_err(PurifierError::Sanitization)
    }

    fn sanitize_and_store(
        &self,
        cache: &dyn CacheStore,
        key: &str,
        input: &str,
        config: &RuleConfig,
    ) -> Result<String, PurifierError> {
        let output = self.sanitize(input, config)?;
        if let Err(e) = cache.put(key, &output, self.ttl) {
            warn!("Failed to store sanitized output for key {}: {}", key, e);
            StatCounters::bump(&self.stats.population_failures);
        }
        Ok(output)
    }
}
