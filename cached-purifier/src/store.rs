// cached-purifier/src/store.rs
//! The cache backend seam.
//!
//! `CacheStore` is the only contract the gate relies on: a plain get/put with
//! an optional time-to-live. No iteration, ordering, transactions or
//! compare-and-set are assumed. `MemoryStore` is an in-process implementation
//! for single-process hosts and tests.
//!
//! License: MIT OR APACHE 2.0

use log::debug;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Failures reported by a cache backend.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CacheError {
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("Cache backend rejected write for key '{key}': {reason}")]
    WriteRejected { key: String, reason: String },
}

/// Key-value store consumed by `CachedPurifier`.
///
/// `get` reports a clean miss as `Ok(None)`; an `Err` means the lookup
/// itself failed.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Stores `value` under `key`. `ttl == None` means no expiration.
    fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Checked once when a purifier is built. A backend that cannot serve
    /// requests at all should fail here.
    fn probe(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| now < deadline)
    }
}

/// A thread-safe in-memory store with per-entry expiration.
///
/// Expired entries are invisible to `get` and are dropped on the next
/// `purge_expired` or when their key is overwritten.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, StoredValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes expired entries and returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, stored| stored.is_live(now));
        let purged = before - entries.len();
        if purged > 0 {
            debug!("Purged {} expired entries from memory store.", purged);
        }
        purged
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries
            .get(key)
            .filter(|stored| stored.is_live(Instant::now()))
            .map(|stored| stored.value.clone()))
    }

    fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let expires_at = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), StoredValue { value: value.to_string(), expires_at });
        Ok(())
    }
}
