// cached-purifier/src/lib.rs
//! # Cached Purifier
//!
//! `cached-purifier` puts a content-addressed cache in front of an expensive,
//! deterministic text sanitizer. Each distinct input is sanitized once; later
//! requests for the same input are served from the cache.
//!
//! ## Modules
//!
//! * `purifier`: The `CachedPurifier` gate: key derivation, lookup, delegation and population.
//! * `config`: `RuleConfig`, `SanitizeRule` and the host-facing `PurifierOptions`.
//! * `key`: Hash algorithm selection and `KeyDeriver`.
//! * `store`: The `CacheStore` backend trait and the in-process `MemoryStore`.
//! * `sanitizer`: The `Sanitizer` trait.
//! * `sanitizers`: The rule-driven `RegexSanitizer`, its compiler and its on-disk definition cache.
//! * `storage`: Provisioning of the sanitizer's storage directory.
//! * `errors`: The `PurifierError` type.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cached_purifier::{CachedPurifier, MemoryStore, PurifierOptions, RegexSanitizer};
//!
//! fn main() -> Result<(), cached_purifier::PurifierError> {
//!     let options = PurifierOptions {
//!         cache_duration_seconds: 3600,
//!         ..Default::default()
//!     };
//!     let purifier = CachedPurifier::new(
//!         options,
//!         Arc::new(RegexSanitizer::new()),
//!         Some(Arc::new(MemoryStore::new())),
//!     )?;
//!
//!     let safe = purifier.purify("<script>alert(1)</script><b>hi</b>", None)?;
//!     assert_eq!(safe, "<b>hi</b>");
//!
//!     // Served from the cache; the sanitizer is not called again.
//!     let again = purifier.purify("<script>alert(1)</script><b>hi</b>", None)?;
//!     assert_eq!(again, safe);
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Construction fails with `PurifierError::Configuration`. After that the only
//! error `purify` returns is `PurifierError::Sanitization`; cache backend
//! failures are logged through the `log` facade and counted in
//! [`PurifierStats`].
//!
//! ## Cache Key Policy
//!
//! By default the key mixes in the fingerprint of the effective rule set, so
//! outputs produced under different rules never collide, and an empty cached
//! output counts as a hit. Both can be switched back to the input-only key and
//! empty-is-miss behavior through `PurifierOptions::key_includes_config` and
//! `PurifierOptions::empty_value_policy`.
//!
//! ---
//! License: MIT OR Apache-2.0

pub mod config;
pub mod errors;
mod inflight;
pub mod key;
pub mod purifier;
pub mod sanitizer;
pub mod sanitizers;
pub mod storage;
pub mod store;

pub use config::{
    validate_rules,
    EmptyValuePolicy,
    PurifierOptions,
    RuleConfig,
    SanitizeRule,
    DEFAULT_CACHE_PERMISSIONS,
    DEFAULT_HASH_ALGORITHM,
    DEFAULT_KEY_PREFIX,
    MAX_PATTERN_LENGTH,
};

pub use errors::PurifierError;

pub use key::{HashAlgorithm, KeyDeriver};

pub use purifier::{CachedPurifier, PurifierStats};

pub use sanitizer::Sanitizer;

pub use sanitizers::regex_sanitizer::RegexSanitizer;

pub use store::{CacheError, CacheStore, MemoryStore};
