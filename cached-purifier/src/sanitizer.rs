// cached-purifier/src/sanitizer.rs
//! Defines the `Sanitizer` trait, the expensive transform the gate protects.
//!
//! Implementations must be deterministic for a given `RuleConfig`: the gate
//! serves a stored output in place of calling the sanitizer again, so two
//! calls with the same input and rules have to agree.
//!
//! License: MIT OR APACHE 2.0

use anyhow::Result;

use crate::config::RuleConfig;

/// A pure, deterministic text transform.
pub trait Sanitizer: Send + Sync {
    /// Sanitizes `input` under `config`.
    ///
    /// `config.serializer_path`, when set, names a writable directory the
    /// implementation may use for its own definition cache.
    fn sanitize(&self, input: &str, config: &RuleConfig) -> Result<String>;
}

impl<F> Sanitizer for F
where
    F: Fn(&str, &RuleConfig) -> Result<String> + Send + Sync,
{
    fn sanitize(&self, input: &str, config: &RuleConfig) -> Result<String> {
        self(input, config)
    }
}
