//! errors.rs - Custom error types for the cached-purifier library.
//!
//! Only two kinds of failure ever reach a caller of `CachedPurifier::purify`:
//! a failing sanitizer, or (at construction time) a bad configuration.
//! Cache backend failures are recovered inside the gate and only show up in
//! logs and in `PurifierStats`.
//!
//! License: MIT OR APACHE 2.0

use thiserror::Error;

/// This enum represents all possible error types in the `cached-purifier` library.
///
/// Marked `#[non_exhaustive]` so new variants can be added without breaking
/// downstream matches.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PurifierError {
    /// Raised once, while building a `CachedPurifier`. The component is not
    /// usable afterwards and nothing is retried.
    #[error("Invalid purifier configuration: {0}")]
    Configuration(String),

    /// The sanitizer itself failed. Its error is passed through unchanged.
    #[error(transparent)]
    Sanitization(anyhow::Error),

    #[error("Failed to compile sanitize rule '{0}': {1}")]
    RuleCompilationError(String, regex::Error),

    #[error("Rule '{0}': pattern length ({1}) exceeds maximum allowed ({2})")]
    PatternLengthExceeded(String, usize, usize),

    #[error("A fatal error occurred: {0}")]
    Fatal(String),
}

impl PurifierError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        PurifierError::Configuration(msg.into())
    }

    /// Returns `true` for errors raised during initialization.
    pub fn is_configuration(&self) -> bool {
        matches!(self, PurifierError::Configuration(_))
    }
}
