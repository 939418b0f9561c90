//! Sanitizer implementations shipped with the crate.
//!
//! `regex_sanitizer` applies ordered rewrite rules; `compiler` turns a
//! `RuleConfig` into compiled regexes; `definitions` persists validated rule
//! sets into the storage directory provisioned by the gate.

pub mod compiler;
pub mod definitions;
pub mod regex_sanitizer;
