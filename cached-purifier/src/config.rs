//! Configuration management for `cached-purifier`.
//!
//! This module defines the sanitizer rule set (`RuleConfig`) and the host-facing
//! option struct (`PurifierOptions`) captured by a `CachedPurifier` at
//! construction. Both can be loaded from YAML.
//!
//! License: MIT OR Apache-2.0

use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::PurifierError;

/// Maximum allowed length for a regex pattern string.
pub const MAX_PATTERN_LENGTH: usize = 500;

/// Default namespace prepended to every cache key.
pub const DEFAULT_KEY_PREFIX: &str = "secured_strings::";

/// Default digest used to address cached outputs.
pub const DEFAULT_HASH_ALGORITHM: &str = "sha512";

/// Default permission bits for the sanitizer storage directory.
pub const DEFAULT_CACHE_PERMISSIONS: u32 = 0o755;

/// A single rewrite rule applied by the rule-driven sanitizer.
///
/// Rules run in declaration order; each one rewrites the output of the
/// previous one.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SanitizeRule {
    /// Unique identifier for the rule (e.g., "strip_script").
    pub name: String,
    /// Human-readable description of what the rule targets.
    pub description: Option<String>,
    /// The regex pattern string.
    pub pattern: Option<String>,
    /// Replacement text. `$1`-style group references are expanded.
    pub replace_with: String,
    pub case_insensitive: bool,
    /// If true, enables multiline mode for the regex engine.
    pub multiline: bool,
    /// If true, the dot character `.` in regex will match newlines.
    pub dot_matches_new_line: bool,
    /// Explicit override for enabling/disabling the rule.
    pub enabled: Option<bool>,
}

impl Default for SanitizeRule {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: None,
            pattern: None,
            replace_with: String::new(),
            case_insensitive: false,
            multiline: false,
            dot_matches_new_line: false,
            enabled: None,
        }
    }
}

impl SanitizeRule {
    pub fn is_active(&self) -> bool {
        self.enabled != Some(false)
    }

    // Length-prefixed so that ("ab", "c") and ("a", "bc") never collide.
    fn feed(&self, hasher: &mut Sha256) {
        fn field(hasher: &mut Sha256, bytes: &[u8]) {
            hasher.update((bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        }
        field(hasher, self.name.as_bytes());
        field(hasher, self.pattern.as_deref().unwrap_or("").as_bytes());
        hasher.update([self.pattern.is_some() as u8]);
        field(hasher, self.replace_with.as_bytes());
        hasher.update([
            self.case_insensitive as u8,
            self.multiline as u8,
            self.dot_matches_new_line as u8,
            self.is_active() as u8,
        ]);
    }
}

/// The option set handed to a `Sanitizer`.
///
/// The behavioral part is `rules`. `serializer_path` and
/// `serializer_permissions` describe where the sanitizer may keep its own
/// definition cache; the gate fills them in at initialization and they are
/// excluded from the fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RuleConfig {
    pub rules: Vec<SanitizeRule>,
    #[serde(skip)]
    pub serializer_path: Option<PathBuf>,
    #[serde(skip)]
    pub serializer_permissions: Option<u32>,
}

impl RuleConfig {
    /// Loads a rule set from a YAML file and validates every rule.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading sanitize rules from: {}", path.display());
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rule file {}", path.display()))?;
        let config: RuleConfig = serde_yml::from_str(&text)
            .with_context(|| format!("Failed to parse rule file {}", path.display()))?;

        validate_rules(&config.rules)?;
        info!("Loaded {} rules from file {}.", config.rules.len(), path.display());

        Ok(config)
    }

    /// Loads the built-in rule set (script/style/iframe removal, inline event
    /// handler and `javascript:` URL neutralization).
    pub fn load_default_rules() -> Result<Self> {
        debug!("Loading default rules from embedded string...");
        let default_yaml = include_str!("../config/default_rules.yaml");
        let config: RuleConfig = serde_yml::from_str(default_yaml)
            .context("Failed to parse default rules")?;

        debug!("Loaded {} default rules.", config.rules.len());
        Ok(config)
    }

    /// Shape check only: every rule is named and carries a pattern.
    /// Regex validity is the sanitizer's concern.
    pub fn is_well_formed(&self) -> bool {
        self.rules
            .iter()
            .all(|r| !r.name.trim().is_empty() && r.pattern.is_some())
    }

    /// Hex SHA-256 identity of the behavioral part of this config.
    ///
    /// Two configs with the same rules in the same order share a fingerprint
    /// regardless of their storage settings.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update((self.rules.len() as u64).to_le_bytes());
        for rule in &self.rules {
            rule.feed(&mut hasher);
        }
        hex::encode(hasher.finalize())
    }

    pub fn active_rules(&self) -> impl Iterator<Item = &SanitizeRule> {
        self.rules.iter().filter(|r| r.is_active())
    }
}

/// What a cached empty string means on lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyValuePolicy {
    /// A found entry is a hit, whatever its content.
    #[default]
    Cache,
    /// A found but empty entry is treated as absent and recomputed.
    Miss,
}

/// Host configuration for a `CachedPurifier`. Captured once at construction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PurifierOptions {
    /// Lifetime of stored outputs. `0` disables expiration.
    pub cache_duration_seconds: u64,
    /// Default rule set. Falls back to the embedded defaults when absent.
    pub config: Option<RuleConfig>,
    /// Storage directory for the sanitizer's own definition cache.
    pub cache_path: Option<PathBuf>,
    pub cache_permissions: u32,
    pub key_prefix: String,
    pub hash_algorithm: String,
    /// Mix the rule fingerprint into the key so rule sets never share entries.
    pub key_includes_config: bool,
    pub empty_value_policy: EmptyValuePolicy,
    /// Collapse concurrent misses on the same key into one sanitizer call.
    pub coalesce_misses: bool,
}

impl Default for PurifierOptions {
    fn default() -> Self {
        Self {
            cache_duration_seconds: 0,
            config: None,
            cache_path: None,
            cache_permissions: DEFAULT_CACHE_PERMISSIONS,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            hash_algorithm: DEFAULT_HASH_ALGORITHM.to_string(),
            key_includes_config: true,
            empty_value_policy: EmptyValuePolicy::default(),
            coalesce_misses: false,
        }
    }
}

impl PurifierOptions {
    /// Loads options from a YAML file. Any failure is a configuration error.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, PurifierError> {
        let path = path.as_ref();
        info!("Loading purifier options from: {}", path.display());
        let text = std::fs::read_to_string(path).map_err(|e| {
            PurifierError::config(format!("Failed to read options file {}: {}", path.display(), e))
        })?;
        let options: PurifierOptions = serde_yml::from_str(&text).map_err(|e| {
            PurifierError::config(format!("Failed to parse options file {}: {}", path.display(), e))
        })?;

        if let Some(config) = &options.config {
            validate_rules(&config.rules).map_err(|e| PurifierError::config(e.to_string()))?;
        }
        Ok(options)
    }

    /// `None` means entries never expire.
    pub fn ttl(&self) -> Option<Duration> {
        match self.cache_duration_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Validates rule integrity (names, regex compilation, capture groups).
pub fn validate_rules(rules: &[SanitizeRule]) -> Result<()> {
    let mut rule_names = HashSet::new();
    let mut errors = Vec::new();
    let capture_group_regex = Regex::new(r"\$\{?(\d+)\}?")?;

    for rule in rules {
        if rule.name.trim().is_empty() {
            errors.push("A rule has an empty `name` field.".to_string());
        } else if !rule_names.insert(rule.name.as_str()) {
            errors.push(format!("Duplicate rule name found: '{}'.", rule.name));
        }

        let pattern = match &rule.pattern {
            Some(p) => p,
            None => {
                errors.push(format!("Rule '{}' is missing the `pattern` field.", rule.name));
                continue;
            }
        };

        if pattern.is_empty() {
            errors.push(format!("Rule '{}' has an empty `pattern` field.", rule.name));
            continue;
        }

        if pattern.len() > MAX_PATTERN_LENGTH {
            errors.push(format!(
                "Rule '{}': pattern length ({}) exceeds maximum allowed ({}).",
                rule.name,
                pattern.len(),
                MAX_PATTERN_LENGTH
            ));
            continue;
        }

        let compiled = match Regex::new(pattern) {
            Ok(re) => re,
            Err(e) => {
                errors.push(format!("Rule '{}' has an invalid regex pattern: {}", rule.name, e));
                continue;
            }
        };

        // captures_len counts the implicit whole-match group.
        let group_count = compiled.captures_len() - 1;
        for cap in capture_group_regex.captures_iter(&rule.replace_with) {
            if let Some(group_num) = cap.get(1).and_then(|g| g.as_str().parse::<usize>().ok()) {
                if group_num > group_count {
                    errors.push(format!(
                        "Rule '{}': replacement references non-existent capture group '${}'.",
                        rule.name, group_num
                    ));
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("Rule validation failed:\n{}", errors.join("\n")))
    }
}
