//! compiler.rs - Manages the compilation and caching of sanitize rules.
//!
//! Converts a `RuleConfig` into `CompiledRules`. Compiled sets are kept in a
//! process-wide map keyed by the config fingerprint, holding at most
//! `MAX_COMPILED_RULE_SETS` sets; the oldest set is dropped first. When the
//! config carries a storage directory, the validated rule definitions are also
//! persisted there so a later process can skip validation. That directory is
//! never pruned: it gains one file per distinct rule set, so per-call override
//! configs are expected to come from a small, fixed collection.
//!
//! License: MIT OR APACHE 2.0

use anyhow::Result;
use lazy_static::lazy_static;
use log::debug;
use regex::{Regex, RegexBuilder};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::{validate_rules, RuleConfig, SanitizeRule, MAX_PATTERN_LENGTH};
use crate::errors::PurifierError;
use crate::sanitizers::definitions::DefinitionCache;

/// Represents a single compiled sanitize rule.
#[derive(Debug)]
pub struct CompiledRule {
    /// The compiled regular expression used for matching.
    pub regex: Regex,
    /// Replacement text; `$n` group references are expanded by `regex`.
    pub replace_with: String,
    /// The unique name of the rule.
    pub name: String,
}

/// The ordered, active rules of one `RuleConfig`, ready to apply.
#[derive(Debug)]
pub struct CompiledRules {
    pub rules: Vec<CompiledRule>,
    pub fingerprint: String,
}

/// Upper bound on the number of compiled rule sets kept in memory.
pub const MAX_COMPILED_RULE_SETS: usize = 64;

/// Compiled sets by fingerprint, evicted in insertion order.
#[derive(Debug)]
struct CompiledRulesCache {
    sets: HashMap<String, Arc<CompiledRules>>,
    order: VecDeque<String>,
    capacity: usize,
}

impl CompiledRulesCache {
    fn with_capacity(capacity: usize) -> Self {
        Self { sets: HashMap::new(), order: VecDeque::new(), capacity }
    }

    fn get(&self, fingerprint: &str) -> Option<Arc<CompiledRules>> {
        self.sets.get(fingerprint).cloned()
    }

    /// Returns the set now cached under `fingerprint`. If another thread got
    /// there first, its set wins.
    fn insert(&mut self, fingerprint: String, rules: Arc<CompiledRules>) -> Arc<CompiledRules> {
        if let Some(existing) = self.sets.get(&fingerprint) {
            return Arc::clone(existing);
        }
        while self.sets.len() >= self.capacity {
            let Some(oldest) = self.order.pop_front() else { break };
            debug!("Evicting compiled rules for fingerprint: {}", oldest);
            self.sets.remove(&oldest);
        }
        self.order.push_back(fingerprint.clone());
        self.sets.insert(fingerprint, Arc::clone(&rules));
        rules
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.sets.len()
    }
}

lazy_static! {
    /// A thread-safe, global cache for compiled rules keyed by config fingerprint.
    static ref COMPILED_RULES_CACHE: RwLock<CompiledRulesCache> =
        RwLock::new(CompiledRulesCache::with_capacity(MAX_COMPILED_RULE_SETS));
}

/// Compiles already-validated rules. Disabled rules are skipped.
pub fn compile_rules(
    rules_to_compile: Vec<SanitizeRule>,
    fingerprint: String,
) -> Result<CompiledRules, PurifierError> {
    debug!("Starting compilation of {} rules.", rules_to_compile.len());

    let mut compiled_rules = Vec::new();
    let mut compilation_errors = Vec::new();

    for rule in rules_to_compile.into_iter().filter(SanitizeRule::is_active) {
        let Some(pattern) = rule.pattern.as_ref() else {
            compilation_errors.push(PurifierError::Fatal(format!(
                "Rule '{}' has no pattern.",
                rule.name
            )));
            continue;
        };

        if pattern.len() > MAX_PATTERN_LENGTH {
            compilation_errors.push(PurifierError::PatternLengthExceeded(
                rule.name,
                pattern.len(),
                MAX_PATTERN_LENGTH,
            ));
            continue;
        }

        let regex_result = RegexBuilder::new(pattern)
            .case_insensitive(rule.case_insensitive)
            .multi_line(rule.multiline)
            .dot_matches_new_line(rule.dot_matches_new_line)
            .size_limit(10 * (1 << 20)) // 10 MB limit for compiled regex
            .build();

        match regex_result {
            Ok(regex) => {
                debug!(
                    target: "cached_purifier::sanitizer",
                    "Rule '{}' compiled successfully.",
                    &rule.name
                );
                compiled_rules.push(CompiledRule {
                    regex,
                    replace_with: rule.replace_with,
                    name: rule.name,
                });
            }
            Err(e) => {
                compilation_errors.push(PurifierError::RuleCompilationError(rule.name, e));
            }
        }
    }

    if !compilation_errors.is_empty() {
        let error_message = compilation_errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<String>>()
            .join("\n");
        return Err(PurifierError::Fatal(format!(
            "Failed to compile {} rule(s):\n{}",
            compilation_errors.len(),
            error_message
        )));
    }

    debug!("Finished compiling rules. Total compiled: {}.", compiled_rules.len());
    Ok(CompiledRules { rules: compiled_rules, fingerprint })
}

/// Gets a `CompiledRules` instance from the cache or compiles it if not found.
pub fn get_or_compile_rules(config: &RuleConfig) -> Result<Arc<CompiledRules>> {
    let cache_key = config.fingerprint();

    {
        let cache = COMPILED_RULES_CACHE.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(rules) = cache.get(&cache_key) {
            debug!("Serving compiled rules from memory for fingerprint: {}", &cache_key);
            return Ok(rules);
        }
    }

    let definitions = config
        .serializer_path
        .as_deref()
        .map(|dir| DefinitionCache::new(dir, config.serializer_permissions));

    let rules = match definitions.as_ref().and_then(|d| d.load(&cache_key)) {
        Some(stored) => stored,
        None => {
            validate_rules(&config.rules)?;
            if let Some(definitions) = &definitions {
                definitions.store(&cache_key, &config.rules);
            }
            config.rules.clone()
        }
    };

    let compiled_arc = Arc::new(compile_rules(rules, cache_key.clone())?);
    let compiled_arc = COMPILED_RULES_CACHE
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(cache_key.clone(), compiled_arc);

    debug!("Compiled and cached rules for fingerprint: {}", &cache_key);
    Ok(compiled_arc)
}
