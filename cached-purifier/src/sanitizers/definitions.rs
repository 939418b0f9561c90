//! On-disk definition cache for the regex sanitizer.
//!
//! One JSON file per rule-set fingerprint, written into the storage directory
//! the gate provisions at startup. A definition is only trusted if its rules
//! hash back to the fingerprint in its file name. Read or write problems are
//! logged and otherwise ignored; the sanitizer falls back to validating the
//! rules itself.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::{RuleConfig, SanitizeRule};

#[derive(Debug, Serialize, Deserialize)]
struct StoredDefinition {
    fingerprint: String,
    rules: Vec<SanitizeRule>,
}

#[derive(Debug, Clone)]
pub struct DefinitionCache {
    dir: PathBuf,
    permissions: Option<u32>,
}

impl DefinitionCache {
    pub fn new(dir: &Path, permissions: Option<u32>) -> Self {
        Self { dir: dir.to_path_buf(), permissions }
    }

    pub fn path_for(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(format!("{}.json", fingerprint))
    }

    pub fn load(&self, fingerprint: &str) -> Option<Vec<SanitizeRule>> {
        let path = self.path_for(fingerprint);
        let bytes = std::fs::read(&path).ok()?;
        let stored: StoredDefinition = match serde_json::from_slice(&bytes) {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Ignoring unreadable definition file {}: {}", path.display(), e);
                return None;
            }
        };

        let recomputed = RuleConfig { rules: stored.rules, ..Default::default() };
        if stored.fingerprint != fingerprint || recomputed.fingerprint() != fingerprint {
            warn!("Ignoring definition file {} with mismatched fingerprint.", path.display());
            return None;
        }
        debug!("Loaded rule definitions from {}", path.display());
        Some(recomputed.rules)
    }

    /// Writes the definition atomically (temp file + rename).
    pub fn store(&self, fingerprint: &str, rules: &[SanitizeRule]) {
        if let Err(e) = self.try_store(fingerprint, rules) {
            warn!(
                "Failed to write rule definitions to {}: {}",
                self.path_for(fingerprint).display(),
                e
            );
        }
    }

    fn try_store(&self, fingerprint: &str, rules: &[SanitizeRule]) -> anyhow::Result<()> {
        let stored = StoredDefinition { fingerprint: fingerprint.to_string(), rules: rules.to_vec() };
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer(&mut tmp, &stored)?;
        tmp.flush()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = self.permissions {
                // Files never get the execute bits of the directory mode.
                let file_mode = mode & 0o666;
                std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(file_mode))?;
            }
        }

        let path = self.path_for(fingerprint);
        tmp.persist(&path)?;
        debug!("Stored rule definitions at {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn rules() -> Vec<SanitizeRule> {
        vec![SanitizeRule {
            name: "strip_b".into(),
            pattern: Some("<b>".into()),
            ..Default::default()
        }]
    }

    #[test]
    fn store_then_load() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let cache = DefinitionCache::new(dir.path(), Some(0o750));
        let fp = RuleConfig { rules: rules(), ..Default::default() }.fingerprint();

        assert!(cache.load(&fp).is_none());
        cache.store(&fp, &rules());
        assert_eq!(cache.load(&fp), Some(rules()));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(cache.path_for(&fp))?.permissions().mode() & 0o777;
            assert_eq!(mode, 0o640);
        }
        Ok(())
    }

    #[test]
    fn tampered_definition_is_ignored() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let cache = DefinitionCache::new(dir.path(), None);
        let fp = RuleConfig { rules: rules(), ..Default::default() }.fingerprint();
        cache.store(&fp, &rules());

        let mut other = rules();
        other[0].replace_with = "[B]".into();
        let forged = serde_json::json!({ "fingerprint": fp, "rules": other });
        std::fs::write(cache.path_for(&fp), forged.to_string())?;
        assert!(cache.load(&fp).is_none());

        std::fs::write(cache.path_for(&fp), b"not json")?;
        assert!(cache.load(&fp).is_none());
        Ok(())
    }
}
