// cached-purifier/src/storage.rs
//! Provisioning of the sanitizer's storage directory.
//!
//! The sanitizer keeps its own definition cache on disk, separate from the
//! output cache. Before the first `purify` the directory must exist and be
//! writable; this module resolves, creates and checks it.
//!
//! License: MIT OR APACHE 2.0

use log::{debug, info};
use std::io;
use std::path::{Path, PathBuf};

use crate::errors::PurifierError;

const APP_DIR: &str = "cached-purifier";
const DEFINITIONS_DIR: &str = "definitions";

/// Platform cache directory + `cached-purifier/definitions`, falling back to
/// the system temp directory when the platform has no cache dir.
pub fn default_storage_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
        .join(DEFINITIONS_DIR)
}

/// Ensures `path` is a writable directory, creating it (and any missing
/// parents) with `permissions` when absent. On unix every directory created
/// here gets exactly `permissions`, regardless of the process umask.
///
/// # Errors
/// `PurifierError::Configuration` when the directory exists but is not
/// writable, or cannot be created.
pub fn provision_dir(path: &Path, permissions: u32) -> Result<(), PurifierError> {
    if path.is_dir() {
        return check_writable(path).map_err(|e| {
            PurifierError::config(format!("Unable to write to directory ({}): {}", path.display(), e))
        });
    }

    if let Err(e) = create_dir(path, permissions) {
        // Another process may have created it in the meantime.
        if !path.is_dir() {
            return Err(PurifierError::config(format!(
                "Unable to create the directory ({}): {}",
                path.display(),
                e
            )));
        }
        debug!("Directory {} appeared concurrently: {}", path.display(), e);
    }

    info!("Provisioned storage directory {} (mode {:o}).", path.display(), permissions);
    Ok(())
}

#[cfg(unix)]
fn create_dir(path: &Path, permissions: u32) -> io::Result<()> {
    use std::os::unix::fs::{DirBuilderExt, PermissionsExt};

    // Leaf first, so parents stay traversable while their children are updated.
    let missing: Vec<PathBuf> = path
        .ancestors()
        .take_while(|dir| !dir.as_os_str().is_empty() && !dir.exists())
        .map(Path::to_path_buf)
        .collect();

    std::fs::DirBuilder::new().recursive(true).mode(permissions).create(path)?;
    // DirBuilder is subject to the process umask; apply the exact bits to
    // every directory created here.
    for dir in &missing {
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(permissions))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn create_dir(path: &Path, _permissions: u32) -> io::Result<()> {
    std::fs::DirBuilder::new().recursive(true).create(path)
}

fn check_writable(path: &Path) -> io::Result<()> {
    let probe = tempfile::tempfile_in(path)?;
    drop(probe);
    Ok(())
}
