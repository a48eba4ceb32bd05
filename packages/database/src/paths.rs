//! Canonical file paths for the local store.
//!
//! Paths are relative to the process working directory unless overridden
//! by configuration.

use std::path::{Path, PathBuf};

/// Returns the `data/` directory path.
#[must_use]
pub fn data_dir() -> PathBuf {
    PathBuf::from("data")
}

/// Returns the default path of the `SQLite` store.
#[must_use]
pub fn default_db_path() -> PathBuf {
    data_dir().join("paddle_mirror.db")
}

/// Ensures a directory exists, creating it if necessary.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.as_os_str().is_empty() && !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
