//! Path utilities for determining data storage locations.
//!
//! All persistent taskbridge data lives under `~/.taskbridge/`: the YAML
//! settings file, the persisted sync state, its lock file, and backups.

use std::path::{Path, PathBuf};

/// The base directory name for taskbridge data.
const DATA_DIR_NAME: &str = ".taskbridge";

/// The settings filename.
pub const CONFIG_FILENAME: &str = "config.yaml";

/// The sync state filename.
pub const STATE_FILENAME: &str = "sync-state.json";

/// Get the base data directory for taskbridge.
///
/// Returns `~/.taskbridge/` or `None` if the home directory cannot be
/// determined.
#[must_use]
pub fn data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(DATA_DIR_NAME))
}

/// Get the settings file path.
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    data_dir().map(|dir| dir.join(CONFIG_FILENAME))
}

/// Get the sync state file path.
#[must_use]
pub fn state_path() -> Option<PathBuf> {
    data_dir().map(|dir| dir.join(STATE_FILENAME))
}

/// Get the lock file path guarding a given state file.
#[must_use]
pub fn lock_path_for(state_path: &Path) -> PathBuf {
    let mut os = state_path.as_os_str().to_owned();
    os.push(".lock");
    PathBuf::from(os)
}

/// Get the backups directory.
///
/// Returns `~/.taskbridge/backups/` or `None` if the home directory cannot
/// be determined.
#[must_use]
pub fn backups_dir() -> Option<PathBuf> {
    data_dir().map(|dir| dir.join("backups"))
}
