//! Persisted sync state: the link table connecting the two stores.
//!
//! Neither TaskWarrior nor Reminders knows about the other, so the mapping
//! between their records lives here, in a JSON document under
//! `~/.taskbridge/`. The state is loaded at the start of a run, owned
//! exclusively by the engine while it runs (guarded by an advisory file
//! lock), and flushed atomically at the end.

use crate::error::{Error, Result};
use crate::paths;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Current state file format version.
const STATE_VERSION: u32 = 1;

/// Persisted association between one source record and one target record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncLink {
    /// Stable identifier for this link.
    pub link_id: String,
    /// External id on the source (TaskWarrior) side.
    pub source_id: String,
    /// External id on the target (Reminders) side.
    pub target_id: String,
    /// Source-side content checksum recorded at last successful sync.
    pub source_checksum: String,
    /// Target-side content checksum recorded at last successful sync.
    pub target_checksum: String,
    /// When the link was established.
    pub linked_at: DateTime<Utc>,
}

impl SyncLink {
    /// Create a link between the two ids with the given last-synced checksums.
    #[must_use]
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        source_checksum: impl Into<String>,
        target_checksum: impl Into<String>,
    ) -> Self {
        let source_id = source_id.into();
        let target_id = target_id.into();
        Self {
            link_id: link_id(&source_id, &target_id),
            source_id,
            target_id,
            source_checksum: source_checksum.into(),
            target_checksum: target_checksum.into(),
            linked_at: Utc::now(),
        }
    }
}

/// Derive a short stable link id from the two external ids.
fn link_id(source_id: &str, target_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update([0]);
    hasher.update(target_id.as_bytes());
    let digest = hasher.finalize();
    digest.iter().take(6).map(|b| format!("{b:02x}")).collect()
}

/// The whole persisted table of links plus a monotonic run counter.
///
/// Unknown fields in the on-disk document are ignored on load, so newer
/// versions can add fields without breaking older binaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncState {
    /// State file format version.
    #[serde(default = "default_version")]
    pub version: u32,
    /// Number of completed sync runs.
    #[serde(default)]
    pub runs: u64,
    /// Active links.
    #[serde(default)]
    pub links: Vec<SyncLink>,
}

const fn default_version() -> u32 {
    STATE_VERSION
}

impl Default for SyncState {
    fn default() -> Self {
        Self { version: STATE_VERSION, runs: 0, links: Vec::new() }
    }
}

impl SyncState {
    /// Find the link owning a source id.
    #[must_use]
    pub fn link_for_source(&self, source_id: &str) -> Option<&SyncLink> {
        self.links.iter().find(|l| l.source_id == source_id)
    }

    /// Find the link owning a target id.
    #[must_use]
    pub fn link_for_target(&self, target_id: &str) -> Option<&SyncLink> {
        self.links.iter().find(|l| l.target_id == target_id)
    }

    /// Mutable access to a link by its id.
    pub fn link_mut(&mut self, link_id: &str) -> Option<&mut SyncLink> {
        self.links.iter_mut().find(|l| l.link_id == link_id)
    }

    /// Add a link, enforcing the bijection invariant: at most one active
    /// link per source id and per target id.
    ///
    /// # Errors
    ///
    /// Returns a `Persistence` error if either side is already linked.
    pub fn add_link(&mut self, link: SyncLink) -> Result<()> {
        if self.link_for_source(&link.source_id).is_some() {
            return Err(Error::Persistence(format!(
                "source id '{}' is already linked",
                link.source_id
            )));
        }
        if self.link_for_target(&link.target_id).is_some() {
            return Err(Error::Persistence(format!(
                "target id '{}' is already linked",
                link.target_id
            )));
        }
        self.links.push(link);
        Ok(())
    }

    /// Remove a link by id, returning whether it existed.
    pub fn remove_link(&mut self, link_id: &str) -> bool {
        let before = self.links.len();
        self.links.retain(|l| l.link_id != link_id);
        self.links.len() != before
    }
}

/// RAII guard for the exclusive advisory lock on the state file.
///
/// The lock is released on drop, on every exit path including failure.
#[derive(Debug)]
pub struct StateLock {
    file: File,
    path: PathBuf,
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(err) = fs2::FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), %err, "failed to release state lock");
        }
    }
}

/// Handle to the state file on disk: loading, locking, atomic flushing.
pub struct SyncStateStore {
    path: PathBuf,
}

impl SyncStateStore {
    /// A store backed by the given file path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// A store at the default location under the home directory.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error if the home directory cannot be determined.
    pub fn at_default_location() -> Result<Self> {
        let path = paths::state_path()
            .ok_or_else(|| Error::Config("cannot determine home directory".into()))?;
        Ok(Self::new(path))
    }

    /// The state file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire the exclusive advisory lock for a sync run.
    ///
    /// Fails immediately rather than blocking when another run holds it.
    ///
    /// # Errors
    ///
    /// Returns a `Persistence` error if the lock is held elsewhere or the
    /// lock file cannot be created.
    pub fn lock(&self) -> Result<StateLock> {
        let lock_path = paths::lock_path_for(&self.path);
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Persistence(format!("cannot create state directory: {e}")))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| Error::Persistence(format!("cannot open lock file: {e}")))?;
        file.try_lock_exclusive().map_err(|_| {
            Error::Persistence(format!(
                "another sync run holds the lock at {}",
                lock_path.display()
            ))
        })?;
        Ok(StateLock { file, path: lock_path })
    }

    /// Load the state, or the empty default when no file exists yet.
    ///
    /// # Errors
    ///
    /// Returns a `Persistence` error if the file exists but cannot be read
    /// or parsed.
    pub fn load(&self) -> Result<SyncState> {
        if !self.path.exists() {
            return Ok(SyncState::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| Error::Persistence(format!("cannot read state file: {e}")))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Persistence(format!("malformed state file: {e}")))
    }

    /// Flush the state atomically: write to a temp file in the same
    /// directory, then rename over the old file. A crash mid-write leaves
    /// the prior state intact.
    ///
    /// # Errors
    ///
    /// Returns a `Persistence` error on any write failure; the previous
    /// on-disk state is untouched in that case.
    pub fn save(&self, state: &SyncState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Persistence(format!("cannot create state directory: {e}")))?;
        }
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| Error::Persistence(format!("cannot serialize state: {e}")))?;

        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, content)
            .map_err(|e| Error::Persistence(format!("cannot write state file: {e}")))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| Error::Persistence(format!("cannot replace state file: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn link(source: &str, target: &str) -> SyncLink {
        SyncLink::new(source, target, "s-sum", "t-sum")
    }

    #[test]
    fn test_link_id_is_stable_and_distinct() {
        let a = link("s-1", "t-1");
        let b = link("s-1", "t-1");
        let c = link("s-1", "t-2");
        assert_eq!(a.link_id, b.link_id);
        assert_ne!(a.link_id, c.link_id);
        assert_eq!(a.link_id.len(), 12);
    }

    #[test]
    fn test_bijection_enforced() {
        let mut state = SyncState::default();
        state.add_link(link("s-1", "t-1")).unwrap();

        assert!(state.add_link(link("s-1", "t-2")).is_err());
        assert!(state.add_link(link("s-2", "t-1")).is_err());
        state.add_link(link("s-2", "t-2")).unwrap();
        assert_eq!(state.links.len(), 2);
    }

    #[test]
    fn test_lookup_and_remove() {
        let mut state = SyncState::default();
        state.add_link(link("s-1", "t-1")).unwrap();
        let id = state.links[0].link_id.clone();

        assert!(state.link_for_source("s-1").is_some());
        assert!(state.link_for_target("t-1").is_some());
        assert!(state.link_for_source("s-9").is_none());

        assert!(state.remove_link(&id));
        assert!(!state.remove_link(&id));
        assert!(state.links.is_empty());
    }

    #[test]
    fn test_load_missing_file_gives_default() {
        let dir = TempDir::new().unwrap();
        let store = SyncStateStore::new(dir.path().join("sync-state.json"));
        let state = store.load().unwrap();
        assert_eq!(state.runs, 0);
        assert!(state.links.is_empty());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = SyncStateStore::new(dir.path().join("sync-state.json"));

        let mut state = SyncState::default();
        state.runs = 3;
        state.add_link(link("s-1", "t-1")).unwrap();
        store.save(&state).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.runs, 3);
        assert_eq!(loaded.links, state.links);

        // No temp file left behind.
        assert!(!dir.path().join("sync-state.json.tmp").exists());
    }

    #[test]
    fn test_load_ignores_unknown_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync-state.json");
        std::fs::write(
            &path,
            r#"{"version": 2, "runs": 1, "links": [], "future_field": {"x": 1}}"#,
        )
        .unwrap();

        let store = SyncStateStore::new(path);
        let state = store.load().unwrap();
        assert_eq!(state.version, 2);
        assert_eq!(state.runs, 1);
    }

    #[test]
    fn test_load_rejects_malformed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync-state.json");
        std::fs::write(&path, "not json").unwrap();

        let store = SyncStateStore::new(path);
        assert!(matches!(store.load().unwrap_err(), Error::Persistence(_)));
    }

    #[test]
    fn test_lock_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let store = SyncStateStore::new(dir.path().join("sync-state.json"));

        let guard = store.lock().unwrap();
        assert!(matches!(store.lock().unwrap_err(), Error::Persistence(_)));
        drop(guard);

        // Released on drop: can be acquired again.
        let _guard = store.lock().unwrap();
    }
}
