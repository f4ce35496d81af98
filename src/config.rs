//! Configuration management for taskbridge.
//!
//! This module handles the `~/.taskbridge/config.yaml` file which stores the
//! sync tuning knobs and the external tool locations. Everything here is
//! plain data: the command layer loads settings and hands them to the engine
//! and adapters at construction time, so there is no ambient state.

use crate::error::{Error, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// How conflicting edits (changed on both sides since last sync) are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Most recent `modified` timestamp wins; equal timestamps fall back to
    /// the source side.
    #[default]
    NewestWins,
    /// The TaskWarrior side always wins.
    SourceWins,
    /// The Reminders side always wins.
    TargetWins,
}

/// What to do on the surviving side when a linked record was deleted on the
/// other side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DeletePolicy {
    /// Mark the surviving record completed. The less destructive default.
    #[default]
    Complete,
    /// Hard-delete the surviving record.
    Delete,
}

/// TaskWarrior invocation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskwarriorSettings {
    /// The `task` executable to invoke.
    #[serde(default = "default_task_command")]
    pub command: String,
    /// Override for `rc.data.location`, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_location: Option<String>,
}

impl Default for TaskwarriorSettings {
    fn default() -> Self {
        Self { command: default_task_command(), data_location: None }
    }
}

fn default_task_command() -> String {
    "task".to_string()
}

/// Apple Reminders settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemindersSettings {
    /// The reminders list synchronized by default.
    #[serde(default = "default_list")]
    pub list: String,
}

impl Default for RemindersSettings {
    fn default() -> Self {
        Self { list: default_list() }
    }
}

fn default_list() -> String {
    "Reminders".to_string()
}

/// Identity resolution tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchingSettings {
    /// Weight for an exact title match.
    #[serde(default = "default_title_weight")]
    pub title_weight: f64,
    /// Weight for due-date proximity.
    #[serde(default = "default_due_weight")]
    pub due_weight: f64,
    /// Weight for a matching list/project tag.
    #[serde(default = "default_list_weight")]
    pub list_weight: f64,
    /// Window within which due dates count as close, in hours.
    #[serde(default = "default_tolerance_hours")]
    pub due_tolerance_hours: u64,
    /// Minimum score for a pair to be accepted as the same task.
    #[serde(default = "default_threshold")]
    pub acceptance_threshold: f64,
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self {
            title_weight: default_title_weight(),
            due_weight: default_due_weight(),
            list_weight: default_list_weight(),
            due_tolerance_hours: default_tolerance_hours(),
            acceptance_threshold: default_threshold(),
        }
    }
}

const fn default_title_weight() -> f64 {
    0.6
}
const fn default_due_weight() -> f64 {
    0.3
}
const fn default_list_weight() -> f64 {
    0.1
}
const fn default_tolerance_hours() -> u64 {
    24
}
const fn default_threshold() -> f64 {
    0.6
}

/// Top-level taskbridge settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncSettings {
    /// TaskWarrior invocation settings.
    #[serde(default)]
    pub taskwarrior: TaskwarriorSettings,
    /// Apple Reminders settings.
    #[serde(default)]
    pub reminders: RemindersSettings,
    /// Reminders list name -> TaskWarrior project mapping. Lists absent from
    /// the table map to a project of the same name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub list_map: BTreeMap<String, String>,
    /// Identity resolution tuning.
    #[serde(default)]
    pub matching: MatchingSettings,
    /// Conflict resolution policy.
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    /// Deletion propagation policy.
    #[serde(default)]
    pub delete_policy: DeletePolicy,
    /// Per-adapter-call timeout in seconds. Zero disables the timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_timeout_secs() -> u64 {
    30
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            taskwarrior: TaskwarriorSettings::default(),
            reminders: RemindersSettings::default(),
            list_map: BTreeMap::new(),
            matching: MatchingSettings::default(),
            conflict_policy: ConflictPolicy::default(),
            delete_policy: DeletePolicy::default(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl SyncSettings {
    /// Load settings from a specific file, returning `None` if not present.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        let settings: Self = serde_yaml::from_str(&content)?;
        Ok(Some(settings))
    }

    /// Save settings to a specific file, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load settings from the default location, falling back to defaults if
    /// no file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined or the
    /// file is malformed.
    pub fn load_or_default() -> Result<Self> {
        let path = paths::config_path()
            .ok_or_else(|| Error::Config("cannot determine home directory".into()))?;
        Ok(Self::load_from(&path)?.unwrap_or_default())
    }

    /// The per-call adapter timeout, or `None` when disabled.
    #[must_use]
    pub const fn adapter_timeout(&self) -> Option<Duration> {
        if self.timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.timeout_secs))
        }
    }

    /// Map a reminders list name to its TaskWarrior project.
    #[must_use]
    pub fn project_for_list(&self, list: &str) -> String {
        self.list_map.get(list).cloned().unwrap_or_else(|| list.to_string())
    }

    /// Map a TaskWarrior project back to its reminders list name.
    #[must_use]
    pub fn list_for_project(&self, project: &str) -> String {
        self.list_map
            .iter()
            .find(|(_, p)| p.as_str() == project)
            .map_or_else(|| project.to_string(), |(l, _)| l.clone())
    }
}
