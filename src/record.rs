//! Canonical task model shared by both store adapters.
//!
//! Every record crossing an adapter boundary is normalized into a
//! [`TaskRecord`] with timezone-aware UTC timestamps, so the sync engine
//! only ever compares parsed instants, never formatted date strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Canonical in-memory representation of one task/reminder item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Identifier assigned by the owning store (TaskWarrior uuid or
    /// Reminders item id). Opaque to the other store; unique within one store.
    pub id: String,
    /// Short title (TaskWarrior description / reminder name).
    pub title: String,
    /// Free-form notes (first annotation / reminder body).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Due instant, normalized to UTC.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<DateTime<Utc>>,
    /// Project/list tag (TaskWarrior project / Reminders list name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list: Option<String>,
    /// Whether the item is completed.
    #[serde(default)]
    pub completed: bool,
    /// When the record was created in its store, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    /// When the record was last modified in its store, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// Create a record with just an id and title.
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            notes: None,
            due: None,
            list: None,
            completed: false,
            created: None,
            modified: None,
        }
    }

    /// Content checksum used to detect changes between sync runs.
    ///
    /// Hashes only synced content (title, notes, due, completion) so that
    /// identifiers, store-maintained timestamps, and list membership never
    /// trigger a spurious diff. The list tag is a creation-time attribute
    /// and a matching signal, not synced content. Due dates are hashed in
    /// RFC 3339 UTC form, making the checksum identical for the same
    /// instant regardless of which store the record came from.
    #[must_use]
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.title.as_bytes());
        hasher.update([0]);
        hasher.update(self.notes.as_deref().unwrap_or("").as_bytes());
        hasher.update([0]);
        if let Some(due) = self.due {
            hasher.update(due.to_rfc3339().as_bytes());
        }
        hasher.update([0]);
        hasher.update([u8::from(self.completed)]);
        let digest = hasher.finalize();
        let mut out = String::with_capacity(digest.len() * 2);
        for byte in digest {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }

    /// Build the delta that would make another record's content match this
    /// one. List membership is deliberately left out: records join a list at
    /// creation and stay put afterwards.
    #[must_use]
    pub fn content_delta(&self) -> RecordDelta {
        RecordDelta {
            title: Some(self.title.clone()),
            notes: Some(self.notes.clone()),
            due: Some(self.due),
            list: None,
            completed: Some(self.completed),
        }
    }
}

/// Partial update applied through [`crate::traits::StoreAdapter::update`].
///
/// `None` means "leave the field alone"; the inner `Option` on `notes`,
/// `due` and `list` distinguishes "set to this value" from "clear".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordDelta {
    /// New title, if changing.
    pub title: Option<String>,
    /// New notes, if changing (`Some(None)` clears).
    pub notes: Option<Option<String>>,
    /// New due instant, if changing (`Some(None)` clears).
    pub due: Option<Option<DateTime<Utc>>>,
    /// New list/project tag, if changing (`Some(None)` clears).
    pub list: Option<Option<String>>,
    /// New completion state, if changing.
    pub completed: Option<bool>,
}

impl RecordDelta {
    /// Whether the delta changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.notes.is_none()
            && self.due.is_none()
            && self.list.is_none()
            && self.completed.is_none()
    }

    /// Apply the delta to a record in place.
    pub fn apply_to(&self, record: &mut TaskRecord) {
        if let Some(title) = &self.title {
            record.title.clone_from(title);
        }
        if let Some(notes) = &self.notes {
            record.notes.clone_from(notes);
        }
        if let Some(due) = self.due {
            record.due = due;
        }
        if let Some(list) = &self.list {
            record.list.clone_from(list);
        }
        if let Some(completed) = self.completed {
            record.completed = completed;
        }
    }
}
