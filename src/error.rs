//! Error types for `taskbridge`.

use std::path::PathBuf;

/// Errors that can occur while driving the external stores or the sync engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON parsing error occurred.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A YAML parsing error occurred.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A command timed out.
    #[error("Command '{command}' timed out after {timeout_secs} seconds")]
    CommandTimeout {
        /// The command that was run.
        command: String,
        /// The timeout in seconds.
        timeout_secs: u64,
    },

    /// A store's interface could not be reached (tool not installed,
    /// permission denied, service error, timeout). Isolated to the affected
    /// record during the apply phase; fatal only while loading.
    #[error("Store '{store}' is unavailable: {reason}")]
    AdapterUnavailable {
        /// The store that could not be reached.
        store: String,
        /// What went wrong.
        reason: String,
    },

    /// An external id no longer exists in its store. The sync engine treats
    /// this as an implicit delete, never as a user-facing error.
    #[error("Record '{id}' not found in store '{store}'")]
    RecordNotFound {
        /// The store that was queried.
        store: String,
        /// The external id that was not found.
        id: String,
    },

    /// Sync state could not be flushed. Fatal for the run; prior state on
    /// disk is left untouched so the whole run is safe to retry.
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// A configuration problem.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A file was not found.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
}

impl Error {
    /// Whether this error is a not-found signal from a store.
    #[must_use]
    pub const fn is_record_not_found(&self) -> bool {
        matches!(self, Self::RecordNotFound { .. })
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_unavailable_display() {
        let err = Error::AdapterUnavailable {
            store: "reminders".to_string(),
            reason: "osascript not installed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Store 'reminders' is unavailable: osascript not installed"
        );
    }

    #[test]
    fn test_record_not_found_display_and_predicate() {
        let err = Error::RecordNotFound {
            store: "taskwarrior".to_string(),
            id: "abc-123".to_string(),
        };
        assert!(err.is_record_not_found());
        assert!(err.to_string().contains("abc-123"));

        let other = Error::Persistence("disk full".to_string());
        assert!(!other.is_record_not_found());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
