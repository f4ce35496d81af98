//! Core traits for testability and abstraction.

use crate::error::Result;
use crate::record::{RecordDelta, TaskRecord};
use std::time::Duration;

/// Output from a command execution.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// The exit code of the command.
    pub exit_code: i32,
    /// The stdout output.
    pub stdout: String,
    /// The stderr output.
    pub stderr: String,
}

impl CommandOutput {
    /// Check if the command succeeded (exit code 0).
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Get combined stdout and stderr.
    #[must_use]
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Trait for running shell commands.
///
/// This trait abstracts command execution for testability. Both store
/// adapters invoke their external tools exclusively through it, so the sync
/// engine never depends on a specific invocation mechanism.
pub trait CommandRunner {
    /// Run a command with the given arguments and timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be spawned, or
    /// [`crate::error::Error::CommandTimeout`] if it exceeds `timeout`.
    fn run(&self, program: &str, args: &[&str], timeout: Option<Duration>)
        -> Result<CommandOutput>;

    /// Check if a program is available in PATH.
    fn is_available(&self, program: &str) -> bool;
}

/// One side of a synchronization: a store of task records addressed by
/// store-assigned external ids.
///
/// Implementations expose their external system's records directly and own
/// no persistent state of their own; mapping between stores lives in
/// [`crate::sync::state::SyncState`].
///
/// # Errors
///
/// All operations report [`crate::error::Error::AdapterUnavailable`] when
/// the underlying interface is unreachable and
/// [`crate::error::Error::RecordNotFound`] when the external id no longer
/// exists.
pub trait StoreAdapter {
    /// Short store name used in reports and error messages.
    fn name(&self) -> &str;

    /// Fetch every live record in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached or its output cannot
    /// be parsed.
    fn list_all(&self) -> Result<Vec<TaskRecord>>;

    /// Create a record, returning the external id the store assigned.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the record or is unreachable.
    fn create(&self, record: &TaskRecord) -> Result<String>;

    /// Apply a partial update to an existing record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is gone or the store is unreachable.
    fn update(&self, external_id: &str, delta: &RecordDelta) -> Result<()>;

    /// Mark a record completed.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is gone or the store is unreachable.
    fn complete(&self, external_id: &str) -> Result<()>;

    /// Permanently delete a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is gone or the store is unreachable.
    fn delete(&self, external_id: &str) -> Result<()>;
}
