//! Testing utilities and mock implementations.
//!
//! These types are provided for use in tests. They may appear unused in
//! the library itself but are consumed by unit tests.

#![allow(dead_code)]
#![allow(clippy::needless_pass_by_ref_mut)] // &mut self for ergonomics with RefCell

use crate::error::{Error, Result};
use crate::record::{RecordDelta, TaskRecord};
use crate::traits::{CommandOutput, CommandRunner, StoreAdapter};
use std::cell::RefCell;
use std::collections::HashSet;
use std::time::Duration;

/// A mock command runner for testing.
///
/// Records expected commands and their outputs, then verifies they were called.
#[derive(Debug, Default)]
pub struct MockCommandRunner {
    expectations: RefCell<Vec<(String, Vec<String>, CommandOutput)>>,
    available_programs: RefCell<Vec<String>>,
    call_index: RefCell<usize>,
}

impl MockCommandRunner {
    /// Create a new mock command runner.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an expected command and its output.
    pub fn expect(&mut self, program: &str, args: &[&str], output: CommandOutput) {
        self.expectations.borrow_mut().push((
            program.to_string(),
            args.iter().map(|s| (*s).to_string()).collect(),
            output,
        ));
    }

    /// Add a program as available.
    pub fn set_available(&mut self, program: &str) {
        self.available_programs.borrow_mut().push(program.to_string());
    }

    /// Verify all expected commands were called.
    ///
    /// # Panics
    ///
    /// Panics if not all expected commands were called.
    pub fn verify(&self) {
        let index = *self.call_index.borrow();
        let expected = self.expectations.borrow().len();
        assert_eq!(
            index, expected,
            "Expected {expected} command calls, but only {index} were made"
        );
    }
}

impl CommandRunner for MockCommandRunner {
    fn run(
        &self,
        program: &str,
        args: &[&str],
        _timeout: Option<Duration>,
    ) -> Result<CommandOutput> {
        let mut index = self.call_index.borrow_mut();
        let expectations = self.expectations.borrow();

        assert!(
            *index < expectations.len(),
            "Unexpected command call: {program} {args:?} (no more expectations)"
        );

        let (exp_program, exp_args, output) = &expectations[*index];
        let args_vec: Vec<String> = args.iter().map(|s| (*s).to_string()).collect();

        assert!(
            !(program != exp_program || &args_vec != exp_args),
            "Command mismatch at index {}:\n  Expected: {} {:?}\n  Got: {} {:?}",
            *index,
            exp_program,
            exp_args,
            program,
            args
        );

        *index += 1;
        Ok(output.clone())
    }

    fn is_available(&self, program: &str) -> bool {
        self.available_programs.borrow().contains(&program.to_string())
    }
}

/// A command runner that always fails, for testing error paths.
#[derive(Debug, Default)]
pub struct FailingCommandRunner {
    error_message: String,
}

impl FailingCommandRunner {
    /// Create a new failing command runner with the specified error message.
    #[must_use]
    pub fn new(error_message: impl Into<String>) -> Self {
        Self { error_message: error_message.into() }
    }
}

impl CommandRunner for FailingCommandRunner {
    fn run(
        &self,
        _program: &str,
        _args: &[&str],
        _timeout: Option<Duration>,
    ) -> Result<CommandOutput> {
        Err(std::io::Error::other(self.error_message.clone()).into())
    }

    fn is_available(&self, _program: &str) -> bool {
        false
    }
}

/// An in-memory store adapter for exercising the sync engine without
/// external processes.
///
/// Records live in a `RefCell`; ids for created records are generated from a
/// per-store prefix. Individual operations can be scripted to fail so tests
/// can cover partial-failure isolation.
#[derive(Debug)]
pub struct MockStoreAdapter {
    name: String,
    records: RefCell<Vec<TaskRecord>>,
    next_id: RefCell<u32>,
    fail_ids: RefCell<HashSet<String>>,
    fail_listing: RefCell<bool>,
    ops: RefCell<Vec<String>>,
}

impl MockStoreAdapter {
    /// Create an empty store with the given name (also used as id prefix).
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: RefCell::new(Vec::new()),
            next_id: RefCell::new(1),
            fail_ids: RefCell::new(HashSet::new()),
            fail_listing: RefCell::new(false),
            ops: RefCell::new(Vec::new()),
        }
    }

    /// Seed a record directly, returning its id.
    pub fn seed(&self, mut record: TaskRecord) -> String {
        if record.id.is_empty() {
            record.id = self.fresh_id();
        }
        let id = record.id.clone();
        self.records.borrow_mut().push(record);
        id
    }

    /// Make every operation touching `id` fail with `AdapterUnavailable`.
    pub fn fail_operations_on(&self, id: &str) {
        self.fail_ids.borrow_mut().insert(id.to_string());
    }

    /// Make `list_all` fail with `AdapterUnavailable`.
    pub fn fail_listing(&self) {
        *self.fail_listing.borrow_mut() = true;
    }

    /// Remove a record without going through the adapter API, simulating an
    /// external deletion between runs.
    pub fn remove_externally(&self, id: &str) {
        self.records.borrow_mut().retain(|r| r.id != id);
    }

    /// Fetch a record by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<TaskRecord> {
        self.records.borrow().iter().find(|r| r.id == id).cloned()
    }

    /// Number of records currently in the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.borrow().is_empty()
    }

    /// The mutating operations performed so far, as "op:id" strings.
    #[must_use]
    pub fn operations(&self) -> Vec<String> {
        self.ops.borrow().clone()
    }

    fn fresh_id(&self) -> String {
        let mut next = self.next_id.borrow_mut();
        let id = format!("{}-{}", self.name, *next);
        *next += 1;
        id
    }

    fn check_failure(&self, id: &str) -> Result<()> {
        if self.fail_ids.borrow().contains(id) {
            return Err(Error::AdapterUnavailable {
                store: self.name.clone(),
                reason: format!("scripted failure for {id}"),
            });
        }
        Ok(())
    }

    fn not_found(&self, id: &str) -> Error {
        Error::RecordNotFound { store: self.name.clone(), id: id.to_string() }
    }
}

impl StoreAdapter for MockStoreAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_all(&self) -> Result<Vec<TaskRecord>> {
        if *self.fail_listing.borrow() {
            return Err(Error::AdapterUnavailable {
                store: self.name.clone(),
                reason: "scripted listing failure".to_string(),
            });
        }
        Ok(self.records.borrow().clone())
    }

    fn create(&self, record: &TaskRecord) -> Result<String> {
        self.check_failure(&record.id)?;
        let mut stored = record.clone();
        stored.id = self.fresh_id();
        let id = stored.id.clone();
        self.records.borrow_mut().push(stored);
        self.ops.borrow_mut().push(format!("create:{id}"));
        Ok(id)
    }

    fn update(&self, external_id: &str, delta: &RecordDelta) -> Result<()> {
        self.check_failure(external_id)?;
        let mut records = self.records.borrow_mut();
        let record = records
            .iter_mut()
            .find(|r| r.id == external_id)
            .ok_or_else(|| self.not_found(external_id))?;
        delta.apply_to(record);
        self.ops.borrow_mut().push(format!("update:{external_id}"));
        Ok(())
    }

    fn complete(&self, external_id: &str) -> Result<()> {
        self.check_failure(external_id)?;
        let mut records = self.records.borrow_mut();
        let record = records
            .iter_mut()
            .find(|r| r.id == external_id)
            .ok_or_else(|| self.not_found(external_id))?;
        record.completed = true;
        self.ops.borrow_mut().push(format!("complete:{external_id}"));
        Ok(())
    }

    fn delete(&self, external_id: &str) -> Result<()> {
        self.check_failure(external_id)?;
        let mut records = self.records.borrow_mut();
        let before = records.len();
        records.retain(|r| r.id != external_id);
        if records.len() == before {
            return Err(self.not_found(external_id));
        }
        self.ops.borrow_mut().push(format!("delete:{external_id}"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_command_runner() {
        let mut runner = MockCommandRunner::new();
        runner.expect(
            "echo",
            &["hello"],
            CommandOutput { exit_code: 0, stdout: "hello\n".to_string(), stderr: String::new() },
        );

        let output = runner.run("echo", &["hello"], None).unwrap();
        assert_eq!(output.stdout, "hello\n");
        runner.verify();
    }

    #[test]
    #[should_panic(expected = "Command mismatch")]
    fn test_mock_command_runner_wrong_command() {
        let mut runner = MockCommandRunner::new();
        runner.expect("echo", &["hello"], CommandOutput::default());

        let _ = runner.run("echo", &["world"], None);
    }

    #[test]
    #[should_panic(expected = "no more expectations")]
    fn test_mock_command_runner_too_many_calls() {
        let runner = MockCommandRunner::new();
        let _ = runner.run("echo", &["hello"], None);
    }

    #[test]
    #[should_panic(expected = "Expected 1 command calls")]
    fn test_mock_command_runner_verify_fails() {
        let mut runner = MockCommandRunner::new();
        runner.expect("echo", &["hello"], CommandOutput::default());
        runner.verify();
    }

    #[test]
    fn test_failing_command_runner() {
        let runner = FailingCommandRunner::new("test error");
        let result = runner.run("any", &["args"], None);
        assert!(result.is_err());
        assert!(!runner.is_available("any"));
    }

    #[test]
    fn test_mock_store_crud() {
        let store = MockStoreAdapter::new("src");
        let id = store.create(&TaskRecord::new("", "Buy milk")).unwrap();
        assert_eq!(id, "src-1");
        assert_eq!(store.len(), 1);

        let delta = RecordDelta { title: Some("Buy oat milk".to_string()), ..Default::default() };
        store.update(&id, &delta).unwrap();
        assert_eq!(store.get(&id).unwrap().title, "Buy oat milk");

        store.complete(&id).unwrap();
        assert!(store.get(&id).unwrap().completed);

        store.delete(&id).unwrap();
        assert!(store.is_empty());
        assert_eq!(
            store.operations(),
            vec!["create:src-1", "update:src-1", "complete:src-1", "delete:src-1"]
        );
    }

    #[test]
    fn test_mock_store_not_found() {
        let store = MockStoreAdapter::new("src");
        assert!(store.update("missing", &RecordDelta::default()).unwrap_err().is_record_not_found());
        assert!(store.delete("missing").unwrap_err().is_record_not_found());
    }

    #[test]
    fn test_mock_store_scripted_failures() {
        let store = MockStoreAdapter::new("src");
        let id = store.seed(TaskRecord::new("x-1", "thing"));
        store.fail_operations_on(&id);
        assert!(matches!(
            store.complete(&id).unwrap_err(),
            Error::AdapterUnavailable { .. }
        ));

        store.fail_listing();
        assert!(store.list_all().is_err());
    }
}
