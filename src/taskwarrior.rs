//! TaskWarrior store adapter.
//!
//! Drives the `task` command-line program through a [`CommandRunner`]:
//! `export` for reads and `add`/`modify`/`done`/`delete`/`annotate` for
//! writes. TaskWarrior's compact UTC timestamps (`20250422T120000Z`) are
//! parsed into `DateTime<Utc>` at the boundary; no formatted date string
//! ever reaches the sync engine.

use crate::config::SyncSettings;
use crate::error::{Error, Result};
use crate::record::{RecordDelta, TaskRecord};
use crate::traits::{CommandOutput, CommandRunner, StoreAdapter};
use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::path::Path;

/// Store name used in reports and errors.
pub const STORE_NAME: &str = "taskwarrior";

/// TaskWarrior's export timestamp format.
const TW_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

static CREATED_TASK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Created task (\d+)").expect("static regex is valid"));

/// One entry of `task export` output.
#[derive(Debug, Deserialize)]
struct ExportedTask {
    uuid: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    due: Option<String>,
    #[serde(default)]
    entry: Option<String>,
    #[serde(default)]
    modified: Option<String>,
    #[serde(default)]
    annotations: Vec<Annotation>,
}

#[derive(Debug, Deserialize)]
struct Annotation {
    #[serde(default)]
    description: String,
}

/// Parse a TaskWarrior timestamp (compact or RFC 3339) into a UTC instant.
///
/// # Errors
///
/// Returns a `Config` error naming the unparseable value.
pub fn parse_tw_date(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, TW_DATE_FORMAT) {
        return Ok(naive.and_utc());
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        // Whole seconds everywhere; TaskWarrior cannot store finer anyway.
        return Ok(parsed.with_timezone(&Utc).trunc_subsecs(0));
    }
    Err(Error::Config(format!("unrecognized TaskWarrior date: {value}")))
}

/// Format a UTC instant in TaskWarrior's compact form.
#[must_use]
pub fn format_tw_date(value: DateTime<Utc>) -> String {
    value.format(TW_DATE_FORMAT).to_string()
}

/// Store adapter for the local TaskWarrior database.
pub struct TaskwarriorAdapter<'a> {
    runner: &'a dyn CommandRunner,
    settings: &'a SyncSettings,
}

impl<'a> TaskwarriorAdapter<'a> {
    /// Create an adapter over the given runner and settings.
    #[must_use]
    pub const fn new(runner: &'a dyn CommandRunner, settings: &'a SyncSettings) -> Self {
        Self { runner, settings }
    }

    fn command(&self) -> &str {
        &self.settings.taskwarrior.command
    }

    /// rc overrides prepended to every invocation.
    fn rc_args(&self) -> Vec<String> {
        let mut args = vec!["rc.confirmation=off".to_string(), "rc.verbose=nothing".to_string()];
        if let Some(location) = &self.settings.taskwarrior.data_location {
            args.push(format!("rc.data.location={location}"));
        }
        args
    }

    fn run(&self, extra: &[String]) -> Result<CommandOutput> {
        let mut args = self.rc_args();
        args.extend_from_slice(extra);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self
            .runner
            .run(self.command(), &arg_refs, self.settings.adapter_timeout())
            .map_err(|e| unavailable(e.to_string()))?;
        Ok(output)
    }

    /// Run a command that addresses one task by uuid, mapping "no matches"
    /// failures to [`Error::RecordNotFound`].
    fn run_for_record(&self, external_id: &str, extra: &[String]) -> Result<CommandOutput> {
        let mut args = vec![format!("uuid:{external_id}")];
        args.extend_from_slice(extra);
        let output = self.run(&args)?;
        if !output.success() {
            let combined = output.combined_output();
            if combined.contains("No matches") || combined.contains("no matches") {
                return Err(Error::RecordNotFound {
                    store: STORE_NAME.to_string(),
                    id: external_id.to_string(),
                });
            }
            return Err(unavailable(format!(
                "task exited with code {}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }
        Ok(output)
    }

    fn record_from_export(&self, task: ExportedTask) -> Result<TaskRecord> {
        let due = task.due.as_deref().map(parse_tw_date).transpose()?;
        let created = task.entry.as_deref().map(parse_tw_date).transpose()?;
        let modified = task.modified.as_deref().map(parse_tw_date).transpose()?;
        Ok(TaskRecord {
            id: task.uuid,
            title: task.description,
            // Annotations export oldest-first; the newest one is the synced
            // notes text.
            notes: task
                .annotations
                .into_iter()
                .map(|a| a.description)
                .rev()
                .find(|d| !d.is_empty()),
            due,
            list: task.project.as_deref().map(|p| self.settings.list_for_project(p)),
            completed: task.status == "completed",
            created,
            modified,
        })
    }

    /// Modification arguments shared by create and update.
    fn modification_args(&self, delta: &RecordDelta) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(title) = &delta.title {
            args.push(title.clone());
        }
        if let Some(list) = &delta.list {
            match list {
                Some(name) => args.push(format!("project:{}", self.settings.project_for_list(name))),
                None => args.push("project:".to_string()),
            }
        }
        if let Some(due) = &delta.due {
            match due {
                Some(instant) => args.push(format!("due:{}", format_tw_date(*instant))),
                None => args.push("due:".to_string()),
            }
        }
        args
    }

    /// Export the raw task JSON, for backups.
    ///
    /// # Errors
    ///
    /// Returns `AdapterUnavailable` if the export fails.
    pub fn export_json(&self) -> Result<String> {
        let args = vec!["rc.json.array=on".to_string(), "export".to_string()];
        let output = self.run(&args)?;
        if !output.success() {
            return Err(unavailable(format!("export failed: {}", output.stderr.trim())));
        }
        Ok(output.stdout)
    }

    /// Replace the synced annotation. The sync owns one annotation per
    /// task: whatever is there is dropped first, then the new text is
    /// written, so reads and writes always agree on the same note.
    fn replace_annotation(&self, external_id: &str, notes: Option<&str>) -> Result<()> {
        let args = vec![format!("uuid:{external_id}"), "denotate".to_string()];
        let output = self.run(&args)?;
        if !output.success() {
            let combined = output.combined_output();
            if combined.contains("No matches") || combined.contains("no matches") {
                return Err(Error::RecordNotFound {
                    store: STORE_NAME.to_string(),
                    id: external_id.to_string(),
                });
            }
            // A task with no annotations exits non-zero; nothing to remove.
        }
        if let Some(notes) = notes {
            self.run_for_record(external_id, &["annotate".to_string(), notes.to_string()])?;
        }
        Ok(())
    }

    /// Import tasks from a JSON file previously produced by [`Self::export_json`].
    ///
    /// # Errors
    ///
    /// Returns `AdapterUnavailable` if the import fails, or `FileNotFound`
    /// if the file does not exist.
    pub fn import_json(&self, file: &Path) -> Result<()> {
        if !file.exists() {
            return Err(Error::FileNotFound(file.to_path_buf()));
        }
        let args = vec!["import".to_string(), file.to_string_lossy().into_owned()];
        let output = self.run(&args)?;
        if !output.success() {
            return Err(unavailable(format!("import failed: {}", output.stderr.trim())));
        }
        Ok(())
    }
}

fn unavailable(reason: String) -> Error {
    Error::AdapterUnavailable { store: STORE_NAME.to_string(), reason }
}

impl StoreAdapter for TaskwarriorAdapter<'_> {
    fn name(&self) -> &str {
        STORE_NAME
    }

    fn list_all(&self) -> Result<Vec<TaskRecord>> {
        if !self.runner.is_available(self.command()) {
            return Err(unavailable(format!("'{}' is not installed", self.command())));
        }

        let args = vec!["rc.json.array=on".to_string(), "export".to_string()];
        let output = self.run(&args)?;
        if !output.success() {
            return Err(unavailable(format!("export failed: {}", output.stderr.trim())));
        }

        let exported: Vec<ExportedTask> = serde_json::from_str(&output.stdout)
            .map_err(|e| unavailable(format!("malformed export output: {e}")))?;

        // Deleted tasks stay in TaskWarrior's database but are dead to the
        // sync; their absence here is the engine's delete signal.
        exported
            .into_iter()
            .filter(|t| t.status != "deleted")
            .map(|t| self.record_from_export(t))
            .collect()
    }

    fn create(&self, record: &TaskRecord) -> Result<String> {
        let mut args = vec!["add".to_string(), record.title.clone()];
        if let Some(list) = &record.list {
            args.push(format!("project:{}", self.settings.project_for_list(list)));
        }
        if let Some(due) = record.due {
            args.push(format!("due:{}", format_tw_date(due)));
        }

        let output = self.run(&args)?;
        if !output.success() {
            return Err(unavailable(format!("add failed: {}", output.stderr.trim())));
        }

        let combined = output.combined_output();
        let numeric_id = CREATED_TASK_RE
            .captures(&combined)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| unavailable(format!("could not parse add output: {combined}")))?;

        // The working id is transient; resolve it to the stable uuid.
        let uuid_output = self.run(&[numeric_id, "uuids".to_string()])?;
        let uuid = uuid_output.stdout.trim().to_string();
        if uuid.is_empty() {
            return Err(unavailable("new task uuid not found".to_string()));
        }

        if let Some(notes) = &record.notes {
            self.run_for_record(&uuid, &["annotate".to_string(), notes.clone()])?;
        }
        if record.completed {
            self.run_for_record(&uuid, &["done".to_string()])?;
        }

        Ok(uuid)
    }

    fn update(&self, external_id: &str, delta: &RecordDelta) -> Result<()> {
        let mut modify = self.modification_args(delta);
        if delta.completed == Some(false) {
            modify.push("status:pending".to_string());
        }
        if !modify.is_empty() {
            let mut args = vec!["modify".to_string()];
            args.append(&mut modify);
            self.run_for_record(external_id, &args)?;
        }
        if let Some(notes) = &delta.notes {
            self.replace_annotation(external_id, notes.as_deref())?;
        }
        if delta.completed == Some(true) {
            self.run_for_record(external_id, &["done".to_string()])?;
        }
        Ok(())
    }

    fn complete(&self, external_id: &str) -> Result<()> {
        self.run_for_record(external_id, &["done".to_string()])?;
        Ok(())
    }

    fn delete(&self, external_id: &str) -> Result<()> {
        self.run_for_record(external_id, &["delete".to_string()])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockCommandRunner;
    use chrono::TimeZone;

    fn settings() -> SyncSettings {
        SyncSettings::default()
    }

    fn ok_output(stdout: &str) -> CommandOutput {
        CommandOutput { exit_code: 0, stdout: stdout.to_string(), stderr: String::new() }
    }

    #[test]
    fn test_parse_tw_date_compact() {
        let parsed = parse_tw_date("20250422T120000Z").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 4, 22, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_tw_date_rfc3339_fallback() {
        let parsed = parse_tw_date("2025-04-22T12:00:00+02:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 4, 22, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_tw_date_rejects_garbage() {
        assert!(parse_tw_date("next tuesday").is_err());
    }

    #[test]
    fn test_format_round_trips() {
        let instant = Utc.with_ymd_and_hms(2025, 4, 22, 9, 30, 0).unwrap();
        assert_eq!(parse_tw_date(&format_tw_date(instant)).unwrap(), instant);
    }

    #[test]
    fn test_list_all_parses_export() {
        let export = r#"[
            {"uuid": "a-1", "description": "Buy milk", "status": "pending",
             "due": "20250422T000000Z", "entry": "20250401T080000Z",
             "modified": "20250402T080000Z", "project": "home",
             "annotations": [{"description": "semi-skimmed"}]},
            {"uuid": "a-2", "description": "Old chore", "status": "deleted"},
            {"uuid": "a-3", "description": "Shipped", "status": "completed"}
        ]"#;

        let mut runner = MockCommandRunner::new();
        runner.set_available("task");
        runner.expect(
            "task",
            &["rc.confirmation=off", "rc.verbose=nothing", "rc.json.array=on", "export"],
            ok_output(export),
        );

        let s = settings();
        let adapter = TaskwarriorAdapter::new(&runner, &s);
        let records = adapter.list_all().unwrap();
        runner.verify();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "a-1");
        assert_eq!(records[0].title, "Buy milk");
        assert_eq!(records[0].notes.as_deref(), Some("semi-skimmed"));
        assert_eq!(records[0].list.as_deref(), Some("home"));
        assert_eq!(records[0].due, Some(Utc.with_ymd_and_hms(2025, 4, 22, 0, 0, 0).unwrap()));
        assert!(!records[0].completed);
        assert!(records[1].completed);
    }

    #[test]
    fn test_list_all_unavailable_when_not_installed() {
        let runner = MockCommandRunner::new();
        let s = settings();
        let adapter = TaskwarriorAdapter::new(&runner, &s);
        let err = adapter.list_all().unwrap_err();
        assert!(matches!(err, Error::AdapterUnavailable { .. }));
    }

    #[test]
    fn test_create_resolves_uuid() {
        let mut runner = MockCommandRunner::new();
        runner.expect(
            "task",
            &[
                "rc.confirmation=off",
                "rc.verbose=nothing",
                "add",
                "Buy milk",
                "project:home",
                "due:20250422T000000Z",
            ],
            ok_output("Created task 7.\n"),
        );
        runner.expect(
            "task",
            &["rc.confirmation=off", "rc.verbose=nothing", "7", "uuids"],
            ok_output("a1b2c3d4\n"),
        );

        let s = settings();
        let adapter = TaskwarriorAdapter::new(&runner, &s);
        let mut record = TaskRecord::new("", "Buy milk");
        record.list = Some("home".to_string());
        record.due = Some(Utc.with_ymd_and_hms(2025, 4, 22, 0, 0, 0).unwrap());

        let uuid = adapter.create(&record).unwrap();
        assert_eq!(uuid, "a1b2c3d4");
        runner.verify();
    }

    #[test]
    fn test_create_applies_list_mapping() {
        let mut runner = MockCommandRunner::new();
        runner.expect(
            "task",
            &["rc.confirmation=off", "rc.verbose=nothing", "add", "Sweep", "project:home"],
            ok_output("Created task 2.\n"),
        );
        runner.expect(
            "task",
            &["rc.confirmation=off", "rc.verbose=nothing", "2", "uuids"],
            ok_output("u-2\n"),
        );

        let mut s = settings();
        s.list_map.insert("Chores".to_string(), "home".to_string());
        let adapter = TaskwarriorAdapter::new(&runner, &s);
        let mut record = TaskRecord::new("", "Sweep");
        record.list = Some("Chores".to_string());

        adapter.create(&record).unwrap();
        runner.verify();
    }

    #[test]
    fn test_update_maps_no_matches_to_not_found() {
        let mut runner = MockCommandRunner::new();
        runner.expect(
            "task",
            &["rc.confirmation=off", "rc.verbose=nothing", "uuid:gone", "modify", "New title"],
            CommandOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: "No matches.\n".to_string(),
            },
        );

        let s = settings();
        let adapter = TaskwarriorAdapter::new(&runner, &s);
        let delta = RecordDelta { title: Some("New title".to_string()), ..Default::default() };
        let err = adapter.update("gone", &delta).unwrap_err();
        assert!(err.is_record_not_found());
    }

    #[test]
    fn test_update_pushes_completion_as_done() {
        let mut runner = MockCommandRunner::new();
        runner.expect(
            "task",
            &["rc.confirmation=off", "rc.verbose=nothing", "uuid:u-1", "done"],
            ok_output(""),
        );

        let s = settings();
        let adapter = TaskwarriorAdapter::new(&runner, &s);
        let delta = RecordDelta { completed: Some(true), ..Default::default() };
        adapter.update("u-1", &delta).unwrap();
        runner.verify();
    }

    #[test]
    fn test_update_replaces_notes() {
        let mut runner = MockCommandRunner::new();
        runner.expect(
            "task",
            &["rc.confirmation=off", "rc.verbose=nothing", "uuid:u-1", "denotate"],
            ok_output(""),
        );
        runner.expect(
            "task",
            &["rc.confirmation=off", "rc.verbose=nothing", "uuid:u-1", "annotate", "fresh note"],
            ok_output(""),
        );

        let s = settings();
        let adapter = TaskwarriorAdapter::new(&runner, &s);
        let delta = RecordDelta { notes: Some(Some("fresh note".to_string())), ..Default::default() };
        adapter.update("u-1", &delta).unwrap();
        runner.verify();
    }

    #[test]
    fn test_update_clears_notes() {
        let mut runner = MockCommandRunner::new();
        runner.expect(
            "task",
            &["rc.confirmation=off", "rc.verbose=nothing", "uuid:u-1", "denotate"],
            ok_output(""),
        );

        let s = settings();
        let adapter = TaskwarriorAdapter::new(&runner, &s);
        let delta = RecordDelta { notes: Some(None), ..Default::default() };
        adapter.update("u-1", &delta).unwrap();
        runner.verify();
    }

    #[test]
    fn test_update_notes_tolerates_missing_annotation() {
        let mut runner = MockCommandRunner::new();
        runner.expect(
            "task",
            &["rc.confirmation=off", "rc.verbose=nothing", "uuid:u-1", "denotate"],
            CommandOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: "Task u-1 has no annotations.\n".to_string(),
            },
        );
        runner.expect(
            "task",
            &["rc.confirmation=off", "rc.verbose=nothing", "uuid:u-1", "annotate", "first note"],
            ok_output(""),
        );

        let s = settings();
        let adapter = TaskwarriorAdapter::new(&runner, &s);
        let delta = RecordDelta { notes: Some(Some("first note".to_string())), ..Default::default() };
        adapter.update("u-1", &delta).unwrap();
        runner.verify();
    }

    #[test]
    fn test_pushed_notes_round_trip_keeps_checksum_stable() {
        // A notes push followed by a re-list must read back the pushed text,
        // or every following run would see a phantom change.
        let mut runner = MockCommandRunner::new();
        runner.set_available("task");
        runner.expect(
            "task",
            &["rc.confirmation=off", "rc.verbose=nothing", "uuid:a-1", "denotate"],
            ok_output(""),
        );
        runner.expect(
            "task",
            &["rc.confirmation=off", "rc.verbose=nothing", "uuid:a-1", "annotate", "updated note"],
            ok_output(""),
        );
        let export = r#"[
            {"uuid": "a-1", "description": "Buy milk", "status": "pending",
             "annotations": [{"description": "stale note"},
                             {"description": "updated note"}]}
        ]"#;
        runner.expect(
            "task",
            &["rc.confirmation=off", "rc.verbose=nothing", "rc.json.array=on", "export"],
            ok_output(export),
        );

        let s = settings();
        let adapter = TaskwarriorAdapter::new(&runner, &s);
        let delta = RecordDelta { notes: Some(Some("updated note".to_string())), ..Default::default() };
        adapter.update("a-1", &delta).unwrap();

        let listed = adapter.list_all().unwrap().pop().unwrap();
        runner.verify();
        assert_eq!(listed.notes.as_deref(), Some("updated note"));

        let mut pushed = TaskRecord::new("a-1", "Buy milk");
        pushed.notes = Some("updated note".to_string());
        assert_eq!(listed.checksum(), pushed.checksum());
    }

    #[test]
    fn test_parse_tw_date_truncates_subseconds() {
        let parsed = parse_tw_date("2025-04-22T12:00:00.750Z").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 4, 22, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_update_clears_due_and_project() {
        let mut runner = MockCommandRunner::new();
        runner.expect(
            "task",
            &["rc.confirmation=off", "rc.verbose=nothing", "uuid:u-1", "modify", "project:", "due:"],
            ok_output(""),
        );

        let s = settings();
        let adapter = TaskwarriorAdapter::new(&runner, &s);
        let delta = RecordDelta { list: Some(None), due: Some(None), ..Default::default() };
        adapter.update("u-1", &delta).unwrap();
        runner.verify();
    }

    #[test]
    fn test_delete_uses_confirmation_off() {
        let mut runner = MockCommandRunner::new();
        runner.expect(
            "task",
            &["rc.confirmation=off", "rc.verbose=nothing", "uuid:u-1", "delete"],
            ok_output(""),
        );

        let s = settings();
        let adapter = TaskwarriorAdapter::new(&runner, &s);
        adapter.delete("u-1").unwrap();
        runner.verify();
    }

    #[test]
    fn test_data_location_override_included() {
        let mut runner = MockCommandRunner::new();
        runner.expect(
            "task",
            &[
                "rc.confirmation=off",
                "rc.verbose=nothing",
                "rc.data.location=/tmp/tw",
                "uuid:u-1",
                "done",
            ],
            ok_output(""),
        );

        let mut s = settings();
        s.taskwarrior.data_location = Some("/tmp/tw".to_string());
        let adapter = TaskwarriorAdapter::new(&runner, &s);
        adapter.complete("u-1").unwrap();
        runner.verify();
    }
}
