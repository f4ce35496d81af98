//! Apple Reminders store adapter.
//!
//! Drives the Reminders app through `osascript -l JavaScript` (JXA). Each
//! operation is a fixed script taking its inputs via argv (no string
//! splicing into script source) and printing a JSON document, so output
//! parsing is ordinary serde work. Reminder dates travel as ISO-8601 strings
//! produced by `Date.toISOString()` and are parsed into `DateTime<Utc>` at
//! the boundary.

use crate::config::SyncSettings;
use crate::error::{Error, Result};
use crate::record::{RecordDelta, TaskRecord};
use crate::traits::{CommandOutput, CommandRunner, StoreAdapter};
use chrono::{DateTime, SubsecRound, Utc};
use serde::Deserialize;

/// Store name used in reports and errors.
pub const STORE_NAME: &str = "reminders";

/// Sentinel emitted by the scripts when an id does not resolve.
const NOT_FOUND: &str = "NOT_FOUND";

/// List reminders in a list: argv = [list]. Prints a JSON array.
const LIST_SCRIPT: &str = r"
function run(argv) {
    const app = Application('Reminders');
    const list = app.lists.byName(argv[0]);
    const out = list.reminders().map(function (r) {
        return {
            id: r.id(),
            name: r.name(),
            body: r.body(),
            completed: r.completed(),
            dueDate: r.dueDate() ? r.dueDate().toISOString() : null,
            creationDate: r.creationDate() ? r.creationDate().toISOString() : null,
            modificationDate: r.modificationDate() ? r.modificationDate().toISOString() : null
        };
    });
    return JSON.stringify(out);
}";

/// Create a reminder: argv = [list, name, body, dueISO]. Prints {"id": ...}.
/// Creates the list first if it does not exist yet.
const CREATE_SCRIPT: &str = r"
function run(argv) {
    const app = Application('Reminders');
    let list;
    try { list = app.lists.byName(argv[0]); list.name(); }
    catch (e) {
        list = app.List().make();
        list.name = argv[0];
    }
    const props = { name: argv[1] };
    if (argv[2] !== '') { props.body = argv[2]; }
    if (argv[3] !== '') { props.dueDate = new Date(argv[3]); }
    const reminder = app.Reminder(props);
    list.reminders.push(reminder);
    return JSON.stringify({ id: reminder.id() });
}";

/// Update a reminder: argv = [id, fieldsJSON]. Prints {"ok": true} or NOT_FOUND.
const UPDATE_SCRIPT: &str = r"
function run(argv) {
    const app = Application('Reminders');
    const fields = JSON.parse(argv[1]);
    const matches = app.lists.reminders.whose({ id: argv[0] })();
    const found = matches.map(function (m) { return m[0]; }).filter(Boolean);
    if (found.length === 0) { return 'NOT_FOUND'; }
    const reminder = found[0];
    if ('name' in fields) { reminder.name = fields.name; }
    if ('body' in fields) { reminder.body = fields.body; }
    if ('completed' in fields) { reminder.completed = fields.completed; }
    if ('dueDate' in fields) {
        reminder.dueDate = fields.dueDate === null ? null : new Date(fields.dueDate);
    }
    return JSON.stringify({ ok: true });
}";

/// Delete a reminder: argv = [id]. Prints {"ok": true} or NOT_FOUND.
const DELETE_SCRIPT: &str = r"
function run(argv) {
    const app = Application('Reminders');
    const matches = app.lists.reminders.whose({ id: argv[0] })();
    const found = matches.map(function (m) { return m[0]; }).filter(Boolean);
    if (found.length === 0) { return 'NOT_FOUND'; }
    app.delete(found[0]);
    return JSON.stringify({ ok: true });
}";

/// One entry of the list script's output.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportedReminder {
    id: String,
    name: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    completed: bool,
    #[serde(default)]
    due_date: Option<String>,
    #[serde(default)]
    creation_date: Option<String>,
    #[serde(default)]
    modification_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedReminder {
    id: String,
}

fn parse_iso_date(value: &str) -> Result<DateTime<Utc>> {
    // `toISOString()` carries milliseconds; TaskWarrior stores whole seconds.
    // Truncate here so the same instant hashes identically on both sides.
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc).trunc_subsecs(0))
        .map_err(|e| Error::Config(format!("unrecognized reminder date '{value}': {e}")))
}

fn unavailable(reason: String) -> Error {
    Error::AdapterUnavailable { store: STORE_NAME.to_string(), reason }
}

/// Store adapter for the platform reminders service.
pub struct RemindersAdapter<'a> {
    runner: &'a dyn CommandRunner,
    settings: &'a SyncSettings,
    list: String,
}

impl<'a> RemindersAdapter<'a> {
    /// Create an adapter synchronizing the list named in `settings`.
    #[must_use]
    pub fn new(runner: &'a dyn CommandRunner, settings: &'a SyncSettings) -> Self {
        let list = settings.reminders.list.clone();
        Self { runner, settings, list }
    }

    /// Create an adapter for a specific list, overriding the configured one.
    #[must_use]
    pub fn for_list(
        runner: &'a dyn CommandRunner,
        settings: &'a SyncSettings,
        list: impl Into<String>,
    ) -> Self {
        Self { runner, settings, list: list.into() }
    }

    /// The reminders list this adapter reads and writes.
    #[must_use]
    pub fn list_name(&self) -> &str {
        &self.list
    }

    fn run_script(&self, script: &str, argv: &[&str]) -> Result<CommandOutput> {
        let mut args = vec!["-l", "JavaScript", "-e", script];
        args.extend_from_slice(argv);
        let output = self
            .runner
            .run("osascript", &args, self.settings.adapter_timeout())
            .map_err(|e| unavailable(e.to_string()))?;
        if !output.success() {
            return Err(unavailable(format!(
                "osascript exited with code {}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }
        Ok(output)
    }

    /// Run a script addressing one reminder, mapping the NOT_FOUND sentinel.
    fn run_for_record(&self, script: &str, argv: &[&str], id: &str) -> Result<CommandOutput> {
        let output = self.run_script(script, argv)?;
        if output.stdout.trim() == NOT_FOUND {
            return Err(Error::RecordNotFound {
                store: STORE_NAME.to_string(),
                id: id.to_string(),
            });
        }
        Ok(output)
    }

    fn record_from_export(&self, reminder: ExportedReminder) -> Result<TaskRecord> {
        Ok(TaskRecord {
            id: reminder.id,
            title: reminder.name,
            notes: reminder.body.filter(|b| !b.is_empty()),
            due: reminder.due_date.as_deref().map(parse_iso_date).transpose()?,
            list: Some(self.list.clone()),
            completed: reminder.completed,
            created: reminder.creation_date.as_deref().map(parse_iso_date).transpose()?,
            modified: reminder.modification_date.as_deref().map(parse_iso_date).transpose()?,
        })
    }

    /// JSON field object for the update script.
    fn update_fields(delta: &RecordDelta) -> serde_json::Value {
        let mut fields = serde_json::Map::new();
        if let Some(title) = &delta.title {
            fields.insert("name".to_string(), title.clone().into());
        }
        if let Some(notes) = &delta.notes {
            fields.insert(
                "body".to_string(),
                notes.clone().map_or(serde_json::Value::Null, Into::into),
            );
        }
        if let Some(due) = &delta.due {
            fields.insert(
                "dueDate".to_string(),
                due.map_or(serde_json::Value::Null, |d| d.to_rfc3339().into()),
            );
        }
        if let Some(completed) = delta.completed {
            fields.insert("completed".to_string(), completed.into());
        }
        serde_json::Value::Object(fields)
    }
}

impl StoreAdapter for RemindersAdapter<'_> {
    fn name(&self) -> &str {
        STORE_NAME
    }

    fn list_all(&self) -> Result<Vec<TaskRecord>> {
        if !self.runner.is_available("osascript") {
            return Err(unavailable("osascript is not installed".to_string()));
        }

        let output = self.run_script(LIST_SCRIPT, &[&self.list])?;
        let exported: Vec<ExportedReminder> = serde_json::from_str(output.stdout.trim())
            .map_err(|e| unavailable(format!("malformed reminders output: {e}")))?;
        exported.into_iter().map(|r| self.record_from_export(r)).collect()
    }

    fn create(&self, record: &TaskRecord) -> Result<String> {
        let body = record.notes.clone().unwrap_or_default();
        let due = record.due.map(|d| d.to_rfc3339()).unwrap_or_default();
        let output =
            self.run_script(CREATE_SCRIPT, &[&self.list, &record.title, &body, &due])?;
        let created: CreatedReminder = serde_json::from_str(output.stdout.trim())
            .map_err(|e| unavailable(format!("malformed create output: {e}")))?;

        if record.completed {
            self.complete(&created.id)?;
        }
        Ok(created.id)
    }

    fn update(&self, external_id: &str, delta: &RecordDelta) -> Result<()> {
        let fields = Self::update_fields(delta);
        if fields.as_object().is_some_and(serde_json::Map::is_empty) {
            return Ok(());
        }
        let payload = fields.to_string();
        self.run_for_record(UPDATE_SCRIPT, &[external_id, &payload], external_id)?;
        Ok(())
    }

    fn complete(&self, external_id: &str) -> Result<()> {
        let payload = serde_json::json!({ "completed": true }).to_string();
        self.run_for_record(UPDATE_SCRIPT, &[external_id, &payload], external_id)?;
        Ok(())
    }

    fn delete(&self, external_id: &str) -> Result<()> {
        self.run_for_record(DELETE_SCRIPT, &[external_id], external_id)?;
        Ok(())
    }
}
