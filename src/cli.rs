//! Command-line interface for taskbridge.
//!
//! The parser is plain clap derive; every subcommand resolves to one method
//! on [`App`], which returns the text to print. Keeping command execution on
//! a struct holding the settings, runner, and state store means tests can
//! drive the whole surface with mock runners and a temp directory.

use crate::config::{ConflictPolicy, DeletePolicy, SyncSettings};
use crate::error::{Error, Result};
use crate::paths;
use crate::record::{RecordDelta, TaskRecord};
use crate::reminders::RemindersAdapter;
use crate::sync::{CancelToken, SyncEngine, SyncStateStore};
use crate::taskwarrior::{self, TaskwarriorAdapter};
use crate::traits::{CommandRunner, StoreAdapter};
use chrono::{DateTime, NaiveDate, SubsecRound, Utc};
use clap::{Parser, Subcommand};
use std::fmt::Write as _;
use std::path::PathBuf;

/// Keep TaskWarrior and Apple Reminders in step.
#[derive(Parser, Debug)]
#[command(name = "taskbridge")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The command to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one reconciliation pass between TaskWarrior and Reminders.
    Sync {
        /// Reminders list to sync, overriding the configured one.
        #[arg(long)]
        list: Option<String>,

        /// Conflict policy for this run only.
        #[arg(long, value_enum)]
        conflict: Option<ConflictPolicy>,

        /// Delete policy for this run only.
        #[arg(long, value_enum)]
        delete_policy: Option<DeletePolicy>,

        /// Show what would change without applying anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Add a task to TaskWarrior and its linked reminder in one step.
    Add {
        /// Task title.
        title: String,

        /// Due date (RFC 3339 or YYYY-MM-DD).
        #[arg(long)]
        due: Option<String>,

        /// Free-form notes.
        #[arg(long)]
        notes: Option<String>,

        /// Reminders list / TaskWarrior project, overriding the configured one.
        #[arg(long)]
        list: Option<String>,
    },

    /// List tasks from both stores with their link status.
    List {
        /// Include completed items.
        #[arg(long)]
        all: bool,
    },

    /// Mark a task and its linked reminder completed.
    Done {
        /// TaskWarrior uuid.
        id: String,
    },

    /// Delete a task and its linked reminder.
    Delete {
        /// TaskWarrior uuid.
        id: String,
    },

    /// Change fields of a task, propagating to its linked reminder.
    Modify {
        /// TaskWarrior uuid.
        id: String,

        /// New title.
        #[arg(long)]
        title: Option<String>,

        /// New due date (RFC 3339 or YYYY-MM-DD; "none" clears it).
        #[arg(long)]
        due: Option<String>,

        /// New notes (an empty string clears them).
        #[arg(long)]
        notes: Option<String>,
    },

    /// Write a backup of the TaskWarrior data and the link table.
    Backup {
        /// Directory to write into (defaults to ~/.taskbridge/backups).
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Restore TaskWarrior data from a backup file.
    Restore {
        /// A tasks JSON file produced by `backup`.
        file: PathBuf,
    },

    /// Configuration management.
    #[command(subcommand)]
    Config(ConfigCommand),
}

/// Configuration subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the active configuration as YAML.
    Show,

    /// Write a default config file if none exists yet.
    Init,
}

/// Everything command execution needs, bundled for testability.
pub struct App<'a> {
    /// Loaded settings.
    pub settings: SyncSettings,
    /// Runner used to reach the external tools.
    pub runner: &'a dyn CommandRunner,
    /// The persisted link table.
    pub state_store: SyncStateStore,
}

impl App<'_> {
    /// Execute one command, returning the text to print.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying adapters, state store, or
    /// filesystem operations fail.
    pub fn execute(&self, command: Command, cancel: &CancelToken) -> Result<String> {
        match command {
            Command::Sync { list, conflict, delete_policy, dry_run } => {
                self.sync(list, conflict, delete_policy, dry_run, cancel)
            }
            Command::Add { title, due, notes, list } => self.add(&title, due, notes, list),
            Command::List { all } => self.list(all),
            Command::Done { id } => self.done(&id),
            Command::Delete { id } => self.delete(&id),
            Command::Modify { id, title, due, notes } => self.modify(&id, title, due, notes),
            Command::Backup { dir } => self.backup(dir),
            Command::Restore { file } => self.restore(&file),
            Command::Config(ConfigCommand::Show) => self.config_show(),
            Command::Config(ConfigCommand::Init) => Self::config_init(&self.settings),
        }
    }

    fn sync(
        &self,
        list: Option<String>,
        conflict: Option<ConflictPolicy>,
        delete_policy: Option<DeletePolicy>,
        dry_run: bool,
        cancel: &CancelToken,
    ) -> Result<String> {
        let mut settings = self.settings.clone();
        if let Some(list) = list {
            settings.reminders.list = list;
        }
        if let Some(policy) = conflict {
            settings.conflict_policy = policy;
        }
        if let Some(policy) = delete_policy {
            settings.delete_policy = policy;
        }

        let source = TaskwarriorAdapter::new(self.runner, &settings);
        let target = RemindersAdapter::new(self.runner, &settings);
        let engine = SyncEngine::new(&source, &target, &settings);

        if dry_run {
            let plan = engine.preview(&self.state_store)?;
            if plan.is_empty() {
                return Ok("Nothing to do.".to_string());
            }
            let mut out = String::new();
            for step in plan {
                let _ = writeln!(out, "would {step}");
            }
            out.truncate(out.trim_end().len());
            return Ok(out);
        }

        let report = engine.run(&self.state_store, cancel)?;
        Ok(report.summary())
    }

    fn add(
        &self,
        title: &str,
        due: Option<String>,
        notes: Option<String>,
        list: Option<String>,
    ) -> Result<String> {
        let list = list.unwrap_or_else(|| self.settings.reminders.list.clone());
        let mut record = TaskRecord::new("", title);
        record.due = due.as_deref().map(parse_due).transpose()?.flatten();
        record.notes = notes;
        record.list = Some(list.clone());

        let source = TaskwarriorAdapter::new(self.runner, &self.settings);
        let target = RemindersAdapter::for_list(self.runner, &self.settings, list);

        let _lock = self.state_store.lock()?;
        let mut state = self.state_store.load()?;
        let source_id = source.create(&record)?;
        let target_id = target.create(&record)?;
        let checksum = record.checksum();
        state.add_link(crate::sync::SyncLink::new(&source_id, &target_id, &checksum, &checksum))?;
        self.state_store.save(&state)?;

        Ok(format!("Added '{title}' (task {source_id}, reminder {target_id})"))
    }

    fn list(&self, all: bool) -> Result<String> {
        let source = TaskwarriorAdapter::new(self.runner, &self.settings);
        let target = RemindersAdapter::new(self.runner, &self.settings);
        let state = self.state_store.load()?;

        let source_records = source.list_all()?;
        let target_records = target.list_all()?;

        let mut out = String::new();
        for record in &source_records {
            if record.completed && !all {
                continue;
            }
            let linked = state.link_for_source(&record.id).is_some();
            let _ = writeln!(out, "{}", format_row(record, linked, taskwarrior::STORE_NAME));
        }
        for record in &target_records {
            if record.completed && !all {
                continue;
            }
            // Linked reminders already appear through their task.
            if state.link_for_target(&record.id).is_none() {
                let _ = writeln!(out, "{}", format_row(record, false, crate::reminders::STORE_NAME));
            }
        }
        if out.is_empty() {
            return Ok("No tasks.".to_string());
        }
        out.truncate(out.trim_end().len());
        Ok(out)
    }

    fn done(&self, id: &str) -> Result<String> {
        let source = TaskwarriorAdapter::new(self.runner, &self.settings);
        let target = RemindersAdapter::new(self.runner, &self.settings);

        let _lock = self.state_store.lock()?;
        let mut state = self.state_store.load()?;
        let mut record = find_source_record(&source, id)?;
        source.complete(id)?;
        record.completed = true;

        let mut note = String::new();
        if let Some(link) = state.link_for_source(id).cloned() {
            target.complete(&link.target_id)?;
            let checksum = record.checksum();
            if let Some(link) = state.link_mut(&link.link_id) {
                link.source_checksum.clone_from(&checksum);
                link.target_checksum = checksum;
            }
            self.state_store.save(&state)?;
            note = " and its reminder".to_string();
        }
        Ok(format!("Completed '{}'{note}", record.title))
    }

    fn delete(&self, id: &str) -> Result<String> {
        let source = TaskwarriorAdapter::new(self.runner, &self.settings);
        let target = RemindersAdapter::new(self.runner, &self.settings);

        let _lock = self.state_store.lock()?;
        let mut state = self.state_store.load()?;
        let record = find_source_record(&source, id)?;
        source.delete(id)?;

        let mut note = String::new();
        if let Some(link) = state.link_for_source(id).cloned() {
            match target.delete(&link.target_id) {
                Ok(()) => note = " and its reminder".to_string(),
                Err(err) if err.is_record_not_found() => {}
                Err(err) => return Err(err),
            }
            state.remove_link(&link.link_id);
            self.state_store.save(&state)?;
        }
        Ok(format!("Deleted '{}'{note}", record.title))
    }

    fn modify(
        &self,
        id: &str,
        title: Option<String>,
        due: Option<String>,
        notes: Option<String>,
    ) -> Result<String> {
        let delta = RecordDelta {
            title,
            notes: notes.map(|n| if n.is_empty() { None } else { Some(n) }),
            due: due.as_deref().map(parse_due).transpose()?,
            list: None,
            completed: None,
        };
        if delta.is_empty() {
            return Ok("Nothing to change.".to_string());
        }

        let source = TaskwarriorAdapter::new(self.runner, &self.settings);
        let target = RemindersAdapter::new(self.runner, &self.settings);

        let _lock = self.state_store.lock()?;
        let mut state = self.state_store.load()?;
        let mut record = find_source_record(&source, id)?;
        source.update(id, &delta)?;
        delta.apply_to(&mut record);

        let mut note = String::new();
        if let Some(link) = state.link_for_source(id).cloned() {
            target.update(&link.target_id, &delta)?;
            let checksum = record.checksum();
            if let Some(link) = state.link_mut(&link.link_id) {
                link.source_checksum.clone_from(&checksum);
                link.target_checksum = checksum;
            }
            self.state_store.save(&state)?;
            note = " and its reminder".to_string();
        }
        Ok(format!("Modified '{}'{note}", record.title))
    }

    fn backup(&self, dir: Option<PathBuf>) -> Result<String> {
        let dir = match dir {
            Some(dir) => dir,
            None => paths::backups_dir()
                .ok_or_else(|| Error::Config("cannot determine home directory".into()))?,
        };
        std::fs::create_dir_all(&dir)?;

        let source = TaskwarriorAdapter::new(self.runner, &self.settings);
        let stamp = Utc::now().format("%Y%m%d-%H%M%S");
        let tasks_path = dir.join(format!("tasks-{stamp}.json"));
        std::fs::write(&tasks_path, source.export_json()?)?;

        let mut out = format!("Wrote {}", tasks_path.display());
        if self.state_store.path().exists() {
            let state_path = dir.join(format!("sync-state-{stamp}.json"));
            std::fs::copy(self.state_store.path(), &state_path)?;
            let _ = write!(out, "\nWrote {}", state_path.display());
        }
        Ok(out)
    }

    fn restore(&self, file: &std::path::Path) -> Result<String> {
        if !file.exists() {
            return Err(Error::FileNotFound(file.to_path_buf()));
        }
        let source = TaskwarriorAdapter::new(self.runner, &self.settings);
        source.import_json(file)?;
        Ok(format!("Restored tasks from {}", file.display()))
    }

    fn config_show(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.settings)?.trim_end().to_string())
    }

    fn config_init(settings: &SyncSettings) -> Result<String> {
        let path = paths::config_path()
            .ok_or_else(|| Error::Config("cannot determine home directory".into()))?;
        if path.exists() {
            return Ok(format!("Config already exists at {}", path.display()));
        }
        settings.save_to(&path)?;
        Ok(format!("Wrote default config to {}", path.display()))
    }
}

/// Parse a user-supplied due date. Accepts RFC 3339, a bare date (local
/// midnight is not assumed; dates are taken as UTC midnight), or "none" to
/// clear the field.
fn parse_due(value: &str) -> Result<Option<DateTime<Utc>>> {
    if value.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(Some(parsed.with_timezone(&Utc).trunc_subsecs(0)));
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(|| {
            Error::Config(format!("invalid date '{value}'"))
        })?;
        return Ok(Some(DateTime::from_naive_utc_and_offset(midnight, Utc)));
    }
    Err(Error::Config(format!(
        "cannot parse due date '{value}' (expected RFC 3339 or YYYY-MM-DD)"
    )))
}

fn find_source_record(source: &TaskwarriorAdapter<'_>, id: &str) -> Result<TaskRecord> {
    source
        .list_all()?
        .into_iter()
        .find(|r| r.id == id)
        .ok_or_else(|| Error::RecordNotFound {
            store: taskwarrior::STORE_NAME.to_string(),
            id: id.to_string(),
        })
}

fn format_row(record: &TaskRecord, linked: bool, store: &str) -> String {
    let mark = if record.completed { "x" } else { " " };
    let due = record
        .due
        .map(|d| format!(" due {}", d.format("%Y-%m-%d")))
        .unwrap_or_default();
    let origin = if linked { "linked".to_string() } else { format!("{store} only") };
    format!("[{mark}] {}{due} ({origin}) {}", record.title, record.id)
}
