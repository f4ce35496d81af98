//! End-to-end reconciliation tests over in-memory store adapters.

use taskbridge::config::{DeletePolicy, SyncSettings};
use taskbridge::record::{RecordDelta, TaskRecord};
use taskbridge::sync::{CancelToken, SyncEngine, SyncStateStore};
use taskbridge::testing::MockStoreAdapter;
use taskbridge::traits::StoreAdapter;
use tempfile::TempDir;

fn run(
    source: &MockStoreAdapter,
    target: &MockStoreAdapter,
    settings: &SyncSettings,
    store: &SyncStateStore,
) -> taskbridge::sync::SyncReport {
    let engine = SyncEngine::new(source, target, settings);
    engine.run(store, &CancelToken::new()).unwrap()
}

#[test]
fn new_task_flows_to_reminders_and_back() {
    let dir = TempDir::new().unwrap();
    let store = SyncStateStore::new(dir.path().join("sync-state.json"));
    let settings = SyncSettings::default();
    let tasks = MockStoreAdapter::new("task");
    let reminders = MockStoreAdapter::new("rem");

    // A task created on the TaskWarrior side appears as a reminder.
    tasks.seed(TaskRecord::new("uuid-1", "Buy milk"));
    let report = run(&tasks, &reminders, &settings, &store);
    assert_eq!(report.created_target, 1);
    assert_eq!(reminders.len(), 1);

    // Completing the reminder flows back to the task.
    let reminder_id = reminders.list_all().unwrap()[0].id.clone();
    reminders.complete(&reminder_id).unwrap();
    let report = run(&tasks, &reminders, &settings, &store);
    assert_eq!(report.updated_source, 1);
    assert!(tasks.get("uuid-1").unwrap().completed);

    // Settled: further runs change nothing.
    let report = run(&tasks, &reminders, &settings, &store);
    assert_eq!(report.total_changes(), 0);
}

#[test]
fn preexisting_duplicates_are_linked_not_duplicated() {
    let dir = TempDir::new().unwrap();
    let store = SyncStateStore::new(dir.path().join("sync-state.json"));
    let settings = SyncSettings::default();
    let tasks = MockStoreAdapter::new("task");
    let reminders = MockStoreAdapter::new("rem");

    // The same item exists on both sides before the first ever run.
    tasks.seed(TaskRecord::new("uuid-1", "Water plants"));
    reminders.seed(TaskRecord::new("rem-1", "Water plants"));

    let report = run(&tasks, &reminders, &settings, &store);
    assert_eq!(report.linked, 1);
    assert_eq!(report.total_changes(), 0);
    assert_eq!(tasks.len(), 1);
    assert_eq!(reminders.len(), 1);

    let state = store.load().unwrap();
    assert_eq!(state.links.len(), 1);
    assert_eq!(state.links[0].source_id, "uuid-1");
    assert_eq!(state.links[0].target_id, "rem-1");
}

#[test]
fn edits_and_deletions_propagate_across_runs() {
    let dir = TempDir::new().unwrap();
    let store = SyncStateStore::new(dir.path().join("sync-state.json"));
    let mut settings = SyncSettings::default();
    settings.delete_policy = DeletePolicy::Delete;
    let tasks = MockStoreAdapter::new("task");
    let reminders = MockStoreAdapter::new("rem");

    tasks.seed(TaskRecord::new("uuid-1", "Call plumber"));
    tasks.seed(TaskRecord::new("uuid-2", "File taxes"));
    run(&tasks, &reminders, &settings, &store);
    assert_eq!(reminders.len(), 2);

    // Retitle one task, delete the other.
    let delta = RecordDelta { title: Some("Call electrician".to_string()), ..Default::default() };
    tasks.update("uuid-1", &delta).unwrap();
    tasks.remove_externally("uuid-2");

    let report = run(&tasks, &reminders, &settings, &store);
    assert_eq!(report.updated_target, 1);
    assert_eq!(report.deleted_target, 1);

    let remaining = reminders.list_all().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].title, "Call electrician");
    assert_eq!(store.load().unwrap().links.len(), 1);
}

#[test]
fn state_survives_between_engine_instances() {
    let dir = TempDir::new().unwrap();
    let store_path = dir.path().join("sync-state.json");
    let settings = SyncSettings::default();
    let tasks = MockStoreAdapter::new("task");
    let reminders = MockStoreAdapter::new("rem");
    tasks.seed(TaskRecord::new("uuid-1", "Buy milk"));

    {
        let store = SyncStateStore::new(store_path.clone());
        run(&tasks, &reminders, &settings, &store);
    }

    // A fresh store over the same file picks up the existing links.
    let store = SyncStateStore::new(store_path);
    let report = run(&tasks, &reminders, &settings, &store);
    assert_eq!(report.total_changes(), 0);
    assert_eq!(store.load().unwrap().runs, 2);
}
