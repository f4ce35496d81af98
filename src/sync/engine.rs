//! The reconciliation engine: one sync run as a deterministic sequence of
//! phases (Loading, Diffing, Applying, Persisting).
//!
//! The engine exclusively owns the [`SyncState`] for the duration of a run,
//! guarded by an advisory lock on the state file. Reads are fail-fast: an
//! adapter failure while loading aborts before any mutation. Writes are
//! isolated: one failed apply marks only that link as failed and the run
//! carries on, so the final state reflects exactly the subset that
//! succeeded.

use crate::config::{ConflictPolicy, DeletePolicy, SyncSettings};
use crate::error::Result;
use crate::record::TaskRecord;
use crate::sync::resolver::{self, ResolverConfig};
use crate::sync::state::{SyncLink, SyncState, SyncStateStore};
use crate::traits::StoreAdapter;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Engine phases, in run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No run in progress.
    Idle,
    /// Fetching both record sets and the prior state.
    Loading,
    /// Classifying linked pairs and matching unlinked records.
    Diffing,
    /// Issuing directional changes.
    Applying,
    /// Flushing the updated state.
    Persisting,
    /// Terminal: the state could not be flushed.
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Diffing => "diffing",
            Self::Applying => "applying",
            Self::Persisting => "persisting",
            Self::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Cooperative cancellation flag shared with a signal handler.
///
/// Cancelling stops the engine from issuing new apply operations; the run
/// still reaches the persisting phase with whatever subset succeeded.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One record-level operation that failed during the apply phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedItem {
    /// The link id or external id the operation addressed.
    pub id: String,
    /// Why it failed.
    pub error: String,
}

/// Per-run summary surfaced to the caller.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Records created on the source store.
    pub created_source: u32,
    /// Records created on the target store.
    pub created_target: u32,
    /// Records updated on the source store.
    pub updated_source: u32,
    /// Records updated on the target store.
    pub updated_target: u32,
    /// Deletions (or completions, per policy) propagated to the source store.
    pub deleted_source: u32,
    /// Deletions (or completions, per policy) propagated to the target store.
    pub deleted_target: u32,
    /// Conflicts resolved by policy.
    pub conflicts: u32,
    /// New links established by the identity resolver without data movement.
    pub linked: u32,
    /// Links dropped because both sides were gone.
    pub links_dropped: u32,
    /// Linked pairs with no changes on either side.
    pub unchanged: u32,
    /// Operations not issued because the run was cancelled.
    pub skipped: u32,
    /// Operations that failed; the affected links keep their old checksums
    /// and are retried on the next run.
    pub failed: Vec<FailedItem>,
}

impl SyncReport {
    /// Whether any operation failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Total mutations applied to either store.
    #[must_use]
    pub const fn total_changes(&self) -> u32 {
        self.created_source
            + self.created_target
            + self.updated_source
            + self.updated_target
            + self.deleted_source
            + self.deleted_target
    }

    /// Human-readable one-run summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut out = format!(
            "created {}/{}, updated {}/{}, deleted {}/{} (source/target), \
             {} conflicts, {} linked, {} unchanged, {} skipped",
            self.created_source,
            self.created_target,
            self.updated_source,
            self.updated_target,
            self.deleted_source,
            self.deleted_target,
            self.conflicts,
            self.linked,
            self.unchanged,
            self.skipped,
        );
        if self.has_failures() {
            let ids: Vec<&str> = self.failed.iter().map(|f| f.id.as_str()).collect();
            out.push_str(&format!(", {} failed [{}]", self.failed.len(), ids.join(", ")));
        }
        out
    }
}

/// A planned operation produced by the diff phase.
#[derive(Debug, Clone)]
enum Op {
    PushToTarget { link_id: String, source: TaskRecord, target_id: String },
    PushToSource { link_id: String, target: TaskRecord, source_id: String },
    Conflict { link_id: String, source: TaskRecord, target: TaskRecord },
    DeleteOnTarget { link_id: String, target_id: String },
    DeleteOnSource { link_id: String, source_id: String },
    CreateOnTarget { source: TaskRecord },
    CreateOnSource { target: TaskRecord },
    LinkNew { source: TaskRecord, target: TaskRecord },
    DropLink { link_id: String },
}

impl Op {
    /// Stable identifier used when reporting a failure of this operation.
    fn report_id(&self) -> &str {
        match self {
            Self::PushToTarget { link_id, .. }
            | Self::PushToSource { link_id, .. }
            | Self::Conflict { link_id, .. }
            | Self::DeleteOnTarget { link_id, .. }
            | Self::DeleteOnSource { link_id, .. }
            | Self::DropLink { link_id } => link_id,
            Self::CreateOnTarget { source } => &source.id,
            Self::CreateOnSource { target } => &target.id,
            Self::LinkNew { source, .. } => &source.id,
        }
    }

    /// One-line description for dry runs.
    fn describe(&self) -> String {
        match self {
            Self::PushToTarget { source, .. } => format!("push '{}' to target", source.title),
            Self::PushToSource { target, .. } => format!("push '{}' to source", target.title),
            Self::Conflict { source, .. } => format!("resolve conflict on '{}'", source.title),
            Self::DeleteOnTarget { target_id, .. } => {
                format!("propagate deletion to target record {target_id}")
            }
            Self::DeleteOnSource { source_id, .. } => {
                format!("propagate deletion to source record {source_id}")
            }
            Self::CreateOnTarget { source } => format!("create '{}' on target", source.title),
            Self::CreateOnSource { target } => format!("create '{}' on source", target.title),
            Self::LinkNew { source, .. } => format!("link existing pair '{}'", source.title),
            Self::DropLink { link_id } => format!("drop stale link {link_id}"),
        }
    }
}

/// Everything the diff phase decided.
struct DiffPlan {
    ops: Vec<Op>,
    unchanged: u32,
}

/// Orchestrates reconciliation runs between two store adapters.
pub struct SyncEngine<'a> {
    source: &'a dyn StoreAdapter,
    target: &'a dyn StoreAdapter,
    settings: &'a SyncSettings,
}

impl<'a> SyncEngine<'a> {
    /// Create an engine over the two adapters.
    #[must_use]
    pub const fn new(
        source: &'a dyn StoreAdapter,
        target: &'a dyn StoreAdapter,
        settings: &'a SyncSettings,
    ) -> Self {
        Self { source, target, settings }
    }

    /// Execute one reconciliation run against the given state store.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be acquired, either adapter fails
    /// during the loading phase, or the state cannot be persisted. Per-record
    /// apply failures do not error; they are collected in the report.
    pub fn run(&self, store: &SyncStateStore, cancel: &CancelToken) -> Result<SyncReport> {
        let _lock = store.lock()?;

        tracing::info!(phase = %Phase::Loading, "starting sync run");
        let mut state = store.load()?;
        let source_records = self.source.list_all()?;
        let target_records = self.target.list_all()?;

        tracing::info!(
            phase = %Phase::Diffing,
            source_records = source_records.len(),
            target_records = target_records.len(),
            links = state.links.len(),
        );
        let plan = self.diff(&state, &source_records, &target_records);

        tracing::info!(phase = %Phase::Applying, operations = plan.ops.len());
        let mut report = SyncReport { unchanged: plan.unchanged, ..SyncReport::default() };
        for op in plan.ops {
            if cancel.is_cancelled() {
                report.skipped += 1;
                continue;
            }
            self.apply(op, &mut state, &mut report);
        }

        tracing::info!(phase = %Phase::Persisting, links = state.links.len());
        state.runs += 1;
        if let Err(err) = store.save(&state) {
            tracing::error!(phase = %Phase::Failed, %err, "state not flushed");
            return Err(err);
        }

        tracing::info!(phase = %Phase::Idle, summary = %report.summary(), "sync run finished");
        Ok(report)
    }

    /// Compute and describe the operations a run would perform, without
    /// applying anything or touching the state file.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be read or either adapter fails.
    pub fn preview(&self, store: &SyncStateStore) -> Result<Vec<String>> {
        let state = store.load()?;
        let source_records = self.source.list_all()?;
        let target_records = self.target.list_all()?;
        let plan = self.diff(&state, &source_records, &target_records);
        Ok(plan.ops.iter().map(Op::describe).collect())
    }

    /// Classify every linked pair and match the unlinked remainder.
    fn diff(
        &self,
        state: &SyncState,
        source_records: &[TaskRecord],
        target_records: &[TaskRecord],
    ) -> DiffPlan {
        let source_by_id: HashMap<&str, &TaskRecord> =
            source_records.iter().map(|r| (r.id.as_str(), r)).collect();
        let target_by_id: HashMap<&str, &TaskRecord> =
            target_records.iter().map(|r| (r.id.as_str(), r)).collect();

        let mut ops = Vec::new();
        let mut unchanged = 0;
        let mut linked_sources: HashSet<&str> = HashSet::new();
        let mut linked_targets: HashSet<&str> = HashSet::new();

        for link in &state.links {
            linked_sources.insert(link.source_id.as_str());
            linked_targets.insert(link.target_id.as_str());

            let source = source_by_id.get(link.source_id.as_str()).copied();
            let target = target_by_id.get(link.target_id.as_str()).copied();
            match (source, target) {
                (None, None) => ops.push(Op::DropLink { link_id: link.link_id.clone() }),
                (Some(_), None) => ops.push(Op::DeleteOnSource {
                    link_id: link.link_id.clone(),
                    source_id: link.source_id.clone(),
                }),
                (None, Some(_)) => ops.push(Op::DeleteOnTarget {
                    link_id: link.link_id.clone(),
                    target_id: link.target_id.clone(),
                }),
                (Some(source), Some(target)) => {
                    let source_changed = source.checksum() != link.source_checksum;
                    let target_changed = target.checksum() != link.target_checksum;
                    match (source_changed, target_changed) {
                        (false, false) => unchanged += 1,
                        (true, false) => ops.push(Op::PushToTarget {
                            link_id: link.link_id.clone(),
                            source: source.clone(),
                            target_id: link.target_id.clone(),
                        }),
                        (false, true) => ops.push(Op::PushToSource {
                            link_id: link.link_id.clone(),
                            target: target.clone(),
                            source_id: link.source_id.clone(),
                        }),
                        (true, true) => ops.push(Op::Conflict {
                            link_id: link.link_id.clone(),
                            source: source.clone(),
                            target: target.clone(),
                        }),
                    }
                }
            }
        }

        // Completed records that were never linked are history, not new work;
        // matching or recreating them would resurrect finished tasks.
        let unlinked_sources: Vec<TaskRecord> = source_records
            .iter()
            .filter(|r| !linked_sources.contains(r.id.as_str()) && !r.completed)
            .cloned()
            .collect();
        let unlinked_targets: Vec<TaskRecord> = target_records
            .iter()
            .filter(|r| !linked_targets.contains(r.id.as_str()) && !r.completed)
            .cloned()
            .collect();

        let resolver_config = ResolverConfig::from(&self.settings.matching);
        let matches = resolver::match_records(&unlinked_sources, &unlinked_targets, &resolver_config);

        let mut matched_sources: HashSet<usize> = HashSet::new();
        let mut matched_targets: HashSet<usize> = HashSet::new();
        for pair in &matches {
            matched_sources.insert(pair.source_index);
            matched_targets.insert(pair.target_index);
            ops.push(Op::LinkNew {
                source: unlinked_sources[pair.source_index].clone(),
                target: unlinked_targets[pair.target_index].clone(),
            });
        }
        for (index, record) in unlinked_sources.iter().enumerate() {
            if !matched_sources.contains(&index) {
                ops.push(Op::CreateOnTarget { source: record.clone() });
            }
        }
        for (index, record) in unlinked_targets.iter().enumerate() {
            if !matched_targets.contains(&index) {
                ops.push(Op::CreateOnSource { target: record.clone() });
            }
        }

        DiffPlan { ops, unchanged }
    }

    /// Apply one operation, updating state and report. Failures are
    /// recorded, never propagated: the affected link keeps its previous
    /// checksums so the next run retries it.
    fn apply(&self, op: Op, state: &mut SyncState, report: &mut SyncReport) {
        tracing::debug!(op = %op.describe(), "applying");
        let report_id = op.report_id().to_string();
        let result = match op {
            Op::DropLink { link_id } => {
                state.remove_link(&link_id);
                report.links_dropped += 1;
                Ok(())
            }
            Op::PushToTarget { link_id, source, target_id } => {
                self.push_to_target(&link_id, &source, &target_id, state, report)
            }
            Op::PushToSource { link_id, target, source_id } => {
                self.push_to_source(&link_id, &target, &source_id, state, report)
            }
            Op::Conflict { link_id, source, target } => {
                let source_wins = self.source_wins(&source, &target);
                report.conflicts += 1;
                if source_wins {
                    self.push_to_target(&link_id, &source, &target.id, state, report)
                } else {
                    self.push_to_source(&link_id, &target, &source.id, state, report)
                }
            }
            Op::DeleteOnTarget { link_id, target_id } => {
                let result = self.propagate_delete(self.target, &target_id);
                if result.is_ok() {
                    state.remove_link(&link_id);
                    report.deleted_target += 1;
                }
                result
            }
            Op::DeleteOnSource { link_id, source_id } => {
                let result = self.propagate_delete(self.source, &source_id);
                if result.is_ok() {
                    state.remove_link(&link_id);
                    report.deleted_source += 1;
                }
                result
            }
            Op::CreateOnTarget { source } => self.create_on(
                self.target,
                &source,
                state,
                |source_id, target_id, checksum| {
                    SyncLink::new(source_id, target_id, checksum, checksum)
                },
                &mut report.created_target,
            ),
            Op::CreateOnSource { target } => self.create_on(
                self.source,
                &target,
                state,
                |target_id, source_id, checksum| {
                    SyncLink::new(source_id, target_id, checksum, checksum)
                },
                &mut report.created_source,
            ),
            Op::LinkNew { source, target } => self.link_new(&source, &target, state, report),
        };

        if let Err(err) = result {
            tracing::warn!(id = %report_id, %err, "apply failed");
            report.failed.push(FailedItem { id: report_id, error: err.to_string() });
        }
    }

    /// Push source content onto the linked target record.
    fn push_to_target(
        &self,
        link_id: &str,
        source: &TaskRecord,
        target_id: &str,
        state: &mut SyncState,
        report: &mut SyncReport,
    ) -> Result<()> {
        match self.target.update(target_id, &source.content_delta()) {
            Ok(()) => {
                let checksum = source.checksum();
                if let Some(link) = state.link_mut(link_id) {
                    link.source_checksum.clone_from(&checksum);
                    link.target_checksum = checksum;
                }
                report.updated_target += 1;
                Ok(())
            }
            // The target vanished underneath us: an implicit delete. Honor
            // it now rather than pushing stale content back next run.
            Err(err) if err.is_record_not_found() => {
                let result = self.propagate_delete(self.source, &source.id);
                if result.is_ok() {
                    state.remove_link(link_id);
                    report.deleted_source += 1;
                }
                result
            }
            Err(err) => Err(err),
        }
    }

    /// Push target content onto the linked source record.
    fn push_to_source(
        &self,
        link_id: &str,
        target: &TaskRecord,
        source_id: &str,
        state: &mut SyncState,
        report: &mut SyncReport,
    ) -> Result<()> {
        match self.source.update(source_id, &target.content_delta()) {
            Ok(()) => {
                let checksum = target.checksum();
                if let Some(link) = state.link_mut(link_id) {
                    link.source_checksum.clone_from(&checksum);
                    link.target_checksum = checksum;
                }
                report.updated_source += 1;
                Ok(())
            }
            Err(err) if err.is_record_not_found() => {
                let result = self.propagate_delete(self.target, &target.id);
                if result.is_ok() {
                    state.remove_link(link_id);
                    report.deleted_target += 1;
                }
                result
            }
            Err(err) => Err(err),
        }
    }

    /// Apply the configured delete policy to one record. A record that is
    /// already gone counts as success: the deletion is simply already done.
    fn propagate_delete(&self, store: &dyn StoreAdapter, external_id: &str) -> Result<()> {
        let result = match self.settings.delete_policy {
            DeletePolicy::Delete => store.delete(external_id),
            DeletePolicy::Complete => store.complete(external_id),
        };
        match result {
            Err(err) if err.is_record_not_found() => Ok(()),
            other => other,
        }
    }

    /// Create a record on the opposite store and establish the new link.
    fn create_on(
        &self,
        store: &dyn StoreAdapter,
        record: &TaskRecord,
        state: &mut SyncState,
        make_link: impl FnOnce(&str, &str, &str) -> SyncLink,
        counter: &mut u32,
    ) -> Result<()> {
        let new_id = store.create(record)?;
        let checksum = record.checksum();
        state.add_link(make_link(&record.id, &new_id, &checksum))?;
        *counter += 1;
        Ok(())
    }

    /// Establish a link for a resolver match. Equal content just links;
    /// differing content is a conflict resolved by policy before linking.
    fn link_new(
        &self,
        source: &TaskRecord,
        target: &TaskRecord,
        state: &mut SyncState,
        report: &mut SyncReport,
    ) -> Result<()> {
        let source_checksum = source.checksum();
        let target_checksum = target.checksum();
        if source_checksum == target_checksum {
            state.add_link(SyncLink::new(
                &source.id,
                &target.id,
                &source_checksum,
                &target_checksum,
            ))?;
            report.linked += 1;
            return Ok(());
        }

        report.conflicts += 1;
        let winner_checksum = if self.source_wins(source, target) {
            self.target.update(&target.id, &source.content_delta())?;
            report.updated_target += 1;
            source_checksum
        } else {
            self.source.update(&source.id, &target.content_delta())?;
            report.updated_source += 1;
            target_checksum
        };
        state.add_link(SyncLink::new(&source.id, &target.id, &winner_checksum, &winner_checksum))?;
        report.linked += 1;
        Ok(())
    }

    /// Decide a changed-both conflict. Newest-wins compares last-modified
    /// timestamps; a missing timestamp loses to a present one, and an exact
    /// tie goes to the source side. Same inputs, same answer, every run.
    fn source_wins(&self, source: &TaskRecord, target: &TaskRecord) -> bool {
        match self.settings.conflict_policy {
            ConflictPolicy::SourceWins => true,
            ConflictPolicy::TargetWins => false,
            ConflictPolicy::NewestWins => match (source.modified, target.modified) {
                (Some(s), Some(t)) => s >= t,
                (Some(_), None) | (None, None) => true,
                (None, Some(_)) => false,
            },
        }
    }
}
