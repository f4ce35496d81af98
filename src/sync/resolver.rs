//! Identity resolution across stores that share no primary key.
//!
//! Given the unlinked records from both sides, the resolver scores candidate
//! pairs and accepts the best ones above a configurable threshold. Records
//! with no acceptable match are left for one-directional creation: a
//! duplicate is recoverable, a wrong merge is not.

use crate::config::MatchingSettings;
use crate::record::TaskRecord;
use chrono::Duration;
use std::cmp::Ordering;
use std::collections::HashSet;

/// Resolver tuning derived from [`MatchingSettings`].
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Weight for an exact title match.
    pub title_weight: f64,
    /// Weight for due-date proximity.
    pub due_weight: f64,
    /// Weight for a matching list tag.
    pub list_weight: f64,
    /// Window within which due dates count as close.
    pub due_tolerance: Duration,
    /// Minimum score for a pair to be accepted.
    pub threshold: f64,
}

impl From<&MatchingSettings> for ResolverConfig {
    fn from(settings: &MatchingSettings) -> Self {
        Self {
            title_weight: settings.title_weight,
            due_weight: settings.due_weight,
            list_weight: settings.list_weight,
            due_tolerance: Duration::hours(
                // Clamp absurd configs below Duration's overflow point.
                i64::try_from(settings.due_tolerance_hours)
                    .unwrap_or(i64::MAX)
                    .min(i64::MAX / 3600),
            ),
            threshold: settings.acceptance_threshold,
        }
    }
}

/// An accepted pairing of one source record with one target record.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchPair {
    /// Index into the source slice passed to [`match_records`].
    pub source_index: usize,
    /// Index into the target slice passed to [`match_records`].
    pub target_index: usize,
    /// The similarity score that accepted this pair.
    pub score: f64,
}

/// Score one candidate pair.
///
/// Titles must match exactly (case-insensitive, trimmed) to earn the title
/// weight. Due dates within the tolerance window earn the due weight scaled
/// linearly by proximity; two records with no due date at all agree and earn
/// the full weight. List tags earn their weight on equality.
#[must_use]
pub fn score_pair(source: &TaskRecord, target: &TaskRecord, config: &ResolverConfig) -> f64 {
    let mut score = 0.0;

    if normalize_title(&source.title) == normalize_title(&target.title) {
        score += config.title_weight;
    }

    match (source.due, target.due) {
        (None, None) => score += config.due_weight,
        (Some(a), Some(b)) => {
            let distance = (a - b).abs();
            if distance <= config.due_tolerance {
                let tolerance_secs = config.due_tolerance.num_seconds();
                if tolerance_secs == 0 {
                    score += config.due_weight;
                } else {
                    #[allow(clippy::cast_precision_loss)]
                    let fraction = distance.num_seconds() as f64 / tolerance_secs as f64;
                    score += config.due_weight * (1.0 - fraction);
                }
            }
        }
        _ => {}
    }

    if source.list.is_some() && source.list == target.list {
        score += config.list_weight;
    }

    score
}

fn normalize_title(title: &str) -> String {
    title.trim().to_lowercase()
}

/// Match unlinked records across the two stores.
///
/// Greedy, deterministic: all candidate pairs at or above the threshold are
/// ranked by score (descending), then earliest source creation timestamp,
/// then ids; each record participates in at most one accepted pair.
#[must_use]
pub fn match_records(
    sources: &[TaskRecord],
    targets: &[TaskRecord],
    config: &ResolverConfig,
) -> Vec<MatchPair> {
    let mut candidates = Vec::new();
    for (si, source) in sources.iter().enumerate() {
        for (ti, target) in targets.iter().enumerate() {
            let score = score_pair(source, target, config);
            if score >= config.threshold {
                candidates.push(MatchPair { source_index: si, target_index: ti, score });
            }
        }
    }

    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                let a_created = sources[a.source_index].created;
                let b_created = sources[b.source_index].created;
                // Earliest known creation first; unknown sorts last.
                match (a_created, b_created) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                }
            })
            .then_with(|| sources[a.source_index].id.cmp(&sources[b.source_index].id))
            .then_with(|| targets[a.target_index].id.cmp(&targets[b.target_index].id))
    });

    let mut used_sources = HashSet::new();
    let mut used_targets = HashSet::new();
    let mut accepted = Vec::new();
    for candidate in candidates {
        if used_sources.contains(&candidate.source_index)
            || used_targets.contains(&candidate.target_index)
        {
            continue;
        }
        used_sources.insert(candidate.source_index);
        used_targets.insert(candidate.target_index);
        accepted.push(candidate);
    }
    accepted
}
