//! Structural merge-conflict detection
//!
//! Diffs each side of a prospective merge against the common ancestor and
//! cross-references the two diffs per table. Textual conflicts from git are
//! reported alongside, since a JSON-level merge can both miss and invent
//! schema-level disagreements.
//!
//! Detection is read-only and advisory: every failure degrades to a neutral
//! report with an explanatory summary.

use crate::config::Versioning;
use crate::diff::{diff, ChangeStatus, DiffResult, TableDiff};
use crate::store::SnapshotStore;
use crate::timeline::SnapshotHistory;
use crate::vcs::VersionControl;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub const SAFE_TO_MERGE: &str = "no conflicts — safe to merge";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictKind {
    BothModified,
    ModifiedDeleted,
    BothAdded,
}

/// Declared most severe first, so the derived ordering sorts high before low
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictingColumn {
    pub name: String,
    pub ours_change: ChangeStatus,
    pub theirs_change: ChangeStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaConflict {
    pub schema: String,
    pub table: String,
    pub kind: ConflictKind,
    pub severity: Severity,
    pub description: String,
    /// Columns changed on both sides; only for high-severity both-modified
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<ConflictingColumn>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReport {
    /// `None` outside git or on a detached HEAD
    pub current_branch: Option<String>,
    pub target_branch: String,
    pub merge_base: Option<String>,
    /// Paths git would leave textually conflicted
    pub textual_conflicts: Vec<String>,
    pub conflicts: Vec<SchemaConflict>,
    /// Whether the snapshot file is among `textual_conflicts`
    pub snapshot_conflicted: bool,
    pub conflict_count: usize,
    pub summary: String,
}

impl ConflictReport {
    fn neutral(current_branch: Option<String>, target: &str, summary: String) -> Self {
        Self {
            current_branch,
            target_branch: target.to_string(),
            merge_base: None,
            textual_conflicts: Vec::new(),
            conflicts: Vec::new(),
            snapshot_conflicted: false,
            conflict_count: 0,
            summary,
        }
    }

    pub fn has_conflicts(&self) -> bool {
        self.conflict_count > 0 || self.snapshot_conflicted
    }
}

/// Compares the current branch of a project against a target branch
pub struct ConflictDetector<'a, V: VersionControl, S: SnapshotStore> {
    vcs: &'a V,
    history: SnapshotHistory<'a, V, S>,
}

impl<'a, V: VersionControl, S: SnapshotStore> ConflictDetector<'a, V, S> {
    pub fn new(vcs: &'a V, store: &'a S, versioning: Versioning) -> Self {
        Self {
            vcs,
            history: SnapshotHistory::new(vcs, store, versioning),
        }
    }

    pub fn detect_conflicts(&self, project_id: &str, target: &str) -> ConflictReport {
        let Some(tracked) = self.history.tracked_file(project_id) else {
            return ConflictReport::neutral(
                None,
                target,
                "project is not under version control; nothing to compare".to_string(),
            );
        };

        let current_branch = match self.vcs.status(&tracked.root) {
            Ok(status) => status.branch,
            Err(e) => {
                tracing::warn!(project = project_id, error = %e, "could not read branch");
                None
            }
        };
        let current_ref = current_branch.clone().unwrap_or_else(|| "HEAD".to_string());

        match self.vcs.resolve_ref(&tracked.root, target) {
            Ok(Some(_)) => {}
            Ok(None) => {
                return ConflictReport::neutral(
                    current_branch,
                    target,
                    format!("target branch '{}' was not found", target),
                );
            }
            Err(e) => {
                return ConflictReport::neutral(
                    current_branch,
                    target,
                    format!("could not resolve target branch '{}': {}", target, e),
                );
            }
        }

        let merge_base = match self.vcs.merge_base(&tracked.root, &current_ref, target) {
            Ok(Some(hash)) => hash,
            Ok(None) => {
                return ConflictReport::neutral(
                    current_branch,
                    target,
                    format!(
                        "'{}' and '{}' share no common history; structural comparison is not possible",
                        current_ref, target
                    ),
                );
            }
            Err(e) => {
                return ConflictReport::neutral(
                    current_branch,
                    target,
                    format!("could not find a common ancestor: {}", e),
                );
            }
        };

        let textual_conflicts = match self.vcs.dry_run_merge(&tracked.root, target) {
            Ok(paths) => paths,
            Err(e) => {
                tracing::warn!(project = project_id, error = %e, "dry-run merge failed");
                Vec::new()
            }
        };
        let snapshot_conflicted = textual_conflicts.iter().any(|p| *p == tracked.rel_path);

        let base = self.history.snapshot_at(&tracked, &merge_base);
        let ours = self.history.snapshot_at(&tracked, &current_ref);
        let theirs = self.history.snapshot_at(&tracked, target);

        let ours_diff = diff(base.as_ref(), ours.as_ref());
        let theirs_diff = diff(base.as_ref(), theirs.as_ref());
        let conflicts = classify(&ours_diff, &theirs_diff, &current_ref, target);

        tracing::debug!(
            project = project_id,
            merge_base = %merge_base,
            structural = conflicts.len(),
            textual = textual_conflicts.len(),
            "conflict detection finished"
        );

        let summary = summarize(&conflicts, snapshot_conflicted);
        ConflictReport {
            current_branch,
            target_branch: target.to_string(),
            merge_base: Some(merge_base),
            textual_conflicts,
            conflict_count: conflicts.len(),
            conflicts,
            snapshot_conflicted,
            summary,
        }
    }
}

/// Cross-reference two diffs taken from the same base, most severe first.
///
/// A table only one side touched is never a conflict. Disjoint column edits
/// to the same table still count, at low severity: independent column
/// changes do not guarantee the merged table makes sense (a rename split
/// across branches, for one).
pub fn classify(ours: &DiffResult, theirs: &DiffResult, ours_label: &str, theirs_label: &str) -> Vec<SchemaConflict> {
    let theirs_tables: HashMap<(&str, &str), &TableDiff> = theirs
        .schemas
        .iter()
        .flat_map(|s| s.tables.iter().map(move |t| ((s.name.as_str(), t.name.as_str()), t)))
        .collect();

    let mut conflicts = Vec::new();
    for schema in &ours.schemas {
        for ours_table in schema.tables.iter().filter(|t| t.status.is_change()) {
            let Some(theirs_table) = theirs_tables
                .get(&(schema.name.as_str(), ours_table.name.as_str()))
                .filter(|t| t.status.is_change())
            else {
                continue;
            };

            let qualified = format!("{}.{}", schema.name, ours_table.name);
            let conflict = |kind, severity, description, columns| SchemaConflict {
                schema: schema.name.clone(),
                table: ours_table.name.clone(),
                kind,
                severity,
                description,
                columns,
            };

            match (ours_table.status, theirs_table.status) {
                (ChangeStatus::Removed, ChangeStatus::Modified) => conflicts.push(conflict(
                    ConflictKind::ModifiedDeleted,
                    Severity::High,
                    format!("{} was removed on {} but modified on {}", qualified, ours_label, theirs_label),
                    None,
                )),
                (ChangeStatus::Modified, ChangeStatus::Removed) => conflicts.push(conflict(
                    ConflictKind::ModifiedDeleted,
                    Severity::High,
                    format!("{} was modified on {} but removed on {}", qualified, ours_label, theirs_label),
                    None,
                )),
                (ChangeStatus::Added, ChangeStatus::Added) => conflicts.push(conflict(
                    ConflictKind::BothAdded,
                    Severity::Medium,
                    format!("{} was added independently on both sides; definitions may differ", qualified),
                    None,
                )),
                (ChangeStatus::Modified, ChangeStatus::Modified) => {
                    let overlapping = overlapping_columns(ours_table, theirs_table);
                    if overlapping.is_empty() {
                        conflicts.push(conflict(
                            ConflictKind::BothModified,
                            Severity::Low,
                            format!("{} was modified on both sides in different columns", qualified),
                            None,
                        ));
                    } else {
                        let names: Vec<&str> = overlapping.iter().map(|c| c.name.as_str()).collect();
                        let description = format!(
                            "{} has columns changed on both sides: {}",
                            qualified,
                            names.join(", ")
                        );
                        conflicts.push(conflict(
                            ConflictKind::BothModified,
                            Severity::High,
                            description,
                            Some(overlapping),
                        ));
                    }
                }
                // Removed on both sides agrees; other pairs cannot come from one base
                _ => {}
            }
        }
    }

    conflicts.sort_by_key(|c| c.severity);
    conflicts
}

/// Columns changed on both sides, in our column order
fn overlapping_columns(ours: &TableDiff, theirs: &TableDiff) -> Vec<ConflictingColumn> {
    let theirs_changed: HashMap<&str, ChangeStatus> = theirs
        .changed_columns()
        .map(|c| (c.name.as_str(), c.status))
        .collect();

    let mut seen = HashSet::new();
    ours.changed_columns()
        .filter(|c| seen.insert(c.name.as_str()))
        .filter_map(|c| {
            theirs_changed.get(c.name.as_str()).map(|theirs_change| ConflictingColumn {
                name: c.name.clone(),
                ours_change: c.status,
                theirs_change: *theirs_change,
            })
        })
        .collect()
}

fn summarize(conflicts: &[SchemaConflict], snapshot_conflicted: bool) -> String {
    if conflicts.is_empty() {
        return if snapshot_conflicted {
            "git reports a textual conflict in the snapshot file, but no structural conflicts were found".to_string()
        } else {
            SAFE_TO_MERGE.to_string()
        };
    }

    let count = |severity| conflicts.iter().filter(|c| c.severity == severity).count();
    format!(
        "{} structural conflict{} ({} high, {} medium severity)",
        conflicts.len(),
        if conflicts.len() == 1 { "" } else { "s" },
        count(Severity::High),
        count(Severity::Medium)
    )
}
