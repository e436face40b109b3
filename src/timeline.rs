//! Snapshot timeline
//!
//! Rebuilds the migration history of a project from the git log of its
//! snapshot file, attaches reserved-namespace tags, and creates new snapshot
//! commits. Reads never fail: a project outside a repository simply has no
//! history.

use crate::config::Versioning;
use crate::diff::{diff, DiffSummary};
use crate::error::{Error, Result};
use crate::snapshot::SnapshotFile;
use crate::store::{validate_project_id, SnapshotStore};
use crate::vcs::{repo_relative, VersionControl};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Message used when a snapshot commit has no notable structural change
const GENERIC_MESSAGE: &str = "update schema snapshot";

/// Characters git accepts in the tag names we create
const TAG_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9._/-]*$";

/// One commit that touched the snapshot file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    pub short_hash: String,
    pub hash: String,
    pub author: String,
    pub date: String,
    pub subject: String,
    pub tags: Vec<String>,
    pub is_auto_commit: bool,
    /// Diff against the first parent, only filled on request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<DiffSummary>,
}

/// A reserved tag that could not be resolved to a commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagFailure {
    pub tag: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeline {
    /// Newest first
    pub entries: Vec<TimelineEntry>,
    /// Tags skipped while attaching, reported instead of aborting
    pub unresolved_tags: Vec<TagFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotTag {
    pub name: String,
    pub commit: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotTags {
    pub tags: Vec<SnapshotTag>,
    pub unresolved: Vec<TagFailure>,
}

#[derive(Debug, Clone, Default)]
pub struct AutoCommitOptions {
    pub message: Option<String>,
    pub tag: Option<String>,
}

/// Result of a snapshot commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoCommit {
    pub hash: String,
    pub tag: Option<String>,
    pub message: String,
    /// Set when the commit succeeded but tagging it did not
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_error: Option<String>,
}

/// Where a project's snapshot file sits in its repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedFile {
    pub root: PathBuf,
    /// Repo-relative, forward slashes
    pub rel_path: String,
}

/// Timeline reads and snapshot commits for one store and repository provider
pub struct SnapshotHistory<'a, V: VersionControl, S: SnapshotStore> {
    vcs: &'a V,
    store: &'a S,
    versioning: Versioning,
}

impl<'a, V: VersionControl, S: SnapshotStore> SnapshotHistory<'a, V, S> {
    pub fn new(vcs: &'a V, store: &'a S, versioning: Versioning) -> Self {
        Self {
            vcs,
            store,
            versioning,
        }
    }

    /// Repository root and repo-relative snapshot path, `None` outside git
    pub fn tracked_file(&self, project_id: &str) -> Option<TrackedFile> {
        let dir = self.store.project_dir(project_id);
        if !self.vcs.is_repository(&dir) {
            return None;
        }
        let root = match self.vcs.repo_root(&dir) {
            Ok(root) => root,
            Err(e) => {
                tracing::warn!(project = project_id, error = %e, "could not find repository root");
                return None;
            }
        };
        let rel_path = repo_relative(&root, &self.store.snapshot_path(project_id))?;
        Some(TrackedFile { root, rel_path })
    }

    /// Snapshot content at `reference`, `None` if missing or malformed there
    pub fn snapshot_at(&self, tracked: &TrackedFile, reference: &str) -> Option<SnapshotFile> {
        match self
            .vcs
            .read_file_at_ref(&tracked.root, &tracked.rel_path, reference)
        {
            Ok(Some(content)) => SnapshotFile::parse(&content),
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(reference, error = %e, "snapshot unreadable at ref");
                None
            }
        }
    }

    /// Up to `limit` commits that touched the snapshot file, newest first
    pub fn timeline(&self, project_id: &str, limit: usize) -> Timeline {
        let Some(tracked) = self.tracked_file(project_id) else {
            return Timeline::default();
        };

        let commits = match self
            .vcs
            .file_history(&tracked.root, &tracked.rel_path, limit)
        {
            Ok(commits) => commits,
            Err(e) => {
                tracing::warn!(project = project_id, error = %e, "could not read snapshot history");
                return Timeline::default();
            }
        };

        let SnapshotTags { tags, unresolved } = self.resolve_tags(&tracked);
        let mut by_commit: HashMap<String, Vec<String>> = HashMap::new();
        for tag in tags {
            by_commit.entry(tag.commit).or_default().push(tag.name);
        }

        let entries = commits
            .into_iter()
            .map(|commit| TimelineEntry {
                tags: by_commit.remove(&commit.hash).unwrap_or_default(),
                is_auto_commit: self.versioning.is_auto_commit(&commit.subject),
                short_hash: commit.short_hash,
                hash: commit.hash,
                author: commit.author,
                date: commit.date,
                subject: commit.subject,
                summary: None,
            })
            .collect();

        Timeline {
            entries,
            unresolved_tags: unresolved,
        }
    }

    /// [`Self::timeline`] with every entry's change summary filled in
    pub fn timeline_with_summaries(&self, project_id: &str, limit: usize) -> Timeline {
        let mut timeline = self.timeline(project_id, limit);
        if let Some(tracked) = self.tracked_file(project_id) {
            for entry in &mut timeline.entries {
                entry.summary = Some(self.summary_at(&tracked, &entry.hash));
            }
        }
        timeline
    }

    /// Change summary of one commit against its first parent.
    /// `None` outside git or when the commit does not exist.
    pub fn commit_summary(&self, project_id: &str, commit: &str) -> Option<DiffSummary> {
        let tracked = self.tracked_file(project_id)?;
        match self.vcs.resolve_ref(&tracked.root, commit) {
            Ok(Some(_)) => Some(self.summary_at(&tracked, commit)),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(commit, error = %e, "could not resolve commit");
                None
            }
        }
    }

    fn summary_at(&self, tracked: &TrackedFile, commit: &str) -> DiffSummary {
        // A root commit has no parent; a missing file reads as absent
        let after = self.snapshot_at(tracked, commit);
        let before = self.snapshot_at(tracked, &format!("{}~1", commit));
        diff(before.as_ref(), after.as_ref()).summary
    }

    /// Reserved tags and the commits they point at
    pub fn snapshot_tags(&self, project_id: &str) -> SnapshotTags {
        match self.tracked_file(project_id) {
            Some(tracked) => self.resolve_tags(&tracked),
            None => SnapshotTags::default(),
        }
    }

    fn resolve_tags(&self, tracked: &TrackedFile) -> SnapshotTags {
        let pattern = self.versioning.tag_pattern();
        let names = match self.vcs.list_tags(&tracked.root, &pattern) {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!(error = %e, "could not list tags");
                return SnapshotTags {
                    tags: Vec::new(),
                    unresolved: vec![TagFailure {
                        tag: pattern,
                        reason: e.to_string(),
                    }],
                };
            }
        };

        let mut result = SnapshotTags::default();
        for name in names {
            match self.vcs.resolve_ref(&tracked.root, &name) {
                Ok(Some(commit)) => result.tags.push(SnapshotTag { name, commit }),
                Ok(None) => {
                    tracing::warn!(tag = %name, "tag does not point at a commit");
                    result.unresolved.push(TagFailure {
                        tag: name,
                        reason: "does not point at a commit".to_string(),
                    });
                }
                Err(e) => {
                    tracing::warn!(tag = %name, error = %e, "could not resolve tag");
                    result.unresolved.push(TagFailure {
                        tag: name,
                        reason: e.to_string(),
                    });
                }
            }
        }
        result
    }

    /// Commit the snapshot file alone, optionally tagging the new commit.
    ///
    /// Without a message, one is built from the diff against `HEAD`. A tag
    /// failure after the commit is reported in [`AutoCommit::tag_error`]; the
    /// commit stays.
    pub fn auto_commit(&self, project_id: &str, options: AutoCommitOptions) -> Result<AutoCommit> {
        validate_project_id(project_id)?;
        let tag = match options.tag.as_deref().map(str::trim) {
            Some(name) => {
                let tag = self.versioning.namespaced_tag(name);
                validate_tag(&tag)?;
                Some(tag)
            }
            None => None,
        };

        let dir = self.store.project_dir(project_id);
        let tracked = self.tracked_file(project_id).ok_or(Error::NotARepository { path: dir })?;

        let Some(working) = self.store.get_snapshot_file(project_id) else {
            let path = self.store.snapshot_path(project_id);
            // A file that exists but did not load is corrupt, not missing
            return Err(if path.is_file() {
                Error::MalformedSnapshot { path }
            } else {
                Error::ProjectNotFound {
                    project_id: project_id.to_string(),
                }
            });
        };
        let head = self.snapshot_at(&tracked, "HEAD");
        if head.as_ref() == Some(&working) {
            return Err(Error::NothingToCommit {
                path: self.store.snapshot_path(project_id),
            });
        }

        let message = match options.message.as_deref().map(str::trim) {
            Some(message) if !message.is_empty() => self.versioning.auto_commit_subject(message),
            _ => {
                let described = diff(head.as_ref(), Some(&working)).summary.describe();
                if described.is_empty() {
                    self.versioning.auto_commit_subject(GENERIC_MESSAGE)
                } else {
                    self.versioning.auto_commit_subject(&described)
                }
            }
        };

        let hash = self
            .vcs
            .stage_and_commit(&tracked.root, &[tracked.rel_path.as_str()], &message)?;
        tracing::info!(project = project_id, commit = %hash, message = %message, "snapshot committed");

        let mut result = AutoCommit {
            hash,
            tag: None,
            message,
            tag_error: None,
        };

        if let Some(tag) = tag {
            match self
                .vcs
                .create_annotated_tag(&tracked.root, &tag, &result.message, &result.hash)
            {
                Ok(()) => {
                    tracing::info!(project = project_id, tag = %tag, "snapshot tagged");
                    result.tag = Some(tag);
                }
                Err(e) => {
                    tracing::warn!(project = project_id, tag = %tag, error = %e, "commit kept, tag failed");
                    result.tag_error = Some(e.to_string());
                }
            }
        }

        Ok(result)
    }
}

/// Reject tag names git would refuse, before anything is committed
fn validate_tag(name: &str) -> Result<()> {
    let invalid = |reason: &str| {
        Err(Error::InvalidTag {
            name: name.to_string(),
            reason: reason.to_string(),
        })
    };

    let matches = Regex::new(TAG_PATTERN)
        .map(|re| re.is_match(name))
        .unwrap_or(false);
    if !matches {
        return invalid("only letters, digits, '.', '_', '-' and '/' are allowed");
    }
    if name.contains("..") || name.contains("//") {
        return invalid("must not contain '..' or '//'");
    }
    if name.ends_with('/') || name.ends_with('.') || name.ends_with(".lock") {
        return invalid("must not end with '/', '.' or '.lock'");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::tests::{column, snapshot, table};
    use crate::store::{FsStore, ProjectMetadata};
    use crate::vcs::tests::FakeVcs;
    use pretty_assertions::assert_eq;

    const REL: &str = "projects/p1/schema.json";

    struct Fixture {
        _dir: tempfile::TempDir,
        vcs: FakeVcs,
        store: FsStore,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().canonicalize().unwrap();
            let store = FsStore::new(root.join("projects"), root.join("local"));
            store.create_project(&ProjectMetadata::new("p1")).unwrap();
            Self {
                _dir: dir,
                vcs: FakeVcs::new(root),
                store,
            }
        }

        fn history(&self) -> SnapshotHistory<'_, FakeVcs, FsStore> {
            SnapshotHistory::new(&self.vcs, &self.store, Versioning::default())
        }

        fn write_snapshot(&self, tables: Vec<crate::snapshot::TableSnapshot>) {
            let mut file = snapshot(vec![("public", tables)]);
            file.project_id = "p1".to_string();
            self.store.save_snapshot_file(&file).unwrap();
        }

        fn json(tables: Vec<crate::snapshot::TableSnapshot>) -> String {
            let mut file = snapshot(vec![("public", tables)]);
            file.project_id = "p1".to_string();
            file.to_json().unwrap()
        }
    }

    fn users() -> crate::snapshot::TableSnapshot {
        table("users", vec![column("id", "int")])
    }

    #[test]
    fn test_timeline_outside_repository_is_empty() {
        let fx = Fixture::new();
        fx.vcs.set_repository(false);
        let timeline = fx.history().timeline("p1", 10);
        assert_eq!(timeline, Timeline::default());
        assert_eq!(fx.history().commit_summary("p1", "HEAD"), None);
    }

    #[test]
    fn test_timeline_tags_and_auto_commits() {
        let fx = Fixture::new();
        let first = fx.vcs.commit_on("main", "initial import", &[(REL, Some(Fixture::json(vec![]).as_str()))]);
        fx.vcs.commit_on("main", "docs: readme", &[("README.md", Some("hi"))]);
        let auto = fx.vcs.commit_on(
            "main",
            "schema-snapshot: +1 table",
            &[(REL, Some(Fixture::json(vec![users()]).as_str()))],
        );
        fx.vcs.add_tag("schema/v1", Some(auto.as_str()));
        fx.vcs.add_tag("schema/broken", None);
        fx.vcs.add_tag("release-1", Some(first.as_str()));

        let timeline = fx.history().timeline("p1", 10);
        let hashes: Vec<&str> = timeline.entries.iter().map(|e| e.hash.as_str()).collect();
        assert_eq!(hashes, vec![auto.as_str(), first.as_str()]);

        let newest = &timeline.entries[0];
        assert!(newest.is_auto_commit);
        assert_eq!(newest.tags, vec!["schema/v1".to_string()]);
        assert_eq!(newest.summary, None);

        let oldest = &timeline.entries[1];
        assert!(!oldest.is_auto_commit);
        assert!(oldest.tags.is_empty());

        assert_eq!(timeline.unresolved_tags.len(), 1);
        assert_eq!(timeline.unresolved_tags[0].tag, "schema/broken");
    }

    #[test]
    fn test_timeline_respects_limit() {
        let fx = Fixture::new();
        for i in 0..5 {
            let tables = (0..=i).map(|n| table(&format!("t{}", n), vec![])).collect();
            fx.vcs.commit_on("main", &format!("c{}", i), &[(REL, Some(Fixture::json(tables).as_str()))]);
        }
        let timeline = fx.history().timeline("p1", 3);
        let subjects: Vec<&str> = timeline.entries.iter().map(|e| e.subject.as_str()).collect();
        assert_eq!(subjects, vec!["c4", "c3", "c2"]);
    }

    #[test]
    fn test_commit_summary_root_and_child() {
        let fx = Fixture::new();
        let root = fx.vcs.commit_on("main", "root", &[(REL, Some(Fixture::json(vec![users()]).as_str()))]);
        let mut changed = users();
        changed.columns.push(column("email", "text"));
        let child = fx.vcs.commit_on("main", "child", &[(REL, Some(Fixture::json(vec![changed]).as_str()))]);

        let root_summary = fx.history().commit_summary("p1", &root).unwrap();
        assert_eq!(root_summary.tables_added, 1);
        assert_eq!(root_summary.columns_added, 1);

        let child_summary = fx.history().commit_summary("p1", &child).unwrap();
        assert_eq!(child_summary.tables_modified, 1);
        assert_eq!(child_summary.columns_added, 1);
        assert_eq!(child_summary.tables_added, 0);

        assert_eq!(fx.history().commit_summary("p1", "deadbeef"), None);
    }

    #[test]
    fn test_malformed_history_reads_as_absent() {
        let fx = Fixture::new();
        fx.vcs.commit_on("main", "broken", &[(REL, Some("{ not json"))]);
        let fixed = fx.vcs.commit_on("main", "fixed", &[(REL, Some(Fixture::json(vec![users()]).as_str()))]);
        let summary = fx.history().commit_summary("p1", &fixed).unwrap();
        assert_eq!(summary.tables_added, 1);
    }

    #[test]
    fn test_timeline_with_summaries() {
        let fx = Fixture::new();
        fx.vcs.commit_on("main", "root", &[(REL, Some(Fixture::json(vec![users()]).as_str()))]);
        let timeline = fx.history().timeline_with_summaries("p1", 10);
        assert_eq!(timeline.entries[0].summary.as_ref().unwrap().tables_added, 1);
    }

    #[test]
    fn test_auto_commit_synthesizes_message_and_tags() {
        let fx = Fixture::new();
        fx.vcs.commit_on("main", "root", &[(REL, Some(Fixture::json(vec![users()]).as_str()))]);
        fx.write_snapshot(vec![
            users(),
            table("posts", vec![]),
            table("tags", vec![]),
        ]);

        let result = fx
            .history()
            .auto_commit(
                "p1",
                AutoCommitOptions {
                    message: None,
                    tag: Some("v2".to_string()),
                },
            )
            .unwrap();

        assert_eq!(result.message, "schema-snapshot: +2 tables");
        assert_eq!(result.tag.as_deref(), Some("schema/v2"));
        assert_eq!(result.tag_error, None);
        assert_eq!(fx.vcs.head().as_deref(), Some(result.hash.as_str()));
        assert_eq!(fx.vcs.tag_message("schema/v2"), Some(result.message.clone()));

        let timeline = fx.history().timeline("p1", 10);
        assert!(timeline.entries[0].is_auto_commit);
        assert_eq!(timeline.entries[0].tags, vec!["schema/v2".to_string()]);
    }

    #[test]
    fn test_auto_commit_custom_message_gets_prefix() {
        let fx = Fixture::new();
        fx.write_snapshot(vec![users()]);
        let result = fx
            .history()
            .auto_commit(
                "p1",
                AutoCommitOptions {
                    message: Some("add users".to_string()),
                    tag: None,
                },
            )
            .unwrap();
        assert_eq!(result.message, "schema-snapshot: add users");
        assert_eq!(result.tag, None);
    }

    #[test]
    fn test_auto_commit_generic_message() {
        let fx = Fixture::new();
        // Only metadata differs, no structural change
        let mut file = snapshot(vec![]);
        file.project_id = "p1".to_string();
        fx.vcs.commit_on("main", "root", &[(REL, Some(file.to_json().unwrap().as_str()))]);
        file.last_cached_at = Some("2026-02-01T00:00:00Z".to_string());
        fx.store.save_snapshot_file(&file).unwrap();

        let result = fx.history().auto_commit("p1", AutoCommitOptions::default()).unwrap();
        assert_eq!(result.message, "schema-snapshot: update schema snapshot");
    }

    #[test]
    fn test_auto_commit_nothing_to_commit() {
        let fx = Fixture::new();
        fx.write_snapshot(vec![users()]);
        fx.vcs.commit_on("main", "root", &[(REL, Some(Fixture::json(vec![users()]).as_str()))]);
        let err = fx.history().auto_commit("p1", AutoCommitOptions::default()).unwrap_err();
        assert!(matches!(err, Error::NothingToCommit { .. }));
    }

    #[test]
    fn test_auto_commit_outside_repository_fails() {
        let fx = Fixture::new();
        fx.vcs.set_repository(false);
        let err = fx.history().auto_commit("p1", AutoCommitOptions::default()).unwrap_err();
        assert!(matches!(err, Error::NotARepository { .. }));
    }

    #[test]
    fn test_auto_commit_corrupt_working_snapshot() {
        let fx = Fixture::new();
        std::fs::write(fx.store.snapshot_path("p1"), "{ not json").unwrap();
        let err = fx.history().auto_commit("p1", AutoCommitOptions::default()).unwrap_err();
        assert!(matches!(err, Error::MalformedSnapshot { .. }), "got {:?}", err);
        assert_eq!(fx.vcs.head(), None);

        std::fs::remove_file(fx.store.snapshot_path("p1")).unwrap();
        let err = fx.history().auto_commit("p1", AutoCommitOptions::default()).unwrap_err();
        assert!(matches!(err, Error::ProjectNotFound { .. }), "got {:?}", err);
    }

    #[test]
    fn test_auto_commit_rejects_escaping_project_id() {
        let fx = Fixture::new();
        let err = fx
            .history()
            .auto_commit("../p1", AutoCommitOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidProjectId { .. }), "got {:?}", err);
        assert_eq!(fx.vcs.head(), None);
    }

    #[test]
    fn test_invalid_tag_fails_before_commit() {
        let fx = Fixture::new();
        fx.write_snapshot(vec![users()]);
        let err = fx
            .history()
            .auto_commit(
                "p1",
                AutoCommitOptions {
                    message: None,
                    tag: Some("bad tag".to_string()),
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTag { .. }));
        assert_eq!(fx.vcs.head(), None);
    }

    #[test]
    fn test_tag_failure_keeps_commit() {
        let fx = Fixture::new();
        fx.write_snapshot(vec![users()]);
        fx.vcs.fail_tags.set(true);
        let result = fx
            .history()
            .auto_commit(
                "p1",
                AutoCommitOptions {
                    message: None,
                    tag: Some("v1".to_string()),
                },
            )
            .unwrap();
        assert_eq!(result.tag, None);
        assert!(result.tag_error.is_some());
        assert_eq!(fx.vcs.head().as_deref(), Some(result.hash.as_str()));
    }

    #[test]
    fn test_validate_tag() {
        assert!(validate_tag("schema/v1.2").is_ok());
        assert!(validate_tag("schema/release_2026-01").is_ok());
        for bad in ["", "schema/a b", "schema/..x", "schema//x", "schema/", "schema/x.lock", "-x"] {
            assert!(validate_tag(bad).is_err(), "{} should be rejected", bad);
        }
    }
}
