//! schemavc - version control for database schema snapshots
//!
//! Treats a git repository as the history store for JSON schema snapshots.
//!
//! # Overview
//!
//! A project is a directory holding `schema.json` (the snapshot) and
//! `project.json` (metadata plus the branch to environment mapping). The
//! engine never talks to a database; it compares snapshots and reads git.
//!
//! | Service | Purpose |
//! |---------|---------|
//! | [`diff()`] | Structural diff between two snapshots |
//! | [`SnapshotHistory`] | Timeline of snapshot commits, tags, auto-commit |
//! | [`EnvironmentResolver`] | Which environment the current branch represents |
//! | [`ConflictDetector`] | Structural conflicts a merge would introduce |
//!
//! Services borrow a [`VersionControl`] provider and a [`SnapshotStore`],
//! so tests can swap either for an in-memory fake.
//!
//! # Quick Start
//!
//! ```no_run
//! use schemavc::{Config, ConflictDetector, FsStore, Git, SnapshotHistory};
//!
//! let config = Config::load();
//! let home = Config::home_dir();
//! let store = FsStore::new(config.projects_dir(&home), config.local_dir(&home));
//! let git = Git::new();
//!
//! let history = SnapshotHistory::new(&git, &store, config.versioning.clone());
//! for entry in history.timeline("my-project", 10).entries {
//!     println!("{} {}", entry.short_hash, entry.subject);
//! }
//!
//! let report = ConflictDetector::new(&git, &store, config.versioning)
//!     .detect_conflicts("my-project", "main");
//! println!("{}", report.summary);
//! ```

pub mod config;
pub mod conflict;
pub mod diff;
pub mod environment;
pub mod error;
pub mod logging;
pub mod snapshot;
pub mod store;
pub mod timeline;
pub mod vcs;

pub use config::{Config, Versioning};
pub use conflict::{classify, ConflictDetector, ConflictKind, ConflictReport, SchemaConflict, Severity};
pub use diff::{diff, ChangeStatus, ColumnAttribute, ColumnDiff, DiffResult, DiffSummary, SchemaDiff, TableDiff};
pub use environment::{
    ConnectionSource, EnvironmentConfig, EnvironmentMapping, EnvironmentResolver, ResolvedEnvironment,
};
pub use error::{Error, Result};
pub use snapshot::{ColumnSnapshot, SchemaSnapshot, SnapshotFile, TableSnapshot};
pub use store::{FsStore, LocalOverride, ProjectMetadata, SnapshotStore};
pub use timeline::{AutoCommit, AutoCommitOptions, SnapshotHistory, Timeline, TimelineEntry};
pub use vcs::{CommitInfo, Git, RepoStatus, VersionControl};
