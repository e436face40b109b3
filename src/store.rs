//! Snapshot store
//!
//! Durable JSON persistence for the per-project snapshot file, the committed
//! project metadata, and the machine-local override.
//!
//! Layout used by [`FsStore`]:
//!
//! ```text
//! <projects_dir>/<project_id>/schema.json    versioned snapshot
//! <projects_dir>/<project_id>/project.json   versioned metadata (environments)
//! <local_dir>/<project_id>.json              machine-local override, never versioned
//! ```

use crate::environment::EnvironmentConfig;
use crate::error::{Error, Result};
use crate::snapshot::SnapshotFile;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const SNAPSHOT_FILE_NAME: &str = "schema.json";
pub const METADATA_FILE_NAME: &str = "project.json";

/// Check that `project_id` names a single directory entry.
///
/// Ids become path components, so anything that could resolve outside the
/// store (absolute paths, separators, `.` and `..`) is rejected.
pub fn validate_project_id(project_id: &str) -> Result<()> {
    let invalid = |reason: &str| {
        Err(Error::InvalidProjectId {
            project_id: project_id.to_string(),
            reason: reason.to_string(),
        })
    };

    if project_id.trim().is_empty() {
        return invalid("must not be empty");
    }
    if project_id == "." || project_id == ".." {
        return invalid("must not be '.' or '..'");
    }
    let separator = |c: char| matches!(c, '/' | '\\' | ':' | '\0');
    if project_id.contains(separator) || Path::new(project_id).is_absolute() {
        return invalid("must not contain path separators");
    }
    Ok(())
}

/// Committed per-project metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMetadata {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    /// Branch to environment mapping shared with the team
    #[serde(default)]
    pub environments: EnvironmentConfig,
}

impl ProjectMetadata {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: None,
            connection_id: None,
            created_at: Some(chrono::Utc::now().to_rfc3339()),
            environments: EnvironmentConfig::default(),
        }
    }
}

/// Machine-local settings that must never be committed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalOverride {
    #[serde(default)]
    pub connection_url: Option<String>,
    /// Free-form label the user keeps for this machine
    #[serde(default)]
    pub environment_note: Option<String>,
}

impl LocalOverride {
    pub fn is_empty(&self) -> bool {
        self.connection_url.is_none() && self.environment_note.is_none()
    }
}

/// Persistence the engine reads snapshots and metadata from
pub trait SnapshotStore {
    /// Directory holding the project's versioned files
    fn project_dir(&self, project_id: &str) -> PathBuf;

    fn snapshot_path(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join(SNAPSHOT_FILE_NAME)
    }

    /// Current snapshot, `None` if missing or malformed
    fn get_snapshot_file(&self, project_id: &str) -> Option<SnapshotFile>;

    /// Write the snapshot. Returns `false` when the bytes on disk already
    /// match, so unchanged snapshots never produce history entries.
    fn save_snapshot_file(&self, snapshot: &SnapshotFile) -> Result<bool>;

    fn get_project_metadata(&self, project_id: &str) -> Option<ProjectMetadata>;

    fn save_project_metadata(&self, metadata: &ProjectMetadata) -> Result<()>;

    fn get_local_override(&self, project_id: &str) -> Option<LocalOverride>;

    fn save_local_override(&self, project_id: &str, local: &LocalOverride) -> Result<()>;

    /// Create the project directory with empty snapshot and fresh metadata.
    /// Existing files are left alone.
    fn create_project(&self, metadata: &ProjectMetadata) -> Result<()> {
        if self.get_project_metadata(&metadata.id).is_none() {
            self.save_project_metadata(metadata)?;
        }
        if self.get_snapshot_file(&metadata.id).is_none() {
            let empty = SnapshotFile::empty(&metadata.id, metadata.connection_id.clone());
            self.save_snapshot_file(&empty)?;
        }
        Ok(())
    }
}

/// [`SnapshotStore`] over plain JSON files
#[derive(Debug, Clone)]
pub struct FsStore {
    projects_dir: PathBuf,
    local_dir: PathBuf,
}

impl FsStore {
    pub fn new(projects_dir: impl Into<PathBuf>, local_dir: impl Into<PathBuf>) -> Self {
        Self {
            projects_dir: projects_dir.into(),
            local_dir: local_dir.into(),
        }
    }

    pub fn projects_dir(&self) -> &Path {
        &self.projects_dir
    }

    /// Path of the machine-local override file
    fn local_path(&self, project_id: &str) -> PathBuf {
        self.local_dir.join(format!("{}.json", project_id))
    }

    /// All project ids with a metadata file, sorted
    pub fn list_projects(&self) -> Result<Vec<String>> {
        if !self.projects_dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.projects_dir)? {
            let entry = entry?;
            if entry.path().join(METADATA_FILE_NAME).is_file() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring malformed JSON");
            None
        }
    }
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    let mut json = serde_json::to_string_pretty(value)?;
    json.push('\n');
    Ok(json)
}

impl SnapshotStore for FsStore {
    fn project_dir(&self, project_id: &str) -> PathBuf {
        self.projects_dir.join(project_id)
    }

    fn get_snapshot_file(&self, project_id: &str) -> Option<SnapshotFile> {
        validate_project_id(project_id).ok()?;
        SnapshotFile::load(&self.snapshot_path(project_id))
    }

    fn save_snapshot_file(&self, snapshot: &SnapshotFile) -> Result<bool> {
        validate_project_id(&snapshot.project_id)?;
        let path = self.snapshot_path(&snapshot.project_id);
        let json = snapshot.to_json()?;
        if std::fs::read(&path).ok().as_deref() == Some(json.as_bytes()) {
            tracing::debug!(project = %snapshot.project_id, "snapshot unchanged, skipping write");
            return Ok(false);
        }
        write_file(&path, &json)?;
        tracing::info!(project = %snapshot.project_id, "snapshot written");
        Ok(true)
    }

    fn get_project_metadata(&self, project_id: &str) -> Option<ProjectMetadata> {
        validate_project_id(project_id).ok()?;
        read_json(&self.project_dir(project_id).join(METADATA_FILE_NAME))
    }

    fn save_project_metadata(&self, metadata: &ProjectMetadata) -> Result<()> {
        validate_project_id(&metadata.id)?;
        let path = self.project_dir(&metadata.id).join(METADATA_FILE_NAME);
        write_file(&path, &to_json(metadata)?)
    }

    fn get_local_override(&self, project_id: &str) -> Option<LocalOverride> {
        validate_project_id(project_id).ok()?;
        read_json(&self.local_path(project_id))
    }

    fn save_local_override(&self, project_id: &str, local: &LocalOverride) -> Result<()> {
        validate_project_id(project_id)?;
        let path = self.local_path(project_id);
        if local.is_empty() {
            return match std::fs::remove_file(&path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(Error::Io(e)),
                _ => Ok(()),
            };
        }
        write_file(&path, &to_json(local)?)
    }
}
