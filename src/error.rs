//! Error type shared by every schemavc operation
//!
//! Read paths (timeline, summaries, environment resolution, conflict
//! detection) degrade to neutral results instead of returning most of these.
//! Write paths (auto-commit, tagging, metadata saves) surface them.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{} is not inside a git repository", path.display())]
    NotARepository { path: PathBuf },

    #[error("git {command} failed: {stderr}")]
    Git { command: String, stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Project not found: {project_id}")]
    ProjectNotFound { project_id: String },

    #[error("Invalid project id '{project_id}': {reason}")]
    InvalidProjectId { project_id: String, reason: String },

    #[error("Snapshot file {} is not valid JSON", path.display())]
    MalformedSnapshot { path: PathBuf },

    #[error("Invalid tag name '{name}': {reason}")]
    InvalidTag { name: String, reason: String },

    #[error("Invalid environment mapping: {reason}")]
    InvalidMapping { reason: String },

    #[error("Nothing to commit: {} matches HEAD", path.display())]
    NothingToCommit { path: PathBuf },
}

pub type Result<T> = std::result::Result<T, Error>;
