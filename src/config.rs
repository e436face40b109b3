//! Configuration file support for schemavc
//!
//! Reads from .schemavc/config.toml, found by walking up from the current
//! directory. A missing or unreadable file means defaults.

use crate::environment::FALLBACK_ENVIRONMENT;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory holding the config file, and the default home under `$HOME`
pub const HOME_DIR_NAME: &str = ".schemavc";

const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration structure
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq, Eq)]
pub struct Config {
    /// Reserved prefixes and history limits
    #[serde(default)]
    pub versioning: Versioning,

    /// Environment resolution settings
    #[serde(default)]
    pub environments: EnvironmentSettings,

    /// Where projects and machine-local files live
    #[serde(default)]
    pub store: StoreConfig,
}

/// Reserved namespaces used to recognise schemavc's own commits and tags
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Versioning {
    /// Tags created by snapshot commits live under this prefix
    /// Default: "schema/"
    #[serde(default = "default_tag_prefix")]
    pub tag_prefix: String,

    /// Subject prefix marking a commit as machine-generated
    /// Default: "schema-snapshot:"
    #[serde(default = "default_commit_prefix")]
    pub commit_prefix: String,

    /// Default number of commits returned by the timeline
    #[serde(default = "default_timeline_limit")]
    pub timeline_limit: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct EnvironmentSettings {
    /// Label used when no mapping or project default applies
    #[serde(default = "default_fallback")]
    pub fallback: String,
}

#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Versioned project directories. Default: <home>/projects
    #[serde(default)]
    pub projects_dir: Option<PathBuf>,

    /// Machine-local overrides. Default: <home>/local
    #[serde(default)]
    pub local_dir: Option<PathBuf>,
}

fn default_tag_prefix() -> String {
    "schema/".to_string()
}

fn default_commit_prefix() -> String {
    "schema-snapshot:".to_string()
}

fn default_timeline_limit() -> usize {
    50
}

fn default_fallback() -> String {
    FALLBACK_ENVIRONMENT.to_string()
}

impl Default for Versioning {
    fn default() -> Self {
        Self {
            tag_prefix: default_tag_prefix(),
            commit_prefix: default_commit_prefix(),
            timeline_limit: default_timeline_limit(),
        }
    }
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        Self {
            fallback: default_fallback(),
        }
    }
}

impl Versioning {
    /// Glob matching every reserved tag
    pub fn tag_pattern(&self) -> String {
        format!("{}*", self.tag_prefix)
    }

    /// Put `name` under the tag prefix unless it already is
    pub fn namespaced_tag(&self, name: &str) -> String {
        if name.starts_with(&self.tag_prefix) {
            name.to_string()
        } else {
            format!("{}{}", self.tag_prefix, name)
        }
    }

    pub fn is_auto_commit(&self, subject: &str) -> bool {
        subject.starts_with(&self.commit_prefix)
    }

    /// Prefix `message` with the commit prefix unless it already has it
    pub fn auto_commit_subject(&self, message: &str) -> String {
        let message = message.trim();
        if self.is_auto_commit(message) {
            message.to_string()
        } else {
            format!("{} {}", self.commit_prefix, message)
        }
    }
}

impl Config {
    /// Load config from .schemavc/config.toml
    /// Returns default config if file doesn't exist
    pub fn load() -> Self {
        if let Some(path) = Self::find_config_path() {
            return Self::load_from(&path);
        }
        Self::default()
    }

    /// Load a specific file, falling back to defaults if it is unreadable
    pub fn load_from(path: &Path) -> Self {
        let Ok(contents) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        match toml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring invalid config");
                Self::default()
            }
        }
    }

    /// Find config.toml by walking up from the current directory
    fn find_config_path() -> Option<PathBuf> {
        let current_dir = std::env::current_dir().ok()?;
        Self::find_config_from(&current_dir)
    }

    /// Nearest `.schemavc/config.toml` in `start` or one of its ancestors
    pub fn find_config_from(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(HOME_DIR_NAME).join(CONFIG_FILE_NAME))
            .find(|path| path.is_file())
    }

    /// Home directory: SCHEMAVC_HOME, else ~/.schemavc, else ./.schemavc
    pub fn home_dir() -> PathBuf {
        if let Ok(path) = std::env::var("SCHEMAVC_HOME") {
            return PathBuf::from(path);
        }
        std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(|home| PathBuf::from(home).join(HOME_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from(HOME_DIR_NAME))
    }

    pub fn projects_dir(&self, home: &Path) -> PathBuf {
        self.store
            .projects_dir
            .clone()
            .unwrap_or_else(|| home.join("projects"))
    }

    pub fn local_dir(&self, home: &Path) -> PathBuf {
        self.store
            .local_dir
            .clone()
            .unwrap_or_else(|| home.join("local"))
    }
}
