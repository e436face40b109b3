//! Branch to environment resolution
//!
//! The committed mapping says which environment each branch represents and
//! optionally which shared connection it uses. A machine-local override can
//! replace the connection URL without touching the committed file.
//!
//! Connection URL precedence: local override, then the matched mapping, then none.

use crate::error::{Error, Result};
use crate::store::{LocalOverride, ProjectMetadata, SnapshotStore};
use crate::vcs::VersionControl;
use serde::{Deserialize, Serialize};

/// Label used when neither a mapping nor a configured default applies
pub const FALLBACK_ENVIRONMENT: &str = "development";

/// One committed branch mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentMapping {
    pub branch: String,
    pub environment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_production: Option<bool>,
}

/// Committed environment block of the project metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentConfig {
    /// At most one entry per branch
    #[serde(default)]
    pub mappings: Vec<EnvironmentMapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_environment: Option<String>,
}

impl EnvironmentConfig {
    /// Exact branch match, first wins
    pub fn find(&self, branch: &str) -> Option<&EnvironmentMapping> {
        self.mappings.iter().find(|m| m.branch == branch)
    }

    /// Insert or replace the mapping for `mapping.branch`, keeping its position
    pub fn upsert(&mut self, mapping: EnvironmentMapping) {
        match self.mappings.iter_mut().find(|m| m.branch == mapping.branch) {
            Some(existing) => *existing = mapping,
            None => self.mappings.push(mapping),
        }
    }

    /// Remove the mapping for `branch`, returning whether one existed
    pub fn remove(&mut self, branch: &str) -> bool {
        let before = self.mappings.len();
        self.mappings.retain(|m| m.branch != branch);
        self.mappings.len() != before
    }
}

/// Where the resolved connection URL came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionSource {
    LocalOverride,
    Mapping,
    None,
}

impl std::fmt::Display for ConnectionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::LocalOverride => "local override",
            Self::Mapping => "branch mapping",
            Self::None => "none",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedEnvironment {
    /// Current branch, `None` outside a repository or on a detached HEAD
    pub branch: Option<String>,
    pub environment: String,
    pub is_production: bool,
    pub connection_url: Option<String>,
    pub connection_source: ConnectionSource,
    /// Branch of the mapping that matched, if any
    pub matched_branch: Option<String>,
    /// Machine-local environment note, if the user set one
    pub local_note: Option<String>,
}

/// Resolves and edits branch to environment mappings for a project
pub struct EnvironmentResolver<'a, V: VersionControl, S: SnapshotStore> {
    vcs: &'a V,
    store: &'a S,
    fallback: String,
}

impl<'a, V: VersionControl, S: SnapshotStore> EnvironmentResolver<'a, V, S> {
    pub fn new(vcs: &'a V, store: &'a S) -> Self {
        Self {
            vcs,
            store,
            fallback: FALLBACK_ENVIRONMENT.to_string(),
        }
    }

    /// Use a different label when nothing else applies
    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }

    /// Committed config, empty when the project has no metadata yet
    pub fn get_config(&self, project_id: &str) -> EnvironmentConfig {
        self.store
            .get_project_metadata(project_id)
            .map(|m| m.environments)
            .unwrap_or_default()
    }

    pub fn save_config(&self, project_id: &str, config: EnvironmentConfig) -> Result<()> {
        for mapping in &config.mappings {
            validate(mapping)?;
        }
        let mut metadata = self.metadata(project_id)?;
        metadata.environments = config;
        self.store.save_project_metadata(&metadata)?;
        tracing::info!(project = project_id, "environment config saved");
        Ok(())
    }

    /// Insert or replace the mapping for its branch
    pub fn set_mapping(&self, project_id: &str, mapping: EnvironmentMapping) -> Result<EnvironmentConfig> {
        validate(&mapping)?;
        let mut metadata = self.metadata(project_id)?;
        tracing::info!(
            project = project_id,
            branch = %mapping.branch,
            environment = %mapping.environment,
            "environment mapping set"
        );
        metadata.environments.upsert(mapping);
        self.store.save_project_metadata(&metadata)?;
        Ok(metadata.environments)
    }

    /// Remove the mapping for `branch`. Returns the updated config and
    /// whether anything was removed; nothing is written if it was not.
    pub fn remove_mapping(&self, project_id: &str, branch: &str) -> Result<(EnvironmentConfig, bool)> {
        let mut metadata = self.metadata(project_id)?;
        let removed = metadata.environments.remove(branch);
        if removed {
            self.store.save_project_metadata(&metadata)?;
            tracing::info!(project = project_id, branch, "environment mapping removed");
        }
        Ok((metadata.environments, removed))
    }

    /// Set or clear the default environment label
    pub fn set_default(&self, project_id: &str, label: Option<String>) -> Result<EnvironmentConfig> {
        if let Some(label) = &label {
            if label.trim().is_empty() {
                return Err(Error::InvalidMapping {
                    reason: "default environment label is empty".to_string(),
                });
            }
        }
        let mut metadata = self.metadata(project_id)?;
        metadata.environments.default_environment = label;
        self.store.save_project_metadata(&metadata)?;
        Ok(metadata.environments)
    }

    pub fn set_local_override(&self, project_id: &str, local: &LocalOverride) -> Result<()> {
        self.store.save_local_override(project_id, local)
    }

    pub fn clear_local_override(&self, project_id: &str) -> Result<()> {
        self.store
            .save_local_override(project_id, &LocalOverride::default())
    }

    /// Resolve the environment the working copy currently represents
    pub fn resolve(&self, project_id: &str) -> ResolvedEnvironment {
        let branch = self.current_branch(project_id);
        let config = self.get_config(project_id);
        let local = self.store.get_local_override(project_id).unwrap_or_default();

        let matched = branch.as_deref().and_then(|b| config.find(b));

        let environment = match matched {
            Some(mapping) => mapping.environment.clone(),
            None => config
                .default_environment
                .clone()
                .unwrap_or_else(|| self.fallback.clone()),
        };

        let (connection_url, connection_source) = match (&local.connection_url, matched) {
            (Some(url), _) => (Some(url.clone()), ConnectionSource::LocalOverride),
            (None, Some(mapping)) if mapping.connection_url.is_some() => {
                (mapping.connection_url.clone(), ConnectionSource::Mapping)
            }
            _ => (None, ConnectionSource::None),
        };

        ResolvedEnvironment {
            branch,
            environment,
            is_production: matched.and_then(|m| m.is_production).unwrap_or(false),
            connection_url,
            connection_source,
            matched_branch: matched.map(|m| m.branch.clone()),
            local_note: local.environment_note,
        }
    }

    fn current_branch(&self, project_id: &str) -> Option<String> {
        let dir = self.store.project_dir(project_id);
        if !self.vcs.is_repository(&dir) {
            return None;
        }
        match self.vcs.status(&dir) {
            Ok(status) => status.branch,
            Err(e) => {
                tracing::warn!(project = project_id, error = %e, "could not read branch");
                None
            }
        }
    }

    fn metadata(&self, project_id: &str) -> Result<ProjectMetadata> {
        self.store
            .get_project_metadata(project_id)
            .ok_or_else(|| Error::ProjectNotFound {
                project_id: project_id.to_string(),
            })
    }
}

fn validate(mapping: &EnvironmentMapping) -> Result<()> {
    if mapping.branch.trim().is_empty() {
        return Err(Error::InvalidMapping {
            reason: "branch name is empty".to_string(),
        });
    }
    if mapping.environment.trim().is_empty() {
        return Err(Error::InvalidMapping {
            reason: format!("environment label for branch '{}' is empty", mapping.branch),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::MemoryStore;
    use crate::vcs::tests::FakeVcs;
    use pretty_assertions::assert_eq;

    fn mapping(branch: &str, environment: &str, url: Option<&str>) -> EnvironmentMapping {
        EnvironmentMapping {
            branch: branch.to_string(),
            environment: environment.to_string(),
            connection_url: url.map(str::to_string),
            is_production: None,
        }
    }

    fn setup(branch: Option<&str>) -> (FakeVcs, MemoryStore) {
        let store = MemoryStore::at(std::path::Path::new("/repo/projects"));
        store.save_project_metadata(&ProjectMetadata::new("p1")).unwrap();
        let vcs = FakeVcs::new("/repo");
        vcs.set_branch(branch);
        (vcs, store)
    }

    #[test]
    fn test_connection_precedence() {
        let (vcs, store) = setup(Some("main"));
        let resolver = EnvironmentResolver::new(&vcs, &store);
        resolver
            .set_mapping("p1", mapping("main", "production", Some("postgres://shared/prod")))
            .unwrap();
        resolver
            .set_local_override(
                "p1",
                &LocalOverride {
                    connection_url: Some("postgres://localhost/mine".to_string()),
                    environment_note: Some("laptop".to_string()),
                },
            )
            .unwrap();

        let resolved = resolver.resolve("p1");
        assert_eq!(resolved.connection_url.as_deref(), Some("postgres://localhost/mine"));
        assert_eq!(resolved.connection_source, ConnectionSource::LocalOverride);
        assert_eq!(resolved.environment, "production");
        assert_eq!(resolved.local_note.as_deref(), Some("laptop"));

        resolver.clear_local_override("p1").unwrap();
        let resolved = resolver.resolve("p1");
        assert_eq!(resolved.connection_url.as_deref(), Some("postgres://shared/prod"));
        assert_eq!(resolved.connection_source, ConnectionSource::Mapping);

        let (_, removed) = resolver.remove_mapping("p1", "main").unwrap();
        assert!(removed);
        let resolved = resolver.resolve("p1");
        assert_eq!(resolved.connection_url, None);
        assert_eq!(resolved.connection_source, ConnectionSource::None);
        assert_eq!(resolved.matched_branch, None);
    }

    #[test]
    fn test_default_and_fallback_labels() {
        let (vcs, store) = setup(Some("feature/x"));
        let resolver = EnvironmentResolver::new(&vcs, &store);
        assert_eq!(resolver.resolve("p1").environment, FALLBACK_ENVIRONMENT);

        resolver.set_default("p1", Some("staging".to_string())).unwrap();
        let resolved = resolver.resolve("p1");
        assert_eq!(resolved.environment, "staging");
        assert!(!resolved.is_production);

        let custom = EnvironmentResolver::new(&vcs, &store).with_fallback("local");
        resolver.set_default("p1", None).unwrap();
        assert_eq!(custom.resolve("p1").environment, "local");
    }

    #[test]
    fn test_production_only_when_marked() {
        let (vcs, store) = setup(Some("main"));
        let resolver = EnvironmentResolver::new(&vcs, &store);
        let mut prod = mapping("main", "production", None);
        prod.is_production = Some(true);
        resolver.set_mapping("p1", prod).unwrap();
        assert!(resolver.resolve("p1").is_production);

        resolver.set_mapping("p1", mapping("main", "production", None)).unwrap();
        assert!(!resolver.resolve("p1").is_production);
    }

    #[test]
    fn test_matching_is_exact() {
        let (vcs, store) = setup(Some("Main"));
        let resolver = EnvironmentResolver::new(&vcs, &store);
        resolver.set_mapping("p1", mapping("main", "production", None)).unwrap();
        let resolved = resolver.resolve("p1");
        assert_eq!(resolved.environment, FALLBACK_ENVIRONMENT);
        assert_eq!(resolved.branch.as_deref(), Some("Main"));
    }

    #[test]
    fn test_detached_head_and_non_repository() {
        let (vcs, store) = setup(None);
        let resolver = EnvironmentResolver::new(&vcs, &store);
        resolver.set_mapping("p1", mapping("main", "production", None)).unwrap();
        let resolved = resolver.resolve("p1");
        assert_eq!(resolved.branch, None);
        assert_eq!(resolved.environment, FALLBACK_ENVIRONMENT);

        vcs.set_repository(false);
        assert_eq!(resolver.resolve("p1").branch, None);
    }

    #[test]
    fn test_set_mapping_upserts_in_place() {
        let (vcs, store) = setup(Some("main"));
        let resolver = EnvironmentResolver::new(&vcs, &store);
        resolver.set_mapping("p1", mapping("main", "production", None)).unwrap();
        resolver.set_mapping("p1", mapping("develop", "staging", None)).unwrap();
        let config = resolver
            .set_mapping("p1", mapping("main", "prod-eu", None))
            .unwrap();

        let branches: Vec<(&str, &str)> = config
            .mappings
            .iter()
            .map(|m| (m.branch.as_str(), m.environment.as_str()))
            .collect();
        assert_eq!(branches, vec![("main", "prod-eu"), ("develop", "staging")]);
        assert_eq!(resolver.get_config("p1"), config);
    }

    #[test]
    fn test_remove_missing_mapping() {
        let (vcs, store) = setup(Some("main"));
        let resolver = EnvironmentResolver::new(&vcs, &store);
        let (config, removed) = resolver.remove_mapping("p1", "nope").unwrap();
        assert!(!removed);
        assert!(config.mappings.is_empty());
    }

    #[test]
    fn test_invalid_mapping_rejected() {
        let (vcs, store) = setup(Some("main"));
        let resolver = EnvironmentResolver::new(&vcs, &store);
        assert!(matches!(
            resolver.set_mapping("p1", mapping(" ", "prod", None)),
            Err(Error::InvalidMapping { .. })
        ));
        assert!(matches!(
            resolver.save_config(
                "p1",
                EnvironmentConfig {
                    mappings: vec![mapping("main", "", None)],
                    default_environment: None,
                }
            ),
            Err(Error::InvalidMapping { .. })
        ));
    }

    #[test]
    fn test_writes_need_project_metadata() {
        let (vcs, store) = setup(Some("main"));
        let resolver = EnvironmentResolver::new(&vcs, &store);
        assert!(matches!(
            resolver.set_mapping("missing", mapping("main", "production", None)),
            Err(Error::ProjectNotFound { .. })
        ));
        assert_eq!(resolver.get_config("missing"), EnvironmentConfig::default());
    }

    #[test]
    fn test_config_json_shape() {
        let mut config = EnvironmentConfig::default();
        config.upsert(mapping("main", "production", Some("postgres://x")));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["mappings"][0]["connectionUrl"], "postgres://x");
        assert!(json["mappings"][0].get("isProduction").is_none());
    }
}
