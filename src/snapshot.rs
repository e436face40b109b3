//! Schema snapshot model
//!
//! A snapshot is the structural description of a database (schemas, tables,
//! columns) at one point in time. Each project owns exactly one snapshot file;
//! its git history is what schemavc versions.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Current snapshot file format version
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// The versioned container written to `schema.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotFile {
    /// Snapshot format version
    #[serde(default = "default_version")]
    pub version: u32,
    /// Owning project id
    #[serde(default)]
    pub project_id: String,
    /// Database connection the snapshot was introspected from
    #[serde(default)]
    pub connection_id: Option<String>,
    /// Schemas in introspection order
    #[serde(default)]
    pub schemas: Vec<SchemaSnapshot>,
    /// When the introspector last refreshed this snapshot (RFC 3339)
    #[serde(default)]
    pub last_cached_at: Option<String>,
}

/// One schema (namespace) and its tables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSnapshot {
    pub name: String,
    #[serde(default)]
    pub tables: Vec<TableSnapshot>,
}

/// A table or view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSnapshot {
    pub name: String,
    /// e.g. "BASE TABLE" or "VIEW"
    #[serde(default = "default_table_type")]
    pub table_type: String,
    #[serde(default)]
    pub columns: Vec<ColumnSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSnapshot {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub is_primary_key: bool,
    #[serde(default)]
    pub is_foreign_key: bool,
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub is_unique: bool,
}

fn default_version() -> u32 {
    SNAPSHOT_FORMAT_VERSION
}

fn default_table_type() -> String {
    "BASE TABLE".to_string()
}

impl SnapshotFile {
    /// The snapshot a freshly created project starts with
    pub fn empty(project_id: &str, connection_id: Option<String>) -> Self {
        Self {
            version: SNAPSHOT_FORMAT_VERSION,
            project_id: project_id.to_string(),
            connection_id,
            schemas: Vec::new(),
            last_cached_at: None,
        }
    }

    /// Parse snapshot JSON. Malformed content is treated like a missing file.
    pub fn parse(content: &str) -> Option<Self> {
        match serde_json::from_str(content) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring malformed snapshot JSON");
                None
            }
        }
    }

    /// Load from disk. A missing or malformed file yields `None`.
    pub fn load(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        Self::parse(&content)
    }

    /// Canonical on-disk representation
    pub fn to_json(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }

    pub fn find_schema(&self, name: &str) -> Option<&SchemaSnapshot> {
        self.schemas.iter().find(|s| s.name == name)
    }

    pub fn find_table(&self, schema: &str, table: &str) -> Option<&TableSnapshot> {
        self.find_schema(schema)?.tables.iter().find(|t| t.name == table)
    }

    pub fn table_count(&self) -> usize {
        self.schemas.iter().map(|s| s.tables.len()).sum()
    }

    pub fn column_count(&self) -> usize {
        self.schemas
            .iter()
            .flat_map(|s| &s.tables)
            .map(|t| t.columns.len())
            .sum()
    }
}

impl TableSnapshot {
    pub fn find_column(&self, name: &str) -> Option<&ColumnSnapshot> {
        self.columns.iter().find(|c| c.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "version": 1,
        "projectId": "p1",
        "connectionId": "c1",
        "schemas": [
            {
                "name": "public",
                "tables": [
                    {
                        "name": "users",
                        "tableType": "BASE TABLE",
                        "columns": [
                            {"name": "id", "type": "integer", "isPrimaryKey": true},
                            {"name": "email", "type": "text", "nullable": true, "isUnique": true}
                        ]
                    },
                    {"name": "active_users", "tableType": "VIEW", "columns": []}
                ]
            }
        ],
        "lastCachedAt": "2026-01-01T00:00:00Z"
    }"#;

    #[test]
    fn test_parse_sample() {
        let snapshot = SnapshotFile::parse(SAMPLE).unwrap();
        assert_eq!(snapshot.project_id, "p1");
        assert_eq!(snapshot.table_count(), 2);
        assert_eq!(snapshot.column_count(), 2);

        let users = snapshot.find_table("public", "users").unwrap();
        let id = users.find_column("id").unwrap();
        assert!(id.is_primary_key);
        assert!(!id.nullable);
        assert_eq!(id.default_value, None);
        assert!(users.find_column("email").unwrap().is_unique);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let snapshot = SnapshotFile::parse(
            r#"{"schemas":[{"name":"s","tables":[{"name":"t"}]}]}"#,
        )
        .unwrap();
        assert_eq!(snapshot.version, SNAPSHOT_FORMAT_VERSION);
        assert_eq!(snapshot.find_table("s", "t").unwrap().table_type, "BASE TABLE");
    }

    #[test]
    fn test_malformed_is_none() {
        assert!(SnapshotFile::parse("{not json").is_none());
        assert!(SnapshotFile::parse(r#"{"schemas": 7}"#).is_none());
    }

    #[test]
    fn test_json_uses_wire_names() {
        let json = SnapshotFile::parse(SAMPLE).unwrap().to_json().unwrap();
        assert!(json.contains("\"projectId\""));
        assert!(json.contains("\"isPrimaryKey\""));
        assert!(json.contains("\"type\": \"integer\""));
        assert!(json.ends_with('\n'));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SnapshotFile::load(&dir.path().join("schema.json")).is_none());
    }
}
