//! Structural diff between two schema snapshots
//!
//! Tables are keyed by (schema, table) and columns by (schema, table, column).
//! Position never matters, so reordering never shows up as a change. Output
//! follows the order of `after`, then anything only in `before` in its order.

use crate::snapshot::{ColumnSnapshot, SchemaSnapshot, SnapshotFile, TableSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Status of a table or column between two snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Added,
    Removed,
    Modified,
    Unchanged,
}

impl ChangeStatus {
    pub fn is_change(self) -> bool {
        self != ChangeStatus::Unchanged
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChangeStatus::Added => "added",
            ChangeStatus::Removed => "removed",
            ChangeStatus::Modified => "modified",
            ChangeStatus::Unchanged => "unchanged",
        }
    }
}

impl std::fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Column attribute that can differ between two versions of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColumnAttribute {
    Type,
    Nullable,
    PrimaryKey,
    ForeignKey,
    DefaultValue,
    Unique,
}

impl ColumnAttribute {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Type => "type",
            Self::Nullable => "nullable",
            Self::PrimaryKey => "primary key",
            Self::ForeignKey => "foreign key",
            Self::DefaultValue => "default",
            Self::Unique => "unique",
        }
    }
}

/// Full diff between two snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffResult {
    pub schemas: Vec<SchemaDiff>,
    pub summary: DiffSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDiff {
    pub name: String,
    pub tables: Vec<TableDiff>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDiff {
    pub name: String,
    pub table_type: String,
    pub status: ChangeStatus,
    pub columns: Vec<ColumnDiff>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDiff {
    pub name: String,
    pub status: ChangeStatus,
    /// Attributes that differ, only populated for modified columns
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed_attributes: Vec<ColumnAttribute>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<ColumnSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<ColumnSnapshot>,
}

/// Aggregate counts over a [`DiffResult`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummary {
    pub tables_added: usize,
    pub tables_removed: usize,
    pub tables_modified: usize,
    pub columns_added: usize,
    pub columns_removed: usize,
    pub columns_modified: usize,
    pub has_changes: bool,
}

impl DiffSummary {
    /// Short human phrasing, e.g. "+2 tables, ~1 table, -3 columns".
    /// Empty when nothing changed.
    pub fn describe(&self) -> String {
        let parts = [
            ('+', self.tables_added, "table"),
            ('-', self.tables_removed, "table"),
            ('~', self.tables_modified, "table"),
            ('+', self.columns_added, "column"),
            ('-', self.columns_removed, "column"),
            ('~', self.columns_modified, "column"),
        ];

        parts
            .iter()
            .filter(|(_, count, _)| *count > 0)
            .map(|(sign, count, noun)| {
                let plural = if *count == 1 { "" } else { "s" };
                format!("{}{} {}{}", sign, count, noun, plural)
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn tally(&mut self, table: &TableDiff) {
        match table.status {
            ChangeStatus::Added => self.tables_added += 1,
            ChangeStatus::Removed => self.tables_removed += 1,
            ChangeStatus::Modified => self.tables_modified += 1,
            ChangeStatus::Unchanged => {}
        }
        for column in &table.columns {
            match column.status {
                ChangeStatus::Added => self.columns_added += 1,
                ChangeStatus::Removed => self.columns_removed += 1,
                ChangeStatus::Modified => self.columns_modified += 1,
                ChangeStatus::Unchanged => {}
            }
        }
    }
}

impl DiffResult {
    /// Every table with its status, as (schema, table, status)
    pub fn table_statuses(&self) -> impl Iterator<Item = (&str, &str, ChangeStatus)> {
        self.schemas.iter().flat_map(|schema| {
            schema
                .tables
                .iter()
                .map(move |table| (schema.name.as_str(), table.name.as_str(), table.status))
        })
    }

    pub fn find_table(&self, schema: &str, table: &str) -> Option<&TableDiff> {
        self.schemas
            .iter()
            .find(|s| s.name == schema)?
            .tables
            .iter()
            .find(|t| t.name == table)
    }
}

impl TableDiff {
    /// Names of columns whose status is anything but unchanged
    pub fn changed_columns(&self) -> impl Iterator<Item = &ColumnDiff> {
        self.columns.iter().filter(|c| c.status.is_change())
    }
}

/// Compute the structural diff from `before` to `after`.
///
/// An absent side is a snapshot with no schemas. Never fails.
pub fn diff(before: Option<&SnapshotFile>, after: Option<&SnapshotFile>) -> DiffResult {
    let before_schemas: &[SchemaSnapshot] = before.map(|s| s.schemas.as_slice()).unwrap_or(&[]);
    let after_schemas: &[SchemaSnapshot] = after.map(|s| s.schemas.as_slice()).unwrap_or(&[]);

    let mut schemas = Vec::new();
    for (name, old, new) in pair_by_name(before_schemas, after_schemas, |s| &s.name) {
        let old_tables = old.map(|s| s.tables.as_slice()).unwrap_or(&[]);
        let new_tables = new.map(|s| s.tables.as_slice()).unwrap_or(&[]);

        let tables = pair_by_name(old_tables, new_tables, |t| &t.name)
            .into_iter()
            .map(|(_, old_table, new_table)| diff_table(old_table, new_table))
            .collect();

        schemas.push(SchemaDiff {
            name: name.to_string(),
            tables,
        });
    }

    let mut summary = DiffSummary::default();
    for table in schemas.iter().flat_map(|s| &s.tables) {
        summary.tally(table);
    }
    summary.has_changes = summary != DiffSummary::default();

    DiffResult { schemas, summary }
}

/// Pair items of two lists by name: `after` order first, then `before`-only
/// items in `before` order. Duplicate names keep their first occurrence.
fn pair_by_name<'a, T>(
    before: &'a [T],
    after: &'a [T],
    name: impl Fn(&T) -> &String,
) -> Vec<(&'a str, Option<&'a T>, Option<&'a T>)> {
    let mut before_index: HashMap<&str, &T> = HashMap::new();
    for item in before {
        before_index.entry(name(item).as_str()).or_insert(item);
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let mut pairs = Vec::new();

    for item in after {
        let key = name(item).as_str();
        if !seen.insert(key) {
            continue;
        }
        pairs.push((key, before_index.get(key).copied(), Some(item)));
    }
    for item in before {
        let key = name(item).as_str();
        if !seen.insert(key) {
            continue;
        }
        pairs.push((key, Some(item), None));
    }

    pairs
}

fn diff_table(before: Option<&TableSnapshot>, after: Option<&TableSnapshot>) -> TableDiff {
    match (before, after) {
        (None, Some(table)) => TableDiff {
            name: table.name.clone(),
            table_type: table.table_type.clone(),
            status: ChangeStatus::Added,
            columns: unique_columns(&table.columns)
                .map(|c| ColumnDiff {
                    name: c.name.clone(),
                    status: ChangeStatus::Added,
                    changed_attributes: Vec::new(),
                    before: None,
                    after: Some(c.clone()),
                })
                .collect(),
        },
        (Some(table), None) => TableDiff {
            name: table.name.clone(),
            table_type: table.table_type.clone(),
            status: ChangeStatus::Removed,
            columns: unique_columns(&table.columns)
                .map(|c| ColumnDiff {
                    name: c.name.clone(),
                    status: ChangeStatus::Removed,
                    changed_attributes: Vec::new(),
                    before: Some(c.clone()),
                    after: None,
                })
                .collect(),
        },
        (Some(old), Some(new)) => {
            let columns: Vec<ColumnDiff> = pair_by_name(&old.columns, &new.columns, |c| &c.name)
                .into_iter()
                .map(|(name, old_col, new_col)| diff_column(name, old_col, new_col))
                .collect();

            let status = if columns.iter().any(|c| c.status.is_change()) {
                ChangeStatus::Modified
            } else {
                ChangeStatus::Unchanged
            };

            TableDiff {
                name: new.name.clone(),
                table_type: new.table_type.clone(),
                status,
                columns,
            }
        }
        (None, None) => unreachable!("pair_by_name always yields at least one side"),
    }
}

/// Columns with duplicate names collapse to the first occurrence, matching
/// how modified tables are compared.
fn unique_columns(columns: &[ColumnSnapshot]) -> impl Iterator<Item = &ColumnSnapshot> {
    pair_by_name(columns, &[], |c| &c.name)
        .into_iter()
        .filter_map(|(_, column, _)| column)
}

fn diff_column(
    name: &str,
    before: Option<&ColumnSnapshot>,
    after: Option<&ColumnSnapshot>,
) -> ColumnDiff {
    let (status, changed_attributes) = match (before, after) {
        (None, _) => (ChangeStatus::Added, Vec::new()),
        (_, None) => (ChangeStatus::Removed, Vec::new()),
        (Some(old), Some(new)) => {
            let changed = changed_attributes(old, new);
            if changed.is_empty() {
                (ChangeStatus::Unchanged, changed)
            } else {
                (ChangeStatus::Modified, changed)
            }
        }
    };

    ColumnDiff {
        name: name.to_string(),
        status,
        changed_attributes,
        before: before.cloned(),
        after: after.cloned(),
    }
}

fn changed_attributes(old: &ColumnSnapshot, new: &ColumnSnapshot) -> Vec<ColumnAttribute> {
    let checks = [
        (old.data_type != new.data_type, ColumnAttribute::Type),
        (old.nullable != new.nullable, ColumnAttribute::Nullable),
        (old.is_primary_key != new.is_primary_key, ColumnAttribute::PrimaryKey),
        (old.is_foreign_key != new.is_foreign_key, ColumnAttribute::ForeignKey),
        (old.default_value != new.default_value, ColumnAttribute::DefaultValue),
        (old.is_unique != new.is_unique, ColumnAttribute::Unique),
    ];

    checks
        .into_iter()
        .filter(|(differs, _)| *differs)
        .map(|(_, attribute)| attribute)
        .collect()
}
