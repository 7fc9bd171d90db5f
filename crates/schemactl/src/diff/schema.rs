//! Schema snapshot and diff result types.
//!
//! A snapshot is an immutable, typed picture of one database schema, keyed
//! by fully-qualified names (`schema.name`, or `schema.table.name` for
//! triggers). Ordered maps keep snapshots and everything derived from them
//! deterministic for equal input schemas.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Complete schema of a database at one point in time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSchema {
    pub tables: BTreeMap<String, Table>,
    pub indexes: BTreeMap<String, Index>,
    pub constraints: BTreeMap<String, Constraint>,
    pub sequences: BTreeMap<String, Sequence>,
    pub enums: BTreeMap<String, EnumType>,
    pub functions: BTreeMap<String, Function>,
    pub views: BTreeMap<String, View>,
    pub triggers: BTreeMap<String, Trigger>,
}

/// A database table and its columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub schema: String,
    pub columns: BTreeMap<String, Column>,
    pub comment: String,
}

impl Table {
    /// The fully qualified container key.
    pub fn key(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// A table column.
///
/// Optional metadata stays optional: downstream generation must distinguish
/// "no default" from "default = empty string".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub default_value: Option<String>,
    pub char_max_length: Option<i32>,
    pub numeric_precision: Option<i32>,
    pub numeric_scale: Option<i32>,

    /// 1-based position within the table.
    pub ordinal_position: i32,
    pub comment: Option<String>,
}

/// A database index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub table_name: String,
    pub schema: String,
    pub columns: Vec<String>,
    pub is_unique: bool,

    /// Primary-key indexes are expressed through constraints and are
    /// filtered from the diff's created/dropped sets.
    pub is_primary: bool,
    pub definition: String,
}

impl Index {
    pub fn key(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// A table constraint (`CHECK`, `FOREIGN KEY`, `UNIQUE`, `PRIMARY KEY`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub name: String,
    pub table_name: String,
    pub schema: String,

    /// Canonical uppercase type string.
    pub constraint_type: String,
    pub definition: String,
    pub foreign_table: Option<String>,
    pub foreign_columns: Vec<String>,
    pub on_delete: Option<String>,
    pub on_update: Option<String>,
}

impl Constraint {
    pub fn key(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// A database sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    pub name: String,
    pub schema: String,
    pub start_value: i64,
    pub increment: i64,
}

impl Sequence {
    pub fn key(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// A custom enum type. `values` preserves the declared sort order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnumType {
    pub name: String,
    pub schema: String,
    pub values: Vec<String>,
}

impl EnumType {
    pub fn key(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// A database function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub schema: String,
    pub definition: String,
    pub return_type: String,
    pub language: String,
}

impl Function {
    pub fn key(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// A database view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct View {
    pub name: String,
    pub schema: String,
    pub definition: String,
}

impl View {
    pub fn key(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// A table trigger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub name: String,
    pub table_name: String,
    pub schema: String,

    /// `BEFORE`, `AFTER`, or `INSTEAD OF`.
    pub timing: String,

    /// `INSERT`, `UPDATE`, or `DELETE`.
    pub event: String,
    pub definition: String,
}

impl Trigger {
    /// Triggers are keyed by `schema.table.name`.
    pub fn key(&self) -> String {
        format!("{}.{}.{}", self.schema, self.table_name, self.name)
    }
}

/// The typed delta between two snapshots.
#[derive(Debug, Clone, Default)]
pub struct DiffResult {
    pub created_tables: Vec<Table>,
    pub dropped_tables: Vec<Table>,
    pub altered_tables: Vec<TableDiff>,

    pub created_indexes: Vec<Index>,
    pub dropped_indexes: Vec<Index>,

    pub created_constraints: Vec<Constraint>,
    pub dropped_constraints: Vec<Constraint>,

    pub created_sequences: Vec<Sequence>,
    pub dropped_sequences: Vec<Sequence>,

    pub created_enums: Vec<EnumType>,
    pub dropped_enums: Vec<EnumType>,
    pub altered_enums: Vec<EnumDiff>,

    pub created_functions: Vec<Function>,
    pub dropped_functions: Vec<Function>,
    pub altered_functions: Vec<FunctionDiff>,

    pub created_views: Vec<View>,
    pub dropped_views: Vec<View>,
    pub altered_views: Vec<ViewDiff>,

    pub created_triggers: Vec<Trigger>,
    pub dropped_triggers: Vec<Trigger>,
}

impl DiffResult {
    /// True if any bucket is non-empty.
    pub fn has_changes(&self) -> bool {
        !self.created_tables.is_empty()
            || !self.dropped_tables.is_empty()
            || !self.altered_tables.is_empty()
            || !self.created_indexes.is_empty()
            || !self.dropped_indexes.is_empty()
            || !self.created_constraints.is_empty()
            || !self.dropped_constraints.is_empty()
            || !self.created_sequences.is_empty()
            || !self.dropped_sequences.is_empty()
            || !self.created_enums.is_empty()
            || !self.dropped_enums.is_empty()
            || !self.altered_enums.is_empty()
            || !self.created_functions.is_empty()
            || !self.dropped_functions.is_empty()
            || !self.altered_functions.is_empty()
            || !self.created_views.is_empty()
            || !self.dropped_views.is_empty()
            || !self.altered_views.is_empty()
            || !self.created_triggers.is_empty()
            || !self.dropped_triggers.is_empty()
    }
}

/// Changes to one table.
#[derive(Debug, Clone, Default)]
pub struct TableDiff {
    pub table_name: String,
    pub added_columns: Vec<Column>,
    pub dropped_columns: Vec<Column>,
    pub altered_columns: Vec<ColumnDiff>,
}

/// Changes to one column, as three independent flags.
#[derive(Debug, Clone)]
pub struct ColumnDiff {
    pub name: String,
    pub old_column: Column,
    pub new_column: Column,
    pub type_changed: bool,
    pub nullable_changed: bool,
    pub default_changed: bool,
}

/// Value-set changes to one enum type.
#[derive(Debug, Clone, Default)]
pub struct EnumDiff {
    pub name: String,
    pub added_values: Vec<String>,
    pub removed_values: Vec<String>,
}

/// Definition change of one function.
#[derive(Debug, Clone)]
pub struct FunctionDiff {
    pub name: String,
    pub old_definition: String,
    pub new_definition: String,
}

/// Definition change of one view.
#[derive(Debug, Clone)]
pub struct ViewDiff {
    pub name: String,
    pub old_definition: String,
    pub new_definition: String,
}

/// A generated pair of forward/reverse migration programs.
#[derive(Debug, Clone)]
pub struct GeneratedScript {
    pub up_script: String,
    pub down_script: String,
    pub generated_at: DateTime<Utc>,
    pub description: String,

    /// True when any forward operation cannot be cleanly reversed.
    pub has_breaking: bool,
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_fully_qualified() {
        let table = Table {
            name: "users".into(),
            schema: "public".into(),
            ..Table::default()
        };
        assert_eq!(table.key(), "public.users");

        let trigger = Trigger {
            name: "audit".into(),
            table_name: "users".into(),
            schema: "public".into(),
            ..Trigger::default()
        };
        assert_eq!(trigger.key(), "public.users.audit");
    }

    #[test]
    fn test_empty_diff_has_no_changes() {
        assert!(!DiffResult::default().has_changes());
    }

    #[test]
    fn test_single_bucket_flips_has_changes() {
        let diff = DiffResult {
            created_sequences: vec![Sequence {
                name: "user_id_seq".into(),
                schema: "public".into(),
                start_value: 1,
                increment: 1,
            }],
            ..DiffResult::default()
        };
        assert!(diff.has_changes());
    }
}
