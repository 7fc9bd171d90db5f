//! Snapshot comparison.
//!
//! The comparator is a pure function from two snapshots to a [`DiffResult`].
//! Every object class is compared independently by key equality; definitions
//! are compared as text, never parsed or normalized.

use std::collections::BTreeMap;

use super::schema::{
    Column, ColumnDiff, DatabaseSchema, DiffResult, EnumDiff, EnumType, FunctionDiff, Table,
    TableDiff, ViewDiff,
};

/// Compares two database schemas.
pub struct Comparator;

impl Comparator {
    pub fn new() -> Self {
        Self
    }

    /// Compute the typed delta between a source and a target snapshot.
    ///
    /// "Created" means present in the target only; "dropped" means present
    /// in the source only; "altered" means present in both and not
    /// equivalent by the class-specific rule.
    pub fn compare(&self, source: &DatabaseSchema, target: &DatabaseSchema) -> DiffResult {
        let mut result = DiffResult::default();

        self.compare_tables(source, target, &mut result);
        self.compare_indexes(source, target, &mut result);
        self.compare_constraints(source, target, &mut result);
        self.compare_sequences(source, target, &mut result);
        self.compare_enums(source, target, &mut result);
        self.compare_functions(source, target, &mut result);
        self.compare_views(source, target, &mut result);
        self.compare_triggers(source, target, &mut result);

        result
    }

    fn compare_tables(
        &self,
        source: &DatabaseSchema,
        target: &DatabaseSchema,
        result: &mut DiffResult,
    ) {
        for (key, table) in &target.tables {
            if !source.tables.contains_key(key) {
                result.created_tables.push(table.clone());
            }
        }
        for (key, table) in &source.tables {
            if !target.tables.contains_key(key) {
                result.dropped_tables.push(table.clone());
            }
        }
        for (key, source_table) in &source.tables {
            if let Some(target_table) = target.tables.get(key) {
                if let Some(diff) = self.compare_table_structure(source_table, target_table) {
                    result.altered_tables.push(diff);
                }
            }
        }
    }

    /// Compare two tables column by column; `None` when nothing changed.
    fn compare_table_structure(&self, source: &Table, target: &Table) -> Option<TableDiff> {
        let mut diff = TableDiff {
            table_name: target.name.clone(),
            ..TableDiff::default()
        };

        for (name, column) in &target.columns {
            if !source.columns.contains_key(name) {
                diff.added_columns.push(column.clone());
            }
        }
        for (name, column) in &source.columns {
            if !target.columns.contains_key(name) {
                diff.dropped_columns.push(column.clone());
            }
        }
        for (name, source_column) in &source.columns {
            if let Some(target_column) = target.columns.get(name) {
                if let Some(column_diff) = self.compare_columns(source_column, target_column) {
                    diff.altered_columns.push(column_diff);
                }
            }
        }

        if diff.added_columns.is_empty()
            && diff.dropped_columns.is_empty()
            && diff.altered_columns.is_empty()
        {
            return None;
        }
        Some(diff)
    }

    /// Compare two columns; `None` when all three flags are false.
    fn compare_columns(&self, source: &Column, target: &Column) -> Option<ColumnDiff> {
        let type_changed = source.data_type != target.data_type;
        let nullable_changed = source.is_nullable != target.is_nullable;
        // two absent defaults are equal; absent vs present differ
        let default_changed = source.default_value != target.default_value;

        if !type_changed && !nullable_changed && !default_changed {
            return None;
        }
        Some(ColumnDiff {
            name: target.name.clone(),
            old_column: source.clone(),
            new_column: target.clone(),
            type_changed,
            nullable_changed,
            default_changed,
        })
    }

    fn compare_indexes(
        &self,
        source: &DatabaseSchema,
        target: &DatabaseSchema,
        result: &mut DiffResult,
    ) {
        // primary-key indexes are implied by primary-key constraints
        for (key, index) in &target.indexes {
            if !source.indexes.contains_key(key) && !index.is_primary {
                result.created_indexes.push(index.clone());
            }
        }
        for (key, index) in &source.indexes {
            if !target.indexes.contains_key(key) && !index.is_primary {
                result.dropped_indexes.push(index.clone());
            }
        }
    }

    fn compare_constraints(
        &self,
        source: &DatabaseSchema,
        target: &DatabaseSchema,
        result: &mut DiffResult,
    ) {
        for (key, constraint) in &target.constraints {
            if !source.constraints.contains_key(key) {
                result.created_constraints.push(constraint.clone());
            }
        }
        for (key, constraint) in &source.constraints {
            if !target.constraints.contains_key(key) {
                result.dropped_constraints.push(constraint.clone());
            }
        }
    }

    fn compare_sequences(
        &self,
        source: &DatabaseSchema,
        target: &DatabaseSchema,
        result: &mut DiffResult,
    ) {
        for (key, sequence) in &target.sequences {
            if !source.sequences.contains_key(key) {
                result.created_sequences.push(sequence.clone());
            }
        }
        for (key, sequence) in &source.sequences {
            if !target.sequences.contains_key(key) {
                result.dropped_sequences.push(sequence.clone());
            }
        }
    }

    fn compare_enums(
        &self,
        source: &DatabaseSchema,
        target: &DatabaseSchema,
        result: &mut DiffResult,
    ) {
        for (key, enum_type) in &target.enums {
            if !source.enums.contains_key(key) {
                result.created_enums.push(enum_type.clone());
            }
        }
        for (key, enum_type) in &source.enums {
            if !target.enums.contains_key(key) {
                result.dropped_enums.push(enum_type.clone());
            }
        }
        for (key, source_enum) in &source.enums {
            if let Some(target_enum) = target.enums.get(key) {
                if let Some(diff) = self.compare_enum_values(source_enum, target_enum) {
                    result.altered_enums.push(diff);
                }
            }
        }
    }

    /// Enum equivalence is set membership over value labels; order is not
    /// compared.
    fn compare_enum_values(&self, source: &EnumType, target: &EnumType) -> Option<EnumDiff> {
        let source_set: BTreeMap<&str, ()> =
            source.values.iter().map(|v| (v.as_str(), ())).collect();
        let target_set: BTreeMap<&str, ()> =
            target.values.iter().map(|v| (v.as_str(), ())).collect();

        let added_values: Vec<String> = target
            .values
            .iter()
            .filter(|v| !source_set.contains_key(v.as_str()))
            .cloned()
            .collect();
        let removed_values: Vec<String> = source
            .values
            .iter()
            .filter(|v| !target_set.contains_key(v.as_str()))
            .cloned()
            .collect();

        if added_values.is_empty() && removed_values.is_empty() {
            return None;
        }
        Some(EnumDiff {
            name: target.name.clone(),
            added_values,
            removed_values,
        })
    }

    fn compare_functions(
        &self,
        source: &DatabaseSchema,
        target: &DatabaseSchema,
        result: &mut DiffResult,
    ) {
        for (key, function) in &target.functions {
            if !source.functions.contains_key(key) {
                result.created_functions.push(function.clone());
            }
        }
        for (key, function) in &source.functions {
            if !target.functions.contains_key(key) {
                result.dropped_functions.push(function.clone());
            }
        }
        for (key, source_function) in &source.functions {
            if let Some(target_function) = target.functions.get(key) {
                if source_function.definition != target_function.definition {
                    result.altered_functions.push(FunctionDiff {
                        name: target_function.name.clone(),
                        old_definition: source_function.definition.clone(),
                        new_definition: target_function.definition.clone(),
                    });
                }
            }
        }
    }

    fn compare_views(
        &self,
        source: &DatabaseSchema,
        target: &DatabaseSchema,
        result: &mut DiffResult,
    ) {
        for (key, view) in &target.views {
            if !source.views.contains_key(key) {
                result.created_views.push(view.clone());
            }
        }
        for (key, view) in &source.views {
            if !target.views.contains_key(key) {
                result.dropped_views.push(view.clone());
            }
        }
        for (key, source_view) in &source.views {
            if let Some(target_view) = target.views.get(key) {
                if source_view.definition != target_view.definition {
                    result.altered_views.push(ViewDiff {
                        name: target_view.name.clone(),
                        old_definition: source_view.definition.clone(),
                        new_definition: target_view.definition.clone(),
                    });
                }
            }
        }
    }

    fn compare_triggers(
        &self,
        source: &DatabaseSchema,
        target: &DatabaseSchema,
        result: &mut DiffResult,
    ) {
        for (key, trigger) in &target.triggers {
            if !source.triggers.contains_key(key) {
                result.created_triggers.push(trigger.clone());
            }
        }
        for (key, trigger) in &source.triggers {
            if !target.triggers.contains_key(key) {
                result.dropped_triggers.push(trigger.clone());
            }
        }
    }
}

impl Default for Comparator {
    fn default() -> Self {
        Self::new()
    }
}
