//! Migration script generation.
//!
//! Emits a forward and a reverse program for a [`DiffResult`], writing in a
//! fixed dependency order so the forward script applies sequentially without
//! reorder: enums, sequences, tables, constraints (drops before creates),
//! indexes, functions, views, triggers. Each forward operation appends its
//! textual inverse to the down script; the two exceptions (dropped tables,
//! removed enum values) surface as warnings instead.

use chrono::{SecondsFormat, Utc};

use super::schema::{Column, DiffResult, GeneratedScript};

/// Generates migration scripts from diff results.
pub struct Generator {
    schema: String,
}

impl Generator {
    /// Create a generator targeting a schema; empty means `public`.
    pub fn new(schema: &str) -> Self {
        let schema = if schema.is_empty() { "public" } else { schema };
        Self {
            schema: schema.to_string(),
        }
    }

    /// Create UP and DOWN migration scripts.
    pub fn generate(&self, diff: &DiffResult, description: &str) -> GeneratedScript {
        let generated_at = Utc::now();
        let mut script = GeneratedScript {
            up_script: String::new(),
            down_script: String::new(),
            generated_at,
            description: description.to_string(),
            has_breaking: false,
            warnings: Vec::new(),
        };

        let timestamp = generated_at.to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut up = format!(
            "-- Migration: {}\n-- Generated: {}\n-- UP Migration\n\n",
            description, timestamp
        );
        let mut down = format!(
            "-- Migration: {}\n-- Generated: {}\n-- DOWN Migration\n\n",
            description, timestamp
        );

        self.generate_enums(&mut up, &mut down, diff, &mut script);
        self.generate_sequences(&mut up, &mut down, diff);
        self.generate_tables(&mut up, &mut down, diff, &mut script);
        self.generate_constraints(&mut up, &mut down, diff);
        self.generate_indexes(&mut up, &mut down, diff);
        self.generate_functions(&mut up, &mut down, diff);
        self.generate_views(&mut up, &mut down, diff);
        self.generate_triggers(&mut up, &mut down, diff);

        script.up_script = up;
        script.down_script = down;
        script
    }

    fn generate_enums(
        &self,
        up: &mut String,
        down: &mut String,
        diff: &DiffResult,
        script: &mut GeneratedScript,
    ) {
        for enum_type in &diff.created_enums {
            up.push_str(&format!(
                "CREATE TYPE {}.{} AS ENUM (\n",
                self.schema, enum_type.name
            ));
            for (i, value) in enum_type.values.iter().enumerate() {
                let separator = if i < enum_type.values.len() - 1 { "," } else { "" };
                up.push_str(&format!("    '{}'{}\n", value, separator));
            }
            up.push_str(");\n\n");

            down.push_str(&format!(
                "DROP TYPE IF EXISTS {}.{};\n\n",
                self.schema, enum_type.name
            ));
        }

        for enum_diff in &diff.altered_enums {
            for value in &enum_diff.added_values {
                up.push_str(&format!(
                    "ALTER TYPE {}.{} ADD VALUE '{}';\n",
                    self.schema, enum_diff.name, value
                ));
            }
            if !enum_diff.removed_values.is_empty() {
                script.warnings.push(format!(
                    "Cannot automatically remove enum values from {}. Manual intervention required.",
                    enum_diff.name
                ));
                script.has_breaking = true;
            }
            up.push('\n');
        }

        for enum_type in &diff.dropped_enums {
            up.push_str(&format!(
                "DROP TYPE IF EXISTS {}.{};\n\n",
                self.schema, enum_type.name
            ));

            down.push_str(&format!(
                "CREATE TYPE {}.{} AS ENUM (\n",
                self.schema, enum_type.name
            ));
            for (i, value) in enum_type.values.iter().enumerate() {
                let separator = if i < enum_type.values.len() - 1 { "," } else { "" };
                down.push_str(&format!("    '{}'{}\n", value, separator));
            }
            down.push_str(");\n\n");
        }
    }

    fn generate_sequences(&self, up: &mut String, down: &mut String, diff: &DiffResult) {
        for sequence in &diff.created_sequences {
            up.push_str(&format!(
                "CREATE SEQUENCE {}.{} START WITH {} INCREMENT BY {};\n\n",
                self.schema, sequence.name, sequence.start_value, sequence.increment
            ));
            down.push_str(&format!(
                "DROP SEQUENCE IF EXISTS {}.{};\n\n",
                self.schema, sequence.name
            ));
        }

        for sequence in &diff.dropped_sequences {
            up.push_str(&format!(
                "DROP SEQUENCE IF EXISTS {}.{};\n\n",
                self.schema, sequence.name
            ));
            down.push_str(&format!(
                "CREATE SEQUENCE {}.{} START WITH {} INCREMENT BY {};\n\n",
                self.schema, sequence.name, sequence.start_value, sequence.increment
            ));
        }
    }

    fn generate_tables(
        &self,
        up: &mut String,
        down: &mut String,
        diff: &DiffResult,
        script: &mut GeneratedScript,
    ) {
        for table in &diff.created_tables {
            up.push_str(&format!("CREATE TABLE {}.{} (\n", self.schema, table.name));

            let mut columns: Vec<&Column> = table.columns.values().collect();
            columns.sort_by_key(|c| c.ordinal_position);

            for (i, column) in columns.iter().enumerate() {
                up.push_str(&format!(
                    "    {} {}",
                    column.name,
                    self.format_column_type(column)
                ));
                if !column.is_nullable {
                    up.push_str(" NOT NULL");
                }
                if let Some(default) = &column.default_value {
                    up.push_str(&format!(" DEFAULT {}", default));
                }
                up.push_str(if i < columns.len() - 1 { ",\n" } else { "\n" });
            }
            up.push_str(");\n\n");

            down.push_str(&format!(
                "DROP TABLE IF EXISTS {}.{} CASCADE;\n\n",
                self.schema, table.name
            ));
        }

        for table_diff in &diff.altered_tables {
            for column in &table_diff.added_columns {
                up.push_str(&format!(
                    "ALTER TABLE {}.{} ADD COLUMN {} {}",
                    self.schema,
                    table_diff.table_name,
                    column.name,
                    self.format_column_type(column)
                ));
                if !column.is_nullable {
                    up.push_str(" NOT NULL");
                }
                if let Some(default) = &column.default_value {
                    up.push_str(&format!(" DEFAULT {}", default));
                }
                up.push_str(";\n");

                down.push_str(&format!(
                    "ALTER TABLE {}.{} DROP COLUMN IF EXISTS {};\n",
                    self.schema, table_diff.table_name, column.name
                ));
            }

            for column in &table_diff.dropped_columns {
                up.push_str(&format!(
                    "ALTER TABLE {}.{} DROP COLUMN IF EXISTS {};\n",
                    self.schema, table_diff.table_name, column.name
                ));
                script.warnings.push(format!(
                    "Dropping column {}.{} will result in data loss",
                    table_diff.table_name, column.name
                ));
                script.has_breaking = true;

                down.push_str(&format!(
                    "ALTER TABLE {}.{} ADD COLUMN {} {}",
                    self.schema,
                    table_diff.table_name,
                    column.name,
                    self.format_column_type(column)
                ));
                if !column.is_nullable {
                    down.push_str(" NOT NULL");
                }
                if let Some(default) = &column.default_value {
                    down.push_str(&format!(" DEFAULT {}", default));
                }
                down.push_str(";\n");
            }

            for column_diff in &table_diff.altered_columns {
                if column_diff.type_changed {
                    up.push_str(&format!(
                        "ALTER TABLE {}.{} ALTER COLUMN {} TYPE {};\n",
                        self.schema,
                        table_diff.table_name,
                        column_diff.name,
                        self.format_column_type(&column_diff.new_column)
                    ));
                    down.push_str(&format!(
                        "ALTER TABLE {}.{} ALTER COLUMN {} TYPE {};\n",
                        self.schema,
                        table_diff.table_name,
                        column_diff.name,
                        self.format_column_type(&column_diff.old_column)
                    ));
                    script.warnings.push(format!(
                        "Type change on {}.{} may cause data loss or conversion errors",
                        table_diff.table_name, column_diff.name
                    ));
                }

                if column_diff.nullable_changed {
                    if column_diff.new_column.is_nullable {
                        up.push_str(&format!(
                            "ALTER TABLE {}.{} ALTER COLUMN {} DROP NOT NULL;\n",
                            self.schema, table_diff.table_name, column_diff.name
                        ));
                        down.push_str(&format!(
                            "ALTER TABLE {}.{} ALTER COLUMN {} SET NOT NULL;\n",
                            self.schema, table_diff.table_name, column_diff.name
                        ));
                    } else {
                        up.push_str(&format!(
                            "ALTER TABLE {}.{} ALTER COLUMN {} SET NOT NULL;\n",
                            self.schema, table_diff.table_name, column_diff.name
                        ));
                        down.push_str(&format!(
                            "ALTER TABLE {}.{} ALTER COLUMN {} DROP NOT NULL;\n",
                            self.schema, table_diff.table_name, column_diff.name
                        ));
                        script.warnings.push(format!(
                            "Setting NOT NULL on {}.{} may fail if existing NULL values exist",
                            table_diff.table_name, column_diff.name
                        ));
                    }
                }

                if column_diff.default_changed {
                    match &column_diff.new_column.default_value {
                        Some(default) => up.push_str(&format!(
                            "ALTER TABLE {}.{} ALTER COLUMN {} SET DEFAULT {};\n",
                            self.schema, table_diff.table_name, column_diff.name, default
                        )),
                        None => up.push_str(&format!(
                            "ALTER TABLE {}.{} ALTER COLUMN {} DROP DEFAULT;\n",
                            self.schema, table_diff.table_name, column_diff.name
                        )),
                    }
                    match &column_diff.old_column.default_value {
                        Some(default) => down.push_str(&format!(
                            "ALTER TABLE {}.{} ALTER COLUMN {} SET DEFAULT {};\n",
                            self.schema, table_diff.table_name, column_diff.name, default
                        )),
                        None => down.push_str(&format!(
                            "ALTER TABLE {}.{} ALTER COLUMN {} DROP DEFAULT;\n",
                            self.schema, table_diff.table_name, column_diff.name
                        )),
                    }
                }
            }

            up.push('\n');
            down.push('\n');
        }

        for table in &diff.dropped_tables {
            up.push_str(&format!(
                "DROP TABLE IF EXISTS {}.{} CASCADE;\n\n",
                self.schema, table.name
            ));
            script.warnings.push(format!(
                "Dropping table {} will result in complete data loss",
                table.name
            ));
            script.has_breaking = true;

            // the reverse of a dropped table is a placeholder, not a rebuild
            down.push_str(&format!(
                "-- TODO: Recreate table {}.{} with all columns and data\n\n",
                self.schema, table.name
            ));
        }
    }

    fn generate_constraints(&self, up: &mut String, down: &mut String, diff: &DiffResult) {
        // drops go first so recreated shapes precede new references
        for constraint in &diff.dropped_constraints {
            up.push_str(&format!(
                "ALTER TABLE {}.{} DROP CONSTRAINT IF EXISTS {};\n",
                self.schema, constraint.table_name, constraint.name
            ));
        }
        if !diff.dropped_constraints.is_empty() {
            up.push('\n');
        }

        for constraint in &diff.created_constraints {
            up.push_str(&format!(
                "ALTER TABLE {}.{} ADD CONSTRAINT {} {};\n",
                self.schema, constraint.table_name, constraint.name, constraint.definition
            ));
            down.push_str(&format!(
                "ALTER TABLE {}.{} DROP CONSTRAINT IF EXISTS {};\n",
                self.schema, constraint.table_name, constraint.name
            ));
        }
        if !diff.created_constraints.is_empty() {
            up.push('\n');
            down.push('\n');
        }

        for constraint in &diff.dropped_constraints {
            down.push_str(&format!(
                "ALTER TABLE {}.{} ADD CONSTRAINT {} {};\n",
                self.schema, constraint.table_name, constraint.name, constraint.definition
            ));
        }
        if !diff.dropped_constraints.is_empty() {
            down.push('\n');
        }
    }

    fn generate_indexes(&self, up: &mut String, down: &mut String, diff: &DiffResult) {
        for index in &diff.created_indexes {
            up.push_str(&format!("{};\n", index.definition));
            down.push_str(&format!(
                "DROP INDEX IF EXISTS {}.{};\n",
                self.schema, index.name
            ));
        }
        if !diff.created_indexes.is_empty() {
            up.push('\n');
            down.push('\n');
        }

        for index in &diff.dropped_indexes {
            up.push_str(&format!(
                "DROP INDEX IF EXISTS {}.{};\n",
                self.schema, index.name
            ));
            down.push_str(&format!("{};\n", index.definition));
        }
        if !diff.dropped_indexes.is_empty() {
            up.push('\n');
            down.push('\n');
        }
    }

    fn generate_functions(&self, up: &mut String, down: &mut String, diff: &DiffResult) {
        for function in &diff.created_functions {
            up.push_str(&function.definition);
            up.push_str(";\n\n");
            down.push_str(&format!(
                "DROP FUNCTION IF EXISTS {}.{};\n\n",
                self.schema, function.name
            ));
        }

        for function_diff in &diff.altered_functions {
            up.push_str(&format!("-- Replacing function {}\n", function_diff.name));
            up.push_str(&function_diff.new_definition);
            up.push_str(";\n\n");

            down.push_str(&format!("-- Restoring function {}\n", function_diff.name));
            down.push_str(&function_diff.old_definition);
            down.push_str(";\n\n");
        }

        for function in &diff.dropped_functions {
            up.push_str(&format!(
                "DROP FUNCTION IF EXISTS {}.{};\n\n",
                self.schema, function.name
            ));
            down.push_str(&function.definition);
            down.push_str(";\n\n");
        }
    }

    fn generate_views(&self, up: &mut String, down: &mut String, diff: &DiffResult) {
        for view in &diff.created_views {
            up.push_str(&format!(
                "CREATE VIEW {}.{} AS\n{};\n\n",
                self.schema, view.name, view.definition
            ));
            down.push_str(&format!(
                "DROP VIEW IF EXISTS {}.{};\n\n",
                self.schema, view.name
            ));
        }

        for view_diff in &diff.altered_views {
            up.push_str(&format!(
                "CREATE OR REPLACE VIEW {}.{} AS\n{};\n\n",
                self.schema, view_diff.name, view_diff.new_definition
            ));
            down.push_str(&format!(
                "CREATE OR REPLACE VIEW {}.{} AS\n{};\n\n",
                self.schema, view_diff.name, view_diff.old_definition
            ));
        }

        for view in &diff.dropped_views {
            up.push_str(&format!(
                "DROP VIEW IF EXISTS {}.{};\n\n",
                self.schema, view.name
            ));
            down.push_str(&format!(
                "CREATE VIEW {}.{} AS\n{};\n\n",
                self.schema, view.name, view.definition
            ));
        }
    }

    fn generate_triggers(&self, up: &mut String, down: &mut String, diff: &DiffResult) {
        for trigger in &diff.created_triggers {
            up.push_str(&format!("{};\n\n", trigger.definition));
            down.push_str(&format!(
                "DROP TRIGGER IF EXISTS {} ON {}.{};\n\n",
                trigger.name, self.schema, trigger.table_name
            ));
        }

        for trigger in &diff.dropped_triggers {
            up.push_str(&format!(
                "DROP TRIGGER IF EXISTS {} ON {}.{};\n\n",
                trigger.name, self.schema, trigger.table_name
            ));
            down.push_str(&format!("{};\n\n", trigger.definition));
        }
    }

    /// Render a column's type with length or precision/scale when present.
    fn format_column_type(&self, column: &Column) -> String {
        if let Some(length) = column.char_max_length {
            return format!("{}({})", column.data_type, length);
        }
        if let (Some(precision), Some(scale)) = (column.numeric_precision, column.numeric_scale) {
            return format!("{}({},{})", column.data_type, precision, scale);
        }
        if let Some(precision) = column.numeric_precision {
            return format!("{}({})", column.data_type, precision);
        }
        column.data_type.clone()
    }
}
