//! Live schema introspection.
//!
//! Reads one logical schema from a connection into a [`DatabaseSchema`]
//! snapshot. One read runs per object class in a fixed order; a failure in
//! any class aborts the snapshot with an error naming the class. All reads
//! sort by canonical name so equal input schemas produce equal snapshots.

use std::collections::HashSet;

use deadpool_postgres::Pool;
use tracing::debug;

use super::schema::{
    Column, Constraint, DatabaseSchema, EnumType, Function, Index, Sequence, Table, Trigger, View,
};
use crate::error::{Result, SchemaError};

/// Reads database schema information into a snapshot.
pub struct SchemaReader {
    pool: Pool,
    schema: String,
    ignore_tables: HashSet<String>,
    ignore_columns: HashSet<String>,
}

impl SchemaReader {
    /// Create a reader for one schema; empty means `public`.
    pub fn new(pool: Pool, schema: &str) -> Self {
        let schema = if schema.is_empty() { "public" } else { schema };
        Self {
            pool,
            schema: schema.to_string(),
            ignore_tables: HashSet::new(),
            ignore_columns: HashSet::new(),
        }
    }

    /// Tables to leave out of the snapshot entirely.
    pub fn with_ignore_tables(mut self, tables: &[String]) -> Self {
        self.ignore_tables = tables.iter().cloned().collect();
        self
    }

    /// Columns to leave out, keyed `table.column`.
    pub fn with_ignore_columns(mut self, columns: &[String]) -> Self {
        self.ignore_columns = columns.iter().cloned().collect();
        self
    }

    fn should_ignore_table(&self, table_name: &str) -> bool {
        self.ignore_tables.contains(table_name)
    }

    fn should_ignore_column(&self, table_name: &str, column_name: &str) -> bool {
        self.ignore_columns
            .contains(&format!("{}.{}", table_name, column_name))
    }

    async fn client(&self) -> Result<deadpool_postgres::Client> {
        self.pool
            .get()
            .await
            .map_err(|e| SchemaError::Connectivity(format!("getting connection: {}", e)))
    }

    /// Read the complete schema.
    pub async fn read_schema(&self) -> Result<DatabaseSchema> {
        let mut schema = DatabaseSchema::default();

        self.read_tables(&mut schema)
            .await
            .map_err(|e| class_error("tables", e))?;
        self.read_indexes(&mut schema)
            .await
            .map_err(|e| class_error("indexes", e))?;
        self.read_constraints(&mut schema)
            .await
            .map_err(|e| class_error("constraints", e))?;
        self.read_sequences(&mut schema)
            .await
            .map_err(|e| class_error("sequences", e))?;
        self.read_enums(&mut schema)
            .await
            .map_err(|e| class_error("enums", e))?;
        self.read_functions(&mut schema)
            .await
            .map_err(|e| class_error("functions", e))?;
        self.read_views(&mut schema)
            .await
            .map_err(|e| class_error("views", e))?;
        self.read_triggers(&mut schema)
            .await
            .map_err(|e| class_error("triggers", e))?;

        debug!(
            "read schema '{}': {} tables, {} indexes, {} constraints",
            self.schema,
            schema.tables.len(),
            schema.indexes.len(),
            schema.constraints.len()
        );
        Ok(schema)
    }

    async fn read_tables(&self, schema: &mut DatabaseSchema) -> Result<()> {
        let query = r#"
            SELECT
                t.table_name,
                t.table_schema,
                obj_description((quote_ident(t.table_schema)||'.'||quote_ident(t.table_name))::regclass, 'pg_class')
            FROM information_schema.tables t
            WHERE t.table_schema = $1
            AND t.table_type = 'BASE TABLE'
            ORDER BY t.table_name
        "#;

        let client = self.client().await?;
        let rows = client.query(query, &[&self.schema]).await?;

        for row in rows {
            let name: String = row.get(0);
            if self.should_ignore_table(&name) {
                continue;
            }
            let mut table = Table {
                name,
                schema: row.get(1),
                columns: Default::default(),
                comment: row.get::<_, Option<String>>(2).unwrap_or_default(),
            };
            self.read_columns(&client, &mut table).await?;
            schema.tables.insert(table.key(), table);
        }
        Ok(())
    }

    async fn read_columns(
        &self,
        client: &deadpool_postgres::Client,
        table: &mut Table,
    ) -> Result<()> {
        let query = r#"
            SELECT
                c.column_name,
                c.data_type,
                c.is_nullable,
                c.column_default,
                c.character_maximum_length::int4,
                c.numeric_precision::int4,
                c.numeric_scale::int4,
                c.ordinal_position::int4,
                pgd.description
            FROM information_schema.columns c
            LEFT JOIN pg_catalog.pg_statio_all_tables st
                ON c.table_schema = st.schemaname
                AND c.table_name = st.relname
            LEFT JOIN pg_catalog.pg_description pgd
                ON pgd.objoid = st.relid
                AND pgd.objsubid = c.ordinal_position
            WHERE c.table_schema = $1
            AND c.table_name = $2
            ORDER BY c.ordinal_position
        "#;

        let rows = client.query(query, &[&table.schema, &table.name]).await?;
        for row in rows {
            let name: String = row.get(0);
            if self.should_ignore_column(&table.name, &name) {
                continue;
            }
            let is_nullable: String = row.get(2);
            let column = Column {
                name: name.clone(),
                data_type: row.get(1),
                is_nullable: is_nullable == "YES",
                default_value: row.get(3),
                char_max_length: row.get(4),
                numeric_precision: row.get(5),
                numeric_scale: row.get(6),
                ordinal_position: row.get(7),
                comment: row.get(8),
            };
            table.columns.insert(name, column);
        }
        Ok(())
    }

    async fn read_indexes(&self, schema: &mut DatabaseSchema) -> Result<()> {
        let query = r#"
            SELECT
                i.indexname,
                i.tablename,
                i.schemaname,
                ix.indisunique,
                ix.indisprimary,
                pg_get_indexdef(ix.indexrelid),
                array_agg(a.attname ORDER BY a.attnum)::text
            FROM pg_indexes i
            JOIN pg_class c ON c.relname = i.indexname
            JOIN pg_index ix ON ix.indexrelid = c.oid
            JOIN pg_class t ON t.oid = ix.indrelid
            JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
            WHERE i.schemaname = $1
            GROUP BY i.indexname, i.tablename, i.schemaname, ix.indisunique, ix.indisprimary, ix.indexrelid
            ORDER BY i.tablename, i.indexname
        "#;

        let client = self.client().await?;
        for row in client.query(query, &[&self.schema]).await? {
            let table_name: String = row.get(1);
            if self.should_ignore_table(&table_name) {
                continue;
            }
            let index = Index {
                name: row.get(0),
                table_name,
                schema: row.get(2),
                is_unique: row.get(3),
                is_primary: row.get(4),
                definition: row.get(5),
                columns: parse_pg_array(row.get(6)),
            };
            schema.indexes.insert(index.key(), index);
        }
        Ok(())
    }

    async fn read_constraints(&self, schema: &mut DatabaseSchema) -> Result<()> {
        let query = r#"
            SELECT
                con.conname,
                rel.relname,
                ns.nspname,
                con.contype::text,
                pg_get_constraintdef(con.oid),
                frel.relname,
                CASE WHEN con.contype = 'f' THEN con.confdeltype::text END,
                CASE WHEN con.contype = 'f' THEN con.confupdtype::text END,
                CASE WHEN con.contype = 'f' THEN
                    (SELECT array_agg(fa.attname ORDER BY k.ord)::text
                     FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord)
                     JOIN pg_attribute fa
                       ON fa.attrelid = con.confrelid AND fa.attnum = k.attnum)
                END
            FROM pg_constraint con
            JOIN pg_class rel ON rel.oid = con.conrelid
            JOIN pg_namespace ns ON ns.oid = rel.relnamespace
            LEFT JOIN pg_class frel ON frel.oid = con.confrelid
            WHERE ns.nspname = $1
            AND con.contype IN ('c', 'f', 'u', 'p')
            ORDER BY rel.relname, con.conname
        "#;

        let client = self.client().await?;
        for row in client.query(query, &[&self.schema]).await? {
            let table_name: String = row.get(1);
            if self.should_ignore_table(&table_name) {
                continue;
            }
            let constraint_type: String = row.get(3);
            let constraint = Constraint {
                name: row.get(0),
                table_name,
                schema: row.get(2),
                constraint_type: map_constraint_type(&constraint_type).to_string(),
                definition: row.get(4),
                foreign_table: row.get(5),
                on_delete: row
                    .get::<_, Option<String>>(6)
                    .map(|a| map_foreign_key_action(&a).to_string()),
                on_update: row
                    .get::<_, Option<String>>(7)
                    .map(|a| map_foreign_key_action(&a).to_string()),
                foreign_columns: row
                    .get::<_, Option<String>>(8)
                    .map(parse_pg_array)
                    .unwrap_or_default(),
            };
            schema.constraints.insert(constraint.key(), constraint);
        }
        Ok(())
    }

    async fn read_sequences(&self, schema: &mut DatabaseSchema) -> Result<()> {
        let query = r#"
            SELECT
                sequence_name,
                sequence_schema,
                start_value::bigint,
                increment::bigint
            FROM information_schema.sequences
            WHERE sequence_schema = $1
            ORDER BY sequence_name
        "#;

        let client = self.client().await?;
        for row in client.query(query, &[&self.schema]).await? {
            let sequence = Sequence {
                name: row.get(0),
                schema: row.get(1),
                start_value: row.get(2),
                increment: row.get(3),
            };
            schema.sequences.insert(sequence.key(), sequence);
        }
        Ok(())
    }

    async fn read_enums(&self, schema: &mut DatabaseSchema) -> Result<()> {
        let query = r#"
            SELECT
                t.typname,
                n.nspname,
                array_agg(e.enumlabel ORDER BY e.enumsortorder)::text
            FROM pg_type t
            JOIN pg_enum e ON t.oid = e.enumtypid
            JOIN pg_namespace n ON t.typnamespace = n.oid
            WHERE n.nspname = $1
            GROUP BY t.typname, n.nspname
            ORDER BY t.typname
        "#;

        let client = self.client().await?;
        for row in client.query(query, &[&self.schema]).await? {
            let enum_type = EnumType {
                name: row.get(0),
                schema: row.get(1),
                values: parse_pg_array(row.get(2)),
            };
            schema.enums.insert(enum_type.key(), enum_type);
        }
        Ok(())
    }

    async fn read_functions(&self, schema: &mut DatabaseSchema) -> Result<()> {
        let query = r#"
            SELECT
                p.proname,
                n.nspname,
                pg_get_functiondef(p.oid),
                pg_get_function_result(p.oid),
                l.lanname
            FROM pg_proc p
            JOIN pg_namespace n ON p.pronamespace = n.oid
            JOIN pg_language l ON p.prolang = l.oid
            WHERE n.nspname = $1
            AND p.prokind = 'f'
            ORDER BY p.proname
        "#;

        let client = self.client().await?;
        for row in client.query(query, &[&self.schema]).await? {
            let function = Function {
                name: row.get(0),
                schema: row.get(1),
                definition: row.get(2),
                return_type: row.get(3),
                language: row.get(4),
            };
            schema.functions.insert(function.key(), function);
        }
        Ok(())
    }

    async fn read_views(&self, schema: &mut DatabaseSchema) -> Result<()> {
        let query = r#"
            SELECT
                table_name,
                table_schema,
                view_definition
            FROM information_schema.views
            WHERE table_schema = $1
            ORDER BY table_name
        "#;

        let client = self.client().await?;
        for row in client.query(query, &[&self.schema]).await? {
            let view = View {
                name: row.get(0),
                schema: row.get(1),
                definition: row.get::<_, Option<String>>(2).unwrap_or_default(),
            };
            schema.views.insert(view.key(), view);
        }
        Ok(())
    }

    async fn read_triggers(&self, schema: &mut DatabaseSchema) -> Result<()> {
        let query = r#"
            SELECT
                t.tgname,
                c.relname,
                n.nspname,
                CASE t.tgtype & 2
                    WHEN 0 THEN 'AFTER'
                    ELSE 'BEFORE'
                END,
                CASE t.tgtype & 28
                    WHEN 4 THEN 'INSERT'
                    WHEN 8 THEN 'DELETE'
                    WHEN 16 THEN 'UPDATE'
                    ELSE 'UNKNOWN'
                END,
                pg_get_triggerdef(t.oid)
            FROM pg_trigger t
            JOIN pg_class c ON t.tgrelid = c.oid
            JOIN pg_namespace n ON c.relnamespace = n.oid
            WHERE n.nspname = $1
            AND NOT t.tgisinternal
            ORDER BY c.relname, t.tgname
        "#;

        let client = self.client().await?;
        for row in client.query(query, &[&self.schema]).await? {
            let table_name: String = row.get(1);
            if self.should_ignore_table(&table_name) {
                continue;
            }
            let trigger = Trigger {
                name: row.get(0),
                table_name,
                schema: row.get(2),
                timing: row.get(3),
                event: row.get(4),
                definition: row.get(5),
            };
            schema.triggers.insert(trigger.key(), trigger);
        }
        Ok(())
    }
}

fn class_error(class: &str, e: SchemaError) -> SchemaError {
    SchemaError::Runtime(format!("reading {}: {}", class, e))
}

/// Parse the portable `{a,b,c}` textual form of a one-dimensional array.
fn parse_pg_array(s: String) -> Vec<String> {
    let trimmed = s.trim_start_matches('{').trim_end_matches('}');
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed.split(',').map(str::to_string).collect()
}

/// Map a `pg_constraint.contype` code to its canonical uppercase string.
fn map_constraint_type(code: &str) -> &'static str {
    match code {
        "c" => "CHECK",
        "f" => "FOREIGN KEY",
        "p" => "PRIMARY KEY",
        "u" => "UNIQUE",
        _ => "UNKNOWN",
    }
}

/// Map a foreign-key action code to its canonical uppercase string.
fn map_foreign_key_action(code: &str) -> &'static str {
    match code {
        "a" => "NO ACTION",
        "r" => "RESTRICT",
        "c" => "CASCADE",
        "n" => "SET NULL",
        "d" => "SET DEFAULT",
        _ => "NO ACTION",
    }
}
