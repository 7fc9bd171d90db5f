//! End-to-end diff orchestration.
//!
//! Opens two read-only connections, reads both schemas, computes the delta
//! and emits the migration script pair.

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::NoTls;
use tracing::info;

use super::comparator::Comparator;
use super::generator::Generator;
use super::reader::SchemaReader;
use super::schema::GeneratedScript;
use crate::error::{Result, SchemaError};

/// Options controlling a diff run.
#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
    /// Schema to compare; empty means `public`.
    pub schema: String,

    /// Description written into the script headers.
    pub description: String,

    /// Tables left out of both snapshots.
    pub ignore_tables: Vec<String>,

    /// Columns left out of both snapshots, keyed `table.column`.
    pub ignore_columns: Vec<String>,
}

/// Orchestrates the diff: two connections in, one script pair out.
pub struct Differ {
    source: Pool,
    target: Pool,
    options: DiffOptions,
}

impl Differ {
    /// Create a differ from two connection strings.
    pub fn new(source_conn: &str, target_conn: &str, options: DiffOptions) -> Result<Self> {
        Ok(Self {
            source: make_pool(source_conn, "source")?,
            target: make_pool(target_conn, "target")?,
            options,
        })
    }

    /// Read both schemas, compare them, and generate the migration scripts.
    pub async fn diff(&self) -> Result<GeneratedScript> {
        let source_schema = self
            .reader(self.source.clone())
            .read_schema()
            .await
            .map_err(|e| SchemaError::Runtime(format!("reading source schema: {}", e)))?;
        let target_schema = self
            .reader(self.target.clone())
            .read_schema()
            .await
            .map_err(|e| SchemaError::Runtime(format!("reading target schema: {}", e)))?;

        let diff = Comparator::new().compare(&source_schema, &target_schema);
        info!(
            "schema comparison finished, changes detected: {}",
            diff.has_changes()
        );

        Ok(Generator::new(&self.options.schema).generate(&diff, &self.options.description))
    }

    fn reader(&self, pool: Pool) -> SchemaReader {
        SchemaReader::new(pool, &self.options.schema)
            .with_ignore_tables(&self.options.ignore_tables)
            .with_ignore_columns(&self.options.ignore_columns)
    }
}

fn make_pool(conn: &str, which: &str) -> Result<Pool> {
    let pg_config: tokio_postgres::Config = conn
        .parse()
        .map_err(|e| SchemaError::Config(format!("invalid {} connection string: {}", which, e)))?;
    let manager = Manager::from_config(
        pg_config,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );
    Pool::builder(manager)
        .max_size(2)
        .build()
        .map_err(|e| SchemaError::Connectivity(format!("creating {} pool: {}", which, e)))
}
