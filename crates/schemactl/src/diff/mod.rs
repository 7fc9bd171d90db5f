//! Schema diffing: introspection, comparison, and script generation.
//!
//! The pipeline is `(source, target) → Reader × Reader → Comparator →
//! Generator`. Snapshots are immutable values once read; the comparator is
//! pure; the generator writes both migration directions in one pass.

mod comparator;
mod differ;
mod generator;
mod reader;
mod schema;

pub use comparator::Comparator;
pub use differ::{DiffOptions, Differ};
pub use generator::Generator;
pub use reader::SchemaReader;
pub use schema::{
    Column, ColumnDiff, Constraint, DatabaseSchema, DiffResult, EnumDiff, EnumType, Function,
    FunctionDiff, GeneratedScript, Index, Sequence, Table, TableDiff, Trigger, View, ViewDiff,
};
