//! Schema Introspection Module
//!
//! Catalog descriptors and the capability traits every endpoint dialect
//! implements. Descriptors are derived from the live catalogs at the start
//! of each run and never mutated afterwards.

pub mod oracle;
pub mod postgres;

use crate::connection::Dialect;
use crate::error::{MigrationError, MigrationResult};
use crate::migration::sequence::{parse_sequence_ref, SequenceRef};
use crate::migration::value::Row;
use crate::migration::writer::DestinationWriter;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeSet;
use tokio::sync::mpsc;
use tracing::warn;

/// A single column as reported by the source catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    /// Canonical lowercase name used for comparison
    pub name: String,
    /// Name exactly as stored in the catalog, used for quoting
    pub original_name: String,
    pub native_type: String,
    pub length: Option<i32>,
    pub precision: Option<i32>,
    pub scale: Option<i32>,
    pub nullable: bool,
    pub default_expr: Option<String>,
    pub ordinal: i32,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, native_type: impl Into<String>, ordinal: i32) -> Self {
        let original_name = name.into();
        Self {
            name: original_name.to_lowercase(),
            original_name,
            native_type: native_type.into(),
            length: None,
            precision: None,
            scale: None,
            nullable: true,
            default_expr: None,
            ordinal,
        }
    }

    pub fn with_length(mut self, length: Option<i32>) -> Self {
        self.length = length.filter(|l| *l > 0);
        self
    }

    pub fn with_precision(mut self, precision: Option<i32>, scale: Option<i32>) -> Self {
        self.precision = precision;
        self.scale = scale;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn not_null(self) -> Self {
        self.nullable(false)
    }

    pub fn with_default(mut self, default_expr: Option<String>) -> Self {
        self.default_expr = default_expr
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        self
    }
}

/// A table with its ordered columns and primary key
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDescriptor {
    schema: String,
    name: String,
    columns: Vec<ColumnDescriptor>,
    primary_keys: BTreeSet<String>,
}

impl TableDescriptor {
    /// Build a descriptor. Columns are ordered by ordinal position and
    /// primary-key names that do not name a column are dropped.
    pub fn new(
        schema: impl Into<String>,
        name: impl Into<String>,
        mut columns: Vec<ColumnDescriptor>,
        primary_keys: impl IntoIterator<Item = String>,
    ) -> Self {
        let schema = schema.into();
        let name = name.into();
        columns.sort_by_key(|c| c.ordinal);

        let mut keys = BTreeSet::new();
        for key in primary_keys {
            let key = key.to_lowercase();
            if columns.iter().any(|c| c.name == key) {
                keys.insert(key);
            } else {
                warn!("Primary key column {} not found in {}.{}, ignoring", key, schema, name);
            }
        }

        Self {
            schema,
            name,
            columns,
            primary_keys: keys,
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        let name = name.to_lowercase();
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_keys(&self) -> &BTreeSet<String> {
        &self.primary_keys
    }

    pub fn is_primary_key(&self, column: &str) -> bool {
        self.primary_keys.contains(&column.to_lowercase())
    }
}

/// Parameters of a sequence generator; `None` means engine default
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceDescriptor {
    pub name: String,
    pub increment: Option<i64>,
    pub min_value: Option<i64>,
    pub max_value: Option<i64>,
    pub start: Option<i64>,
    pub cache: Option<i64>,
}

/// A column whose default draws from a sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceDefault {
    pub column: String,
    pub sequence: SequenceRef,
}

/// Read access to a catalog
#[async_trait]
pub trait SchemaIntrospector: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Table names in a schema, as stored in the catalog
    async fn list_tables(&self, schema: &str) -> MigrationResult<Vec<String>>;

    /// Columns in ordinal order; empty when the table does not exist
    async fn list_columns(&self, schema: &str, table: &str) -> MigrationResult<Vec<ColumnDescriptor>>;

    async fn list_primary_keys(&self, schema: &str, table: &str) -> MigrationResult<Vec<String>>;

    async fn sequence_metadata(&self, schema: &str, name: &str) -> MigrationResult<SequenceDescriptor>;

    async fn count_rows(&self, schema: &str, table: &str) -> MigrationResult<i64>;

    /// Columns whose default expression references a sequence generator
    async fn list_sequence_defaults(&self, schema: &str, table: &str) -> MigrationResult<Vec<SequenceDefault>> {
        let columns = self.list_columns(schema, table).await?;
        Ok(sequence_defaults(&columns))
    }

    /// Columns plus primary key, failing when the table has no columns
    async fn describe_table(&self, schema: &str, table: &str) -> MigrationResult<TableDescriptor> {
        let qualified = format!("{}.{}", schema, table);
        let columns = self
            .list_columns(schema, table)
            .await
            .map_err(|e| MigrationError::introspection(&qualified, e))?;
        if columns.is_empty() {
            return Err(MigrationError::introspection(
                &qualified,
                "table does not exist or has no visible columns",
            ));
        }
        let keys = self
            .list_primary_keys(schema, table)
            .await
            .map_err(|e| MigrationError::introspection(&qualified, e))?;
        Ok(TableDescriptor::new(schema, table, columns, keys))
    }
}

/// Filter columns down to the ones backed by a sequence
pub fn sequence_defaults(columns: &[ColumnDescriptor]) -> Vec<SequenceDefault> {
    columns
        .iter()
        .filter_map(|c| {
            let expr = c.default_expr.as_deref()?;
            parse_sequence_ref(expr).map(|sequence| SequenceDefault {
                column: c.name.clone(),
                sequence,
            })
        })
        .collect()
}

/// Batches of rows read from a source table
pub type RowBatches = mpsc::Receiver<MigrationResult<Vec<Row>>>;

/// Streaming read access to table data
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Stream `columns` of `table` in batches of at most `batch_size` rows.
    /// Values are ordered like `columns`.
    async fn read_rows(
        &self,
        table: &TableDescriptor,
        columns: &[ColumnDescriptor],
        batch_size: usize,
    ) -> MigrationResult<RowBatches>;
}

/// Everything a run needs from its source
pub trait SourceDatabase: SchemaIntrospector + RowSource {
    fn as_introspector(&self) -> &dyn SchemaIntrospector;
    fn as_row_source(&self) -> &dyn RowSource;
}

impl<T: SchemaIntrospector + RowSource> SourceDatabase for T {
    fn as_introspector(&self) -> &dyn SchemaIntrospector {
        self
    }

    fn as_row_source(&self) -> &dyn RowSource {
        self
    }
}

/// Everything a run needs from its destination
pub trait DestinationDatabase: SchemaIntrospector + DestinationWriter {
    fn as_writer(&self) -> &dyn DestinationWriter;
}

impl<T: SchemaIntrospector + DestinationWriter> DestinationDatabase for T {
    fn as_writer(&self) -> &dyn DestinationWriter {
        self
    }
}
