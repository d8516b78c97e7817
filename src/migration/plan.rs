//! Per-table plan: which source columns go where, as what type.

use crate::connection::Dialect;
use crate::error::MigrationWarning;
use crate::introspection::{ColumnDescriptor, TableDescriptor};
use crate::migration::reconcile::Reconciliation;
use crate::migration::sequence::SequenceResolution;
use crate::migration::typemap::{map_column, value_kind, MappedType, ValueKind};
use tracing::warn;

/// Column names treated as boolean-like flags regardless of type
const FLAG_COLUMN_NAMES: &[&str] = &["status"];

/// One destination column and the source column feeding it
#[derive(Debug, Clone)]
pub struct ColumnPlan {
    pub source: ColumnDescriptor,
    pub dest_name: String,
    pub mapped: MappedType,
    pub kind: ValueKind,
    pub primary_key: bool,
    /// Set once the backing sequence exists at the destination
    pub sequence: Option<SequenceResolution>,
    pub flag: bool,
}

/// Everything needed to create and fill one destination table
#[derive(Debug, Clone)]
pub struct TablePlan {
    pub dialect: Dialect,
    pub source: TableDescriptor,
    pub dest_schema: String,
    pub dest_table: String,
    pub columns: Vec<ColumnPlan>,
}

impl TablePlan {
    /// Build from a reconciliation. Returns the plan and the type-mapping warnings.
    pub fn build(
        dialect: Dialect,
        source: &TableDescriptor,
        dest_schema: &str,
        reconciliation: &Reconciliation,
    ) -> (Self, Vec<MigrationWarning>) {
        let mut warnings = Vec::new();
        let mut columns = Vec::with_capacity(reconciliation.matches.len());

        for matched in &reconciliation.matches {
            let Some(column) = source.column(&matched.source) else {
                continue;
            };
            let mapped = map_column(dialect, column);
            if mapped.fallback {
                warn!(
                    "{}.{}: no mapping for {}, using {}",
                    source.qualified_name(),
                    matched.dest,
                    column.native_type,
                    mapped.expression
                );
                warnings.push(MigrationWarning::TypeMapping {
                    column: matched.dest.clone(),
                    native_type: column.native_type.clone(),
                });
            }
            let flag = mapped.expression == "BOOLEAN"
                || FLAG_COLUMN_NAMES.contains(&matched.dest.to_lowercase().as_str())
                || FLAG_COLUMN_NAMES.contains(&column.name.as_str());

            columns.push(ColumnPlan {
                source: column.clone(),
                dest_name: matched.dest.clone(),
                kind: value_kind(dialect, column),
                primary_key: source.is_primary_key(&column.name),
                mapped,
                sequence: None,
                flag,
            });
        }

        let plan = Self {
            dialect,
            source: source.clone(),
            dest_schema: dest_schema.to_string(),
            dest_table: source.name().to_lowercase(),
            columns,
        };
        (plan, warnings)
    }

    pub fn dest_qualified(&self) -> String {
        format!("{}.{}", self.dest_schema, self.dest_table)
    }

    pub fn source_columns(&self) -> Vec<ColumnDescriptor> {
        self.columns.iter().map(|c| c.source.clone()).collect()
    }

    pub fn dest_columns(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.dest_name.clone()).collect()
    }
}
