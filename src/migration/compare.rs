//! Side-by-side comparison of a source schema and a destination schema.

use crate::connection::Dialect;
use crate::error::MigrationResult;
use crate::introspection::{ColumnDescriptor, SchemaIntrospector};
use crate::migration::typemap::base_type_name;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Comparison of one table present on both sides
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableComparison {
    pub table: String,
    pub source_rows: Option<i64>,
    pub destination_rows: Option<i64>,
    pub rows_match: bool,
    pub equal_columns: usize,
    pub different_columns: usize,
    pub source_only_columns: usize,
    pub destination_only_columns: usize,
    pub identical: bool,
    pub details: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonReport {
    pub source_schema: String,
    pub destination_schema: String,
    pub tables: Vec<TableComparison>,
    pub source_only_tables: Vec<String>,
    pub destination_only_tables: Vec<String>,
}

/// Type name used for comparison, so equivalent spellings across engines match
pub fn normalize_type(dialect: Dialect, native: &str) -> String {
    let base = base_type_name(native);
    let normalized = match base.as_str() {
        "VARCHAR2" | "NVARCHAR2" | "VARCHAR" | "CHARACTER VARYING" => "character varying",
        "CHAR" | "NCHAR" | "CHARACTER" | "BPCHAR" => "character",
        "NUMBER" | "NUMERIC" | "DECIMAL" => "numeric",
        "CLOB" | "NCLOB" | "LONG" | "TEXT" => "text",
        "BLOB" | "RAW" | "LONG RAW" | "BYTEA" => "bytea",
        "DATE" if dialect == Dialect::Oracle => "timestamp",
        "TIMESTAMP" | "TIMESTAMP WITHOUT TIME ZONE" => "timestamp",
        "TIMESTAMP WITH TIME ZONE" | "TIMESTAMP WITH LOCAL TIME ZONE" | "TIMESTAMPTZ" => "timestamptz",
        "INTEGER" | "INT" | "INT4" => "integer",
        "BIGINT" | "INT8" => "bigint",
        "SMALLINT" | "INT2" => "smallint",
        "FLOAT" | "BINARY_DOUBLE" | "DOUBLE PRECISION" | "FLOAT8" => "double precision",
        "BINARY_FLOAT" | "REAL" | "FLOAT4" => "real",
        "BOOLEAN" | "BOOL" => "boolean",
        other => return other.to_lowercase(),
    };
    normalized.to_string()
}

fn by_lowercase_name(names: Vec<String>) -> BTreeMap<String, String> {
    names.into_iter().map(|n| (n.to_lowercase(), n)).collect()
}

fn compare_columns(
    source_dialect: Dialect,
    dest_dialect: Dialect,
    source: &[ColumnDescriptor],
    dest: &[ColumnDescriptor],
    result: &mut TableComparison,
) {
    let dest_by_name: BTreeMap<&str, &ColumnDescriptor> = dest.iter().map(|c| (c.name.as_str(), c)).collect();

    for column in source {
        let Some(other) = dest_by_name.get(column.name.as_str()) else {
            result.source_only_columns += 1;
            result.details.push(format!("column {} only in source", column.name));
            continue;
        };

        let source_type = normalize_type(source_dialect, &column.native_type);
        let dest_type = normalize_type(dest_dialect, &other.native_type);
        let mut differences = Vec::new();
        if source_type != dest_type {
            differences.push(format!("type {} vs {}", source_type, dest_type));
        }
        if column.nullable != other.nullable {
            differences.push(format!("nullable {} vs {}", column.nullable, other.nullable));
        }

        if differences.is_empty() {
            result.equal_columns += 1;
        } else {
            result.different_columns += 1;
            result.details.push(format!("column {}: {}", column.name, differences.join(", ")));
        }
    }

    for column in dest {
        if !source.iter().any(|c| c.name == column.name) {
            result.destination_only_columns += 1;
            result.details.push(format!("column {} only in destination", column.name));
        }
    }
}

async fn count(side: &dyn SchemaIntrospector, schema: &str, table: &str, details: &mut Vec<String>) -> Option<i64> {
    match side.count_rows(schema, table).await {
        Ok(n) => Some(n),
        Err(e) => {
            warn!("Row count of {}.{} failed: {}", schema, table, e);
            details.push(format!("row count of {}.{} failed: {}", schema, table, e));
            None
        }
    }
}

/// Compare every table of `source_schema` with its namesake in `dest_schema`
pub async fn compare_schemas(
    source: &dyn SchemaIntrospector,
    dest: &dyn SchemaIntrospector,
    source_schema: &str,
    dest_schema: &str,
) -> MigrationResult<ComparisonReport> {
    let source_tables = by_lowercase_name(source.list_tables(source_schema).await?);
    let dest_tables = by_lowercase_name(dest.list_tables(dest_schema).await?);
    debug!(
        "Comparing {} source table(s) with {} destination table(s)",
        source_tables.len(),
        dest_tables.len()
    );

    let mut report = ComparisonReport {
        source_schema: source_schema.to_string(),
        destination_schema: dest_schema.to_string(),
        tables: Vec::new(),
        source_only_tables: source_tables
            .keys()
            .filter(|k| !dest_tables.contains_key(*k))
            .cloned()
            .collect(),
        destination_only_tables: dest_tables
            .keys()
            .filter(|k| !source_tables.contains_key(*k))
            .cloned()
            .collect(),
    };

    for (key, source_name) in &source_tables {
        let Some(dest_name) = dest_tables.get(key) else {
            continue;
        };
        let mut result = TableComparison {
            table: key.clone(),
            ..Default::default()
        };

        let source_columns = source.list_columns(source_schema, source_name).await?;
        let dest_columns = dest.list_columns(dest_schema, dest_name).await?;
        compare_columns(source.dialect(), dest.dialect(), &source_columns, &dest_columns, &mut result);

        result.source_rows = count(source, source_schema, source_name, &mut result.details).await;
        result.destination_rows = count(dest, dest_schema, dest_name, &mut result.details).await;
        result.rows_match = result.source_rows.is_some() && result.source_rows == result.destination_rows;
        if !result.rows_match {
            if let (Some(s), Some(d)) = (result.source_rows, result.destination_rows) {
                result.details.push(format!("row count {} vs {}", s, d));
            }
        }

        result.identical = result.rows_match
            && result.different_columns == 0
            && result.source_only_columns == 0
            && result.destination_only_columns == 0;
        report.tables.push(result);
    }

    Ok(report)
}
