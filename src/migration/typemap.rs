//! Native type to PostgreSQL type mapping.
//!
//! Pure lookups keyed on the base type name (modifiers stripped, upper
//! case). Unknown types never fail: they map to `TEXT` and the caller records
//! a warning.

use crate::connection::Dialect;
use crate::introspection::ColumnDescriptor;
use serde::Serialize;

/// Destination type used when no mapping exists
pub const FALLBACK_TYPE: &str = "TEXT";

/// How values of a column are decoded at the source and rendered at the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Integer,
    Decimal,
    Float,
    Boolean,
    Text,
    Binary,
    Timestamp,
    TimestampTz,
    Date,
    Time,
}

/// Result of mapping a native type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappedType {
    /// Full destination type expression, e.g. `VARCHAR(50)`
    pub expression: String,
    /// True when the native type was unknown and `TEXT` was substituted
    pub fallback: bool,
}

/// Strip parenthesized modifiers, collapse whitespace and upper-case.
///
/// `TIMESTAMP(6) WITH TIME ZONE` becomes `TIMESTAMP WITH TIME ZONE`.
pub fn base_type_name(native: &str) -> String {
    let mut stripped = String::with_capacity(native.len());
    let mut depth = 0usize;
    for ch in native.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => stripped.push(ch),
            _ => {}
        }
    }
    stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

fn oracle_base(base: &str) -> Option<&'static str> {
    let mapped = match base {
        "VARCHAR2" | "NVARCHAR2" | "VARCHAR" => "VARCHAR",
        "CHAR" | "NCHAR" => "CHAR",
        "NUMBER" | "NUMERIC" | "DECIMAL" => "NUMERIC",
        "FLOAT" | "BINARY_DOUBLE" | "DOUBLE PRECISION" => "DOUBLE PRECISION",
        "BINARY_FLOAT" | "REAL" => "REAL",
        "INTEGER" | "INT" => "INTEGER",
        "SMALLINT" => "SMALLINT",
        "DATE" | "TIMESTAMP" => "TIMESTAMP",
        "TIMESTAMP WITH TIME ZONE" | "TIMESTAMP WITH LOCAL TIME ZONE" => "TIMESTAMPTZ",
        "INTERVAL DAY TO SECOND" | "INTERVAL YEAR TO MONTH" => "INTERVAL",
        "CLOB" | "NCLOB" | "LONG" | "BFILE" | "ROWID" | "UROWID" => "TEXT",
        "BLOB" | "RAW" | "LONG RAW" => "BYTEA",
        "XMLTYPE" => "XML",
        "JSON" => "JSON",
        _ => return None,
    };
    Some(mapped)
}

fn postgres_base(base: &str) -> Option<&'static str> {
    let mapped = match base {
        "CHARACTER VARYING" | "VARCHAR" => "VARCHAR",
        "CHARACTER" | "CHAR" | "BPCHAR" => "CHAR",
        "TEXT" | "NAME" | "CITEXT" => "TEXT",
        "NUMERIC" | "DECIMAL" => "NUMERIC",
        "SMALLINT" | "INT2" => "SMALLINT",
        "INTEGER" | "INT" | "INT4" => "INTEGER",
        "BIGINT" | "INT8" => "BIGINT",
        "REAL" | "FLOAT4" => "REAL",
        "DOUBLE PRECISION" | "FLOAT8" => "DOUBLE PRECISION",
        "BOOLEAN" | "BOOL" => "BOOLEAN",
        "BYTEA" => "BYTEA",
        "DATE" => "DATE",
        "TIMESTAMP WITHOUT TIME ZONE" | "TIMESTAMP" => "TIMESTAMP",
        "TIMESTAMP WITH TIME ZONE" | "TIMESTAMPTZ" => "TIMESTAMPTZ",
        "TIME WITHOUT TIME ZONE" | "TIME" => "TIME",
        "TIME WITH TIME ZONE" | "TIMETZ" => "TIMETZ",
        "INTERVAL" => "INTERVAL",
        "UUID" => "UUID",
        "JSON" => "JSON",
        "JSONB" => "JSONB",
        "XML" => "XML",
        "MONEY" => "MONEY",
        "INET" => "INET",
        "CIDR" => "CIDR",
        "MACADDR" => "MACADDR",
        "OID" => "OID",
        _ => return None,
    };
    Some(mapped)
}

/// Map a native type to a destination type expression
pub fn map_type(
    dialect: Dialect,
    native: &str,
    length: Option<i32>,
    precision: Option<i32>,
    scale: Option<i32>,
) -> MappedType {
    let base = base_type_name(native);
    let mapped = match dialect {
        Dialect::Oracle => oracle_base(&base),
        Dialect::Postgres => postgres_base(&base),
    };

    match mapped {
        Some(dest) => MappedType {
            expression: with_modifiers(dest, length, precision, scale),
            fallback: false,
        },
        None => MappedType {
            expression: FALLBACK_TYPE.to_string(),
            fallback: true,
        },
    }
}

/// Map a described column
pub fn map_column(dialect: Dialect, column: &ColumnDescriptor) -> MappedType {
    map_type(
        dialect,
        &column.native_type,
        column.length,
        column.precision,
        column.scale,
    )
}

/// Append length / precision suffixes the destination type accepts
fn with_modifiers(dest: &str, length: Option<i32>, precision: Option<i32>, scale: Option<i32>) -> String {
    match dest {
        "VARCHAR" | "CHAR" => match length.filter(|l| *l > 0) {
            Some(len) => format!("{}({})", dest, len),
            None => dest.to_string(),
        },
        // PostgreSQL caps numeric precision at 1000
        "NUMERIC" => match precision.filter(|p| (1..=1000).contains(p)) {
            Some(p) => match scale.filter(|s| *s > 0 && *s <= p) {
                Some(s) => format!("NUMERIC({},{})", p, s),
                None => format!("NUMERIC({})", p),
            },
            None => dest.to_string(),
        },
        _ => dest.to_string(),
    }
}

/// Decide how a column's values travel through the copier
pub fn value_kind(dialect: Dialect, column: &ColumnDescriptor) -> ValueKind {
    let base = base_type_name(&column.native_type);
    match dialect {
        Dialect::Oracle => match base.as_str() {
            "NUMBER" | "NUMERIC" | "DECIMAL" => {
                if column.scale == Some(0) && column.precision.is_some_and(|p| p <= 18) {
                    ValueKind::Integer
                } else {
                    ValueKind::Decimal
                }
            }
            "INTEGER" | "INT" | "SMALLINT" => ValueKind::Decimal,
            "FLOAT" | "BINARY_FLOAT" | "BINARY_DOUBLE" | "REAL" | "DOUBLE PRECISION" => ValueKind::Float,
            "DATE" | "TIMESTAMP" => ValueKind::Timestamp,
            "TIMESTAMP WITH TIME ZONE" | "TIMESTAMP WITH LOCAL TIME ZONE" => ValueKind::TimestampTz,
            "BLOB" | "RAW" | "LONG RAW" => ValueKind::Binary,
            _ => ValueKind::Text,
        },
        Dialect::Postgres => match base.as_str() {
            "SMALLINT" | "INT2" | "INTEGER" | "INT" | "INT4" | "BIGINT" | "INT8" => ValueKind::Integer,
            "NUMERIC" | "DECIMAL" => ValueKind::Decimal,
            "REAL" | "FLOAT4" | "DOUBLE PRECISION" | "FLOAT8" => ValueKind::Float,
            "BOOLEAN" | "BOOL" => ValueKind::Boolean,
            "BYTEA" => ValueKind::Binary,
            "TIMESTAMP WITHOUT TIME ZONE" | "TIMESTAMP" => ValueKind::Timestamp,
            "TIMESTAMP WITH TIME ZONE" | "TIMESTAMPTZ" => ValueKind::TimestampTz,
            "DATE" => ValueKind::Date,
            "TIME WITHOUT TIME ZONE" | "TIME" => ValueKind::Time,
            _ => ValueKind::Text,
        },
    }
}

/// Auto-increment pseudo-type for an integer-family column, `None` otherwise
pub fn serial_type(dialect: Dialect, column: &ColumnDescriptor) -> Option<&'static str> {
    let base = base_type_name(&column.native_type);
    match dialect {
        Dialect::Postgres => match base.as_str() {
            "SMALLINT" | "INT2" => Some("SMALLSERIAL"),
            "INTEGER" | "INT" | "INT4" => Some("SERIAL"),
            "BIGINT" | "INT8" => Some("BIGSERIAL"),
            _ => None,
        },
        Dialect::Oracle => match base.as_str() {
            "SMALLINT" => Some("SMALLSERIAL"),
            "INTEGER" | "INT" => Some("BIGSERIAL"),
            "NUMBER" | "NUMERIC" | "DECIMAL" if column.scale == Some(0) => match column.precision {
                Some(p) if p <= 9 => Some("SERIAL"),
                _ => Some("BIGSERIAL"),
            },
            _ => None,
        },
    }
}
