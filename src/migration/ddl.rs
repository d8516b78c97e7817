//! CREATE TABLE generation.

use crate::connection::Dialect;
use crate::error::MigrationWarning;
use crate::migration::plan::{ColumnPlan, TablePlan};
use crate::migration::sequence::parse_sequence_ref;
use crate::migration::typemap::serial_type;
use crate::migration::writer::{qualify, quote_ident};
use once_cell::sync::Lazy;
use regex::Regex;

static LITERAL_DEFAULT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+)?|'([^']|'')*')$").expect("default literal pattern is valid")
});

/// A fully resolved destination column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub type_expr: String,
    pub nullable: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub default: Option<String>,
}

/// Statements for one table, plus warnings raised while building them
#[derive(Debug, Clone)]
pub struct TableDdl {
    pub create_table: String,
    pub warnings: Vec<MigrationWarning>,
}

/// Carry a source default over to the destination, if it can be
pub fn translate_default(dialect: Dialect, column: &str, expr: &str) -> Result<Option<String>, MigrationWarning> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Ok(None);
    }
    match dialect {
        Dialect::Postgres => Ok(Some(expr.to_string())),
        Dialect::Oracle => match expr.to_uppercase().as_str() {
            "NULL" => Ok(None),
            "SYSDATE" | "SYSTIMESTAMP" | "CURRENT_TIMESTAMP" | "CURRENT_DATE" | "LOCALTIMESTAMP" => {
                Ok(Some("CURRENT_TIMESTAMP".to_string()))
            }
            _ if LITERAL_DEFAULT.is_match(expr) => Ok(Some(expr.to_string())),
            _ => Err(MigrationWarning::DefaultDropped {
                column: column.to_string(),
                expression: expr.to_string(),
            }),
        },
    }
}

/// Resolve one planned column into its definition
pub fn column_spec(dialect: Dialect, plan: &ColumnPlan) -> (ColumnSpec, Option<MigrationWarning>) {
    let mut spec = ColumnSpec {
        name: plan.dest_name.clone(),
        type_expr: plan.mapped.expression.clone(),
        nullable: plan.source.nullable,
        primary_key: plan.primary_key,
        auto_increment: false,
        default: None,
    };

    if let Some(sequence) = plan.sequence.as_ref().filter(|s| s.outcome.is_resolved()) {
        match serial_type(dialect, &plan.source) {
            Some(serial) => {
                spec.type_expr = serial.to_string();
                spec.auto_increment = true;
            }
            None => spec.default = Some(sequence.nextval_expr()),
        }
        return (spec, None);
    }

    let mut warning = None;
    if let Some(expr) = plan.source.default_expr.as_deref() {
        // Unresolved sequence defaults would point at a missing object
        if parse_sequence_ref(expr).is_none() {
            match translate_default(dialect, &plan.dest_name, expr) {
                Ok(default) => spec.default = default,
                Err(w) => warning = Some(w),
            }
        }
    }
    (spec, warning)
}

/// `"name" TYPE [DEFAULT ..] [NOT NULL] [PRIMARY KEY]`
pub fn column_definition(spec: &ColumnSpec, inline_primary_key: bool) -> String {
    let mut def = format!("{} {}", quote_ident(&spec.name), spec.type_expr);
    if let Some(default) = &spec.default {
        def.push_str(" DEFAULT ");
        def.push_str(default);
    }
    if !spec.nullable && !spec.auto_increment {
        def.push_str(" NOT NULL");
    }
    if spec.primary_key && inline_primary_key {
        def.push_str(" PRIMARY KEY");
    }
    def
}

pub fn create_schema_sql(schema: &str) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema))
}

/// `CREATE TABLE IF NOT EXISTS`; a composite key becomes a table constraint
pub fn create_table_sql(schema: &str, table: &str, specs: &[ColumnSpec]) -> String {
    let key_columns: Vec<&ColumnSpec> = specs.iter().filter(|s| s.primary_key).collect();
    let inline_key = key_columns.len() == 1;

    let mut lines: Vec<String> = specs
        .iter()
        .map(|spec| format!("    {}", column_definition(spec, inline_key)))
        .collect();

    if key_columns.len() > 1 {
        let cols = key_columns
            .iter()
            .map(|s| quote_ident(&s.name))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("    PRIMARY KEY ({})", cols));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
        qualify(schema, table),
        lines.join(",\n")
    )
}

/// Generate the DDL for a planned table
pub fn generate(plan: &TablePlan) -> TableDdl {
    let mut warnings = Vec::new();
    let specs: Vec<ColumnSpec> = plan
        .columns
        .iter()
        .map(|column| {
            let (spec, warning) = column_spec(plan.dialect, column);
            warnings.extend(warning);
            spec
        })
        .collect();

    TableDdl {
        create_table: create_table_sql(&plan.dest_schema, &plan.dest_table, &specs),
        warnings,
    }
}
