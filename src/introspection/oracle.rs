//! Oracle source over ODBC.
//!
//! odbc-api is synchronous, so each endpoint owns one worker thread holding a
//! single connection. Catalog queries and row reads are queued to it and run
//! one at a time. Values are fetched as text; numbers and timestamps are
//! rendered by Oracle in fixed formats and parsed back by value kind. Tables
//! with LOB columns are read row by row so no value is cut short.

use super::{ColumnDescriptor, RowBatches, RowSource, SchemaIntrospector, SequenceDescriptor, TableDescriptor};
use crate::config::MigrationSettings;
use crate::connection::{ConnectionParams, Dialect};
use crate::error::{MigrationError, MigrationResult};
use crate::migration::typemap::{base_type_name, value_kind, ValueKind};
use crate::migration::value::{parse_text_value, Row, Value};
use crate::migration::writer::{escape_literal, qualify, quote_ident};
use async_trait::async_trait;
use odbc_api::buffers::{Indicator, TextRowSet};
use odbc_api::{Connection, ConnectionOptions, Cursor, Environment};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

/// Rows fetched per round trip for catalog queries
const CATALOG_FETCH_ROWS: usize = 256;

/// Buffer size for a single text value on the bulk path
const MAX_VALUE_BYTES: usize = 32 * 1024;

/// Requests waiting for the connection worker
const JOB_QUEUE: usize = 16;

/// Types read through the row-by-row long data path
const LONG_DATA_TYPES: &[&str] = &["CLOB", "NCLOB", "BLOB", "LONG", "LONG RAW"];

type TextRows = Vec<Vec<Option<String>>>;

type Job = Box<dyn for<'c> FnOnce(&Connection<'c>) + Send>;

pub struct OracleEndpoint {
    jobs: mpsc::Sender<Job>,
    channel_capacity: usize,
}

impl OracleEndpoint {
    pub async fn connect(params: &ConnectionParams, settings: &MigrationSettings) -> MigrationResult<Self> {
        let label = params.to_display_string();
        let connection_string = params.odbc_connection_string(&settings.odbc_driver);
        debug!(
            "ODBC connection (credentials hidden): Driver={{{}}};DBQ={}:{}/{}",
            settings.odbc_driver, params.host, params.port, params.database
        );

        let (jobs, job_rx) = mpsc::channel::<Job>(JOB_QUEUE);
        let (ready_tx, ready_rx) = oneshot::channel();
        std::thread::Builder::new()
            .name("oracle-odbc".to_string())
            .spawn(move || run_worker(&connection_string, ready_tx, job_rx))
            .map_err(|e| MigrationError::connection(&label, format!("ODBC worker failed to start: {}", e)))?;

        match tokio::time::timeout(settings.connect_timeout(), ready_rx).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => return Err(MigrationError::connection(&label, e)),
            Ok(Err(_)) => return Err(MigrationError::connection(&label, "ODBC worker exited before connecting")),
            Err(_) => {
                return Err(MigrationError::connection(
                    &label,
                    format!("timed out after {}s", settings.connect_timeout_secs),
                ))
            }
        }

        info!("🔶 Oracle connection ready: {}", label);
        Ok(Self {
            jobs,
            channel_capacity: settings.channel_capacity,
        })
    }

    pub async fn server_version(&self) -> MigrationResult<String> {
        let rows = self.query("SELECT banner FROM v$version".to_string()).await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|r| r.into_iter().next().flatten())
            .unwrap_or_else(|| "Oracle".to_string()))
    }

    /// Queue `job` behind whatever the connection is currently doing
    async fn submit(&self, job: Job) -> MigrationResult<()> {
        self.jobs
            .send(job)
            .await
            .map_err(|_| MigrationError::SourceRead("ODBC worker has stopped".to_string()))
    }

    async fn query(&self, sql: String) -> MigrationResult<TextRows> {
        debug!("Oracle catalog query: {}", sql);
        let (tx, rx) = oneshot::channel();
        self.submit(Box::new(move |conn: &Connection<'_>| {
            let _ = tx.send(fetch_text(conn, &sql));
        }))
        .await?;
        rx.await
            .map_err(|_| MigrationError::SourceRead("ODBC worker dropped the query".to_string()))?
    }
}

/// Open the endpoint's connection, report readiness, then serve jobs until
/// the endpoint is dropped
fn run_worker(
    connection_string: &str,
    ready: oneshot::Sender<Result<(), odbc_api::Error>>,
    mut jobs: mpsc::Receiver<Job>,
) {
    let env = match Environment::new() {
        Ok(env) => env,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let conn = match env.connect_with_connection_string(connection_string, ConnectionOptions::default()) {
        Ok(conn) => conn,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if let Err(e) = conn.execute("SELECT 1 FROM DUAL", ()) {
        let _ = ready.send(Err(e));
        return;
    }
    if ready.send(Ok(())).is_err() {
        debug!("Connect timed out before the ODBC worker was ready");
        return;
    }

    while let Some(job) = jobs.blocking_recv() {
        job(&conn);
    }
    debug!("ODBC worker stopped");
}

/// Run a query and collect every row as text
fn fetch_text(conn: &Connection<'_>, sql: &str) -> MigrationResult<TextRows> {
    let mut rows = Vec::new();
    if let Some(mut cursor) = conn.execute(sql, ())? {
        let mut buffers = TextRowSet::for_cursor(CATALOG_FETCH_ROWS, &mut cursor, Some(MAX_VALUE_BYTES))?;
        let mut row_cursor = cursor.bind_buffer(&mut buffers)?;
        while let Some(batch) = row_cursor.fetch()? {
            for row in 0..batch.num_rows() {
                rows.push(
                    (0..batch.num_cols())
                        .map(|col| batch.at(col, row).map(|b| String::from_utf8_lossy(b).into_owned()))
                        .collect(),
                );
            }
        }
    }
    Ok(rows)
}


/// Name as stored in the data dictionary: plain identifiers are upper case,
/// quoted ones are kept verbatim.
fn catalog_name(name: &str) -> String {
    let trimmed = name.trim();
    if let Some(inner) = trimmed.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        return inner.to_string();
    }
    let simple = trimmed.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && trimmed.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '#'));
    if simple {
        trimmed.to_uppercase()
    } else {
        trimmed.to_string()
    }
}

fn literal(name: &str) -> String {
    format!("'{}'", escape_literal(&catalog_name(name)))
}

fn oracle_table(schema: &str, table: &str) -> String {
    qualify(&catalog_name(schema), &catalog_name(table))
}

fn text(row: &[Option<String>], idx: usize) -> Option<&str> {
    row.get(idx).and_then(|v| v.as_deref()).map(str::trim)
}

fn int<T: std::str::FromStr>(row: &[Option<String>], idx: usize) -> Option<T> {
    text(row, idx).and_then(|v| v.parse().ok())
}

/// One ALL_TAB_COLUMNS row
fn column_from_row(row: &[Option<String>]) -> ColumnDescriptor {
    let column = ColumnDescriptor::new(
        text(row, 0).unwrap_or_default(),
        text(row, 1).unwrap_or_default(),
        int(row, 7).unwrap_or(0),
    )
    .with_length(int(row, 2))
    .with_precision(int(row, 3), int(row, 4))
    .with_default(text(row, 6).map(str::to_string));

    // NULLABLE is 'Y' or 'N'
    match text(row, 5) {
        Some("N") => column.not_null(),
        _ => column,
    }
}

/// Column expression rendering the value as parseable text
fn select_expression(column: &ColumnDescriptor, kind: ValueKind) -> String {
    let col = quote_ident(&column.original_name);
    match kind {
        ValueKind::Integer | ValueKind::Decimal | ValueKind::Float => {
            format!("TO_CHAR({}, 'TM9', 'NLS_NUMERIC_CHARACTERS=''.,''')", col)
        }
        ValueKind::Timestamp if base_type_name(&column.native_type) == "DATE" => {
            format!("TO_CHAR({}, 'YYYY-MM-DD HH24:MI:SS')", col)
        }
        ValueKind::Timestamp => format!("TO_CHAR({}, 'YYYY-MM-DD HH24:MI:SS.FF6')", col),
        ValueKind::TimestampTz => format!(
            "TO_CHAR(SYS_EXTRACT_UTC(CAST({} AS TIMESTAMP WITH TIME ZONE)), 'YYYY-MM-DD HH24:MI:SS.FF6') || ' +00:00'",
            col
        ),
        // Binary arrives as hex when bound to a character buffer
        _ => col,
    }
}

fn select_sql(table: &TableDescriptor, columns: &[ColumnDescriptor], kinds: &[ValueKind]) -> String {
    let list = columns
        .iter()
        .zip(kinds)
        .map(|(c, k)| select_expression(c, *k))
        .collect::<Vec<_>>()
        .join(", ");
    format!("SELECT {} FROM {}", list, oracle_table(table.schema(), table.name()))
}

fn is_long_data(column: &ColumnDescriptor) -> bool {
    LONG_DATA_TYPES.contains(&base_type_name(&column.native_type).as_str())
}

/// Decode one cell of a bound text buffer. A value longer than the buffer
/// becomes garbled instead of failing the whole batch.
fn bounded_value(raw: Option<&[u8]>, indicator: Indicator, capacity: usize, kind: ValueKind) -> Value {
    match indicator {
        Indicator::Null => Value::Null,
        Indicator::NoTotal => Value::Garbled(format!("value exceeds {} bytes", capacity)),
        Indicator::Length(len) if len > capacity => {
            Value::Garbled(format!("value of {} bytes exceeds {} bytes", len, capacity))
        }
        Indicator::Length(_) => {
            let text = raw.map(String::from_utf8_lossy);
            parse_text_value(text.as_deref(), kind)
        }
    }
}

fn send_batch(tx: &mpsc::Sender<MigrationResult<Vec<Row>>>, rows: Vec<Row>) -> bool {
    if tx.blocking_send(Ok(rows)).is_err() {
        debug!("Row receiver dropped, stopping read");
        return false;
    }
    true
}

fn stream_rows(
    conn: &Connection<'_>,
    sql: &str,
    kinds: &[ValueKind],
    batch_size: usize,
    tx: &mpsc::Sender<MigrationResult<Vec<Row>>>,
) -> MigrationResult<()> {
    let Some(mut cursor) = conn.execute(sql, ())? else {
        return Ok(());
    };
    let mut buffers = TextRowSet::for_cursor(batch_size, &mut cursor, Some(MAX_VALUE_BYTES))?;
    let mut row_cursor = cursor.bind_buffer(&mut buffers)?;

    while let Some(batch) = row_cursor.fetch()? {
        let rows: Vec<Row> = (0..batch.num_rows())
            .map(|row| {
                kinds
                    .iter()
                    .enumerate()
                    .map(|(col, kind)| {
                        bounded_value(batch.at(col, row), batch.indicator_at(col, row), batch.max_len(col), *kind)
                    })
                    .collect()
            })
            .collect();
        if !send_batch(tx, rows) {
            break;
        }
    }
    Ok(())
}

/// Row-by-row read for tables with LOB columns; values are fetched whole
fn stream_long_rows(
    conn: &Connection<'_>,
    sql: &str,
    kinds: &[ValueKind],
    batch_size: usize,
    tx: &mpsc::Sender<MigrationResult<Vec<Row>>>,
) -> MigrationResult<()> {
    let Some(mut cursor) = conn.execute(sql, ())? else {
        return Ok(());
    };
    let mut buf = Vec::new();
    let mut rows: Vec<Row> = Vec::with_capacity(batch_size);

    while let Some(mut row) = cursor.next_row()? {
        let mut values = Vec::with_capacity(kinds.len());
        for (idx, kind) in kinds.iter().enumerate() {
            let col = (idx + 1) as u16;
            buf.clear();
            let value = if *kind == ValueKind::Binary {
                if row.get_binary(col, &mut buf)? {
                    Value::Bytes(buf.clone())
                } else {
                    Value::Null
                }
            } else if row.get_text(col, &mut buf)? {
                parse_text_value(Some(&String::from_utf8_lossy(&buf)), *kind)
            } else {
                Value::Null
            };
            values.push(value);
        }
        rows.push(values);

        if rows.len() >= batch_size && !send_batch(tx, std::mem::replace(&mut rows, Vec::with_capacity(batch_size))) {
            return Ok(());
        }
    }
    if !rows.is_empty() {
        send_batch(tx, rows);
    }
    Ok(())
}

#[async_trait]
impl SchemaIntrospector for OracleEndpoint {
    fn dialect(&self) -> Dialect {
        Dialect::Oracle
    }

    async fn list_tables(&self, schema: &str) -> MigrationResult<Vec<String>> {
        let sql = format!(
            "SELECT table_name FROM all_tables WHERE owner = {} ORDER BY table_name",
            literal(schema)
        );
        let rows = self.query(sql).await?;
        Ok(rows.iter().filter_map(|r| text(r, 0).map(str::to_string)).collect())
    }

    async fn list_columns(&self, schema: &str, table: &str) -> MigrationResult<Vec<ColumnDescriptor>> {
        let sql = format!(
            "SELECT column_name, data_type, char_length, data_precision, data_scale, nullable, data_default, column_id \
             FROM all_tab_columns WHERE owner = {} AND table_name = {} ORDER BY column_id",
            literal(schema),
            literal(table)
        );
        let rows = self.query(sql).await?;
        Ok(rows.iter().map(|r| column_from_row(r)).collect())
    }

    async fn list_primary_keys(&self, schema: &str, table: &str) -> MigrationResult<Vec<String>> {
        let sql = format!(
            "SELECT cc.column_name FROM all_constraints c \
             JOIN all_cons_columns cc ON cc.owner = c.owner AND cc.constraint_name = c.constraint_name \
             WHERE c.constraint_type = 'P' AND c.owner = {} AND c.table_name = {} \
             ORDER BY cc.position",
            literal(schema),
            literal(table)
        );
        let rows = self.query(sql).await?;
        Ok(rows.iter().filter_map(|r| text(r, 0).map(str::to_string)).collect())
    }

    async fn sequence_metadata(&self, schema: &str, name: &str) -> MigrationResult<SequenceDescriptor> {
        let sql = format!(
            "SELECT increment_by, min_value, max_value, last_number, cache_size \
             FROM all_sequences WHERE sequence_owner = {} AND sequence_name = {}",
            literal(schema),
            literal(name)
        );
        let rows = self.query(sql).await?;
        let row = rows
            .first()
            .ok_or_else(|| MigrationError::sequence(format!("{}.{}", schema, name), "not found in ALL_SEQUENCES"))?;

        // Values beyond 64 bits (Oracle's default MAXVALUE) are left out
        Ok(SequenceDescriptor {
            name: name.to_string(),
            increment: int(row, 0),
            min_value: int(row, 1),
            max_value: int(row, 2),
            start: int(row, 3),
            cache: int(row, 4),
        })
    }

    async fn count_rows(&self, schema: &str, table: &str) -> MigrationResult<i64> {
        let rows = self
            .query(format!("SELECT COUNT(*) FROM {}", oracle_table(schema, table)))
            .await?;
        rows.first()
            .and_then(|r| int(r, 0))
            .ok_or_else(|| MigrationError::SourceRead(format!("COUNT(*) on {}.{} returned nothing", schema, table)))
    }
}


#[async_trait]
impl RowSource for OracleEndpoint {
    async fn read_rows(
        &self,
        table: &TableDescriptor,
        columns: &[ColumnDescriptor],
        batch_size: usize,
    ) -> MigrationResult<RowBatches> {
        let kinds: Vec<ValueKind> = columns.iter().map(|c| value_kind(Dialect::Oracle, c)).collect();
        let sql = select_sql(table, columns, &kinds);
        let long_data = columns.iter().any(is_long_data);
        debug!(
            "Reading {}{}: {}",
            table.qualified_name(),
            if long_data { " row by row" } else { "" },
            sql
        );

        let (tx, rx) = mpsc::channel(self.channel_capacity.max(1));
        let batch_size = batch_size.max(1);
        self.submit(Box::new(move |conn: &Connection<'_>| {
            let read = if long_data {
                stream_long_rows(conn, &sql, &kinds, batch_size, &tx)
            } else {
                stream_rows(conn, &sql, &kinds, batch_size, &tx)
            };
            if let Err(e) = read {
                let _ = tx.blocking_send(Err(MigrationError::SourceRead(e.to_string())));
            }
        }))
        .await?;
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row(values: &[Option<&str>]) -> Vec<Option<String>> {
        values.iter().map(|v| v.map(str::to_string)).collect()
    }

    #[test]
    fn test_catalog_name() {
        assert_eq!(catalog_name("hr"), "HR");
        assert_eq!(catalog_name("emp_seq$1"), "EMP_SEQ$1");
        assert_eq!(catalog_name("\"MixedCase\""), "MixedCase");
        assert_eq!(catalog_name("Order Lines"), "Order Lines");
        assert_eq!(literal("o'brien"), "'o''brien'");
    }

    #[test]
    fn test_column_from_row() {
        let col = column_from_row(&row(&[
            Some("EMPLOYEE_ID"),
            Some("NUMBER"),
            Some("0"),
            Some("6"),
            Some("0"),
            Some("N"),
            Some("\"HR\".\"EMP_SEQ\".\"NEXTVAL\" "),
            Some("1"),
        ]));
        assert_eq!(col.name, "employee_id");
        assert_eq!(col.original_name, "EMPLOYEE_ID");
        assert_eq!(col.length, None);
        assert_eq!(col.precision, Some(6));
        assert_eq!(col.scale, Some(0));
        assert!(!col.nullable);
        assert_eq!(col.default_expr.as_deref(), Some("\"HR\".\"EMP_SEQ\".\"NEXTVAL\""));
        assert_eq!(col.ordinal, 1);

        let col = column_from_row(&row(&[Some("NOTES"), Some("CLOB"), None, None, None, Some("Y"), None, Some("4")]));
        assert!(col.nullable);
        assert_eq!(col.default_expr, None);
    }

    #[test]
    fn test_select_renders_text_formats() {
        let table = TableDescriptor::new(
            "hr",
            "employees",
            vec![
                ColumnDescriptor::new("ID", "NUMBER", 1).with_precision(Some(6), Some(0)),
                ColumnDescriptor::new("HIRED", "DATE", 2),
                ColumnDescriptor::new("UPDATED", "TIMESTAMP(6)", 3),
                ColumnDescriptor::new("PHOTO", "BLOB", 4),
            ],
            Vec::<String>::new(),
        );
        let kinds: Vec<ValueKind> = table.columns().iter().map(|c| value_kind(Dialect::Oracle, c)).collect();

        assert_eq!(
            select_sql(&table, table.columns(), &kinds),
            "SELECT TO_CHAR(\"ID\", 'TM9', 'NLS_NUMERIC_CHARACTERS=''.,'''), \
             TO_CHAR(\"HIRED\", 'YYYY-MM-DD HH24:MI:SS'), \
             TO_CHAR(\"UPDATED\", 'YYYY-MM-DD HH24:MI:SS.FF6'), \
             \"PHOTO\" FROM \"HR\".\"EMPLOYEES\""
        );
    }

    #[test]
    fn test_lob_columns_use_long_data_path() {
        assert!(is_long_data(&ColumnDescriptor::new("NOTES", "CLOB", 1)));
        assert!(is_long_data(&ColumnDescriptor::new("PHOTO", "BLOB", 2)));
        assert!(is_long_data(&ColumnDescriptor::new("LEGACY", "LONG RAW", 3)));
        assert!(!is_long_data(&ColumnDescriptor::new("NAME", "VARCHAR2", 4).with_length(Some(4000))));
        assert!(!is_long_data(&ColumnDescriptor::new("HASH", "RAW", 5).with_length(Some(16))));
    }

    #[test]
    fn test_oversized_value_becomes_garbled() {
        let value = bounded_value(
            Some(b"abc".as_slice()),
            Indicator::Length(MAX_VALUE_BYTES + 1),
            MAX_VALUE_BYTES,
            ValueKind::Text,
        );
        assert_eq!(
            value,
            Value::Garbled(format!("value of {} bytes exceeds {} bytes", MAX_VALUE_BYTES + 1, MAX_VALUE_BYTES))
        );
        assert!(matches!(
            bounded_value(Some(b"abc".as_slice()), Indicator::NoTotal, 3, ValueKind::Text),
            Value::Garbled(_)
        ));
    }

    #[test]
    fn test_bounded_value_decodes_within_buffer() {
        assert_eq!(
            bounded_value(Some(b"42".as_slice()), Indicator::Length(2), 40, ValueKind::Integer),
            Value::Int(42)
        );
        assert_eq!(bounded_value(None, Indicator::Null, 40, ValueKind::Text), Value::Null);
    }
}
