//! PostgreSQL endpoint: catalog queries, row streaming and destination writes.

use super::{ColumnDescriptor, RowBatches, RowSource, SchemaIntrospector, SequenceDescriptor, TableDescriptor};
use crate::config::MigrationSettings;
use crate::connection::{create_pg_pool, ConnectionParams, Dialect};
use crate::error::{MigrationError, MigrationResult};
use crate::migration::typemap::{value_kind, ValueKind};
use crate::migration::value::{Row, Value};
use crate::migration::writer::{qualify, quote_ident};
use async_trait::async_trait;
use deadpool_postgres::Pool;
use postgres_types::FromSqlOwned;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// A pooled connection to one PostgreSQL database
#[derive(Clone)]
pub struct PostgresEndpoint {
    pool: Pool,
    channel_capacity: usize,
}

impl PostgresEndpoint {
    /// Create the pool and prove it works within the connect timeout
    pub async fn connect(params: &ConnectionParams, settings: &MigrationSettings) -> MigrationResult<Self> {
        let label = params.to_display_string();
        let pool = create_pg_pool(params, settings)?;

        let check = async {
            let client = pool.get().await?;
            client.query_one("SELECT 1", &[]).await?;
            Ok::<_, MigrationError>(())
        };
        match tokio::time::timeout(settings.connect_timeout(), check).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(MigrationError::connection(&label, e)),
            Err(_) => {
                return Err(MigrationError::connection(
                    &label,
                    format!("timed out after {}s", settings.connect_timeout_secs),
                ))
            }
        }

        info!("🐘 PostgreSQL connection ready: {}", label);
        Ok(Self {
            pool,
            channel_capacity: settings.channel_capacity,
        })
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub async fn server_version(&self) -> MigrationResult<String> {
        let client = self.pool.get().await?;
        let row = client.query_one("SELECT version()", &[]).await?;
        Ok(row.get(0))
    }
}

#[async_trait]
impl SchemaIntrospector for PostgresEndpoint {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn list_tables(&self, schema: &str) -> MigrationResult<Vec<String>> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT table_name::text
            FROM information_schema.tables
            WHERE table_schema = $1 AND table_type = 'BASE TABLE'
            ORDER BY table_name
        "#;
        let rows = client.query(query, &[&schema]).await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    async fn list_columns(&self, schema: &str, table: &str) -> MigrationResult<Vec<ColumnDescriptor>> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT
                column_name::text,
                data_type::text,
                character_maximum_length::int4,
                numeric_precision::int4,
                numeric_scale::int4,
                is_nullable::text,
                column_default::text,
                ordinal_position::int4
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
        "#;
        let rows = client.query(query, &[&schema, &table]).await?;
        debug!("{}.{}: {} column(s)", schema, table, rows.len());

        let columns = rows
            .iter()
            .map(|row| {
                ColumnDescriptor::new(row.get::<_, String>(0), row.get::<_, String>(1), row.get(7))
                    .with_length(row.get(2))
                    .with_precision(row.get(3), row.get(4))
                    .nullable(row.get::<_, String>(5) == "YES")
                    .with_default(row.get(6))
            })
            .collect();
        Ok(columns)
    }

    async fn list_primary_keys(&self, schema: &str, table: &str) -> MigrationResult<Vec<String>> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT a.attname::text
            FROM pg_index i
            JOIN pg_class c ON c.oid = i.indrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum = ANY(i.indkey)
            WHERE i.indisprimary AND n.nspname = $1 AND c.relname = $2
            ORDER BY array_position(i.indkey::int2[], a.attnum)
        "#;
        let rows = client.query(query, &[&schema, &table]).await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    async fn sequence_metadata(&self, schema: &str, name: &str) -> MigrationResult<SequenceDescriptor> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT increment_by, min_value, max_value, start_value, cache_size
            FROM pg_sequences
            WHERE schemaname = $1 AND sequencename = $2
        "#;
        let row = client
            .query_opt(query, &[&schema, &name])
            .await?
            .ok_or_else(|| MigrationError::sequence(format!("{}.{}", schema, name), "not found in pg_sequences"))?;

        Ok(SequenceDescriptor {
            name: name.to_string(),
            increment: row.get(0),
            min_value: row.get(1),
            max_value: row.get(2),
            start: row.get(3),
            cache: row.get(4),
        })
    }

    async fn count_rows(&self, schema: &str, table: &str) -> MigrationResult<i64> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(&format!("SELECT COUNT(*) FROM {}", qualify(schema, table)), &[])
            .await?;
        Ok(row.get(0))
    }
}

/// Column expression with a cast that fixes the decoded Rust type
fn select_expression(column: &ColumnDescriptor, kind: ValueKind) -> String {
    let cast = match kind {
        ValueKind::Integer => "int8",
        ValueKind::Float => "float8",
        ValueKind::Decimal | ValueKind::Text => "text",
        ValueKind::Boolean => "bool",
        ValueKind::Binary => "bytea",
        ValueKind::Timestamp => "timestamp",
        ValueKind::TimestampTz => "timestamptz",
        ValueKind::Date => "date",
        ValueKind::Time => "time",
    };
    format!("{}::{}", quote_ident(&column.original_name), cast)
}

fn select_sql(table: &TableDescriptor, columns: &[ColumnDescriptor], kinds: &[ValueKind]) -> String {
    let list = columns
        .iter()
        .zip(kinds)
        .map(|(c, k)| select_expression(c, *k))
        .collect::<Vec<_>>()
        .join(", ");
    format!("SELECT {} FROM {}", list, qualify(table.schema(), table.name()))
}

fn decode<T: FromSqlOwned>(row: &tokio_postgres::Row, idx: usize, wrap: impl FnOnce(T) -> Value) -> Value {
    match row.try_get::<_, Option<T>>(idx) {
        Ok(Some(v)) => wrap(v),
        Ok(None) => Value::Null,
        Err(e) => Value::Garbled(e.to_string()),
    }
}

fn decode_row(row: &tokio_postgres::Row, kinds: &[ValueKind]) -> Row {
    kinds
        .iter()
        .enumerate()
        .map(|(idx, kind)| match kind {
            ValueKind::Integer => decode(row, idx, Value::Int),
            ValueKind::Float => decode(row, idx, Value::Float),
            ValueKind::Decimal => decode(row, idx, Value::Decimal),
            ValueKind::Text => decode(row, idx, Value::Text),
            ValueKind::Boolean => decode(row, idx, Value::Bool),
            ValueKind::Binary => decode(row, idx, Value::Bytes),
            ValueKind::Timestamp => decode(row, idx, Value::Timestamp),
            ValueKind::TimestampTz => decode(row, idx, Value::TimestampTz),
            ValueKind::Date => decode(row, idx, Value::Date),
            ValueKind::Time => decode(row, idx, Value::Time),
        })
        .collect()
}

/// Read through a portal so only one batch is held in memory
async fn stream_rows(
    pool: Pool,
    sql: String,
    kinds: Vec<ValueKind>,
    batch_size: usize,
    tx: &mpsc::Sender<MigrationResult<Vec<Row>>>,
) -> MigrationResult<()> {
    let mut client = pool.get().await?;
    let transaction = client.transaction().await?;
    let portal = transaction.bind(sql.as_str(), &[]).await?;

    loop {
        let rows = transaction.query_portal(&portal, batch_size as i32).await?;
        if rows.is_empty() {
            break;
        }
        let last = rows.len() < batch_size;
        let batch: Vec<Row> = rows.iter().map(|r| decode_row(r, &kinds)).collect();
        if tx.send(Ok(batch)).await.is_err() {
            debug!("Row receiver dropped, stopping read");
            break;
        }
        if last {
            break;
        }
    }

    transaction.rollback().await?;
    Ok(())
}

#[async_trait]
impl RowSource for PostgresEndpoint {
    async fn read_rows(
        &self,
        table: &TableDescriptor,
        columns: &[ColumnDescriptor],
        batch_size: usize,
    ) -> MigrationResult<RowBatches> {
        let kinds: Vec<ValueKind> = columns.iter().map(|c| value_kind(Dialect::Postgres, c)).collect();
        let sql = select_sql(table, columns, &kinds);
        debug!("Reading {}: {}", table.qualified_name(), sql);

        let (tx, rx) = mpsc::channel(self.channel_capacity.max(1));
        let pool = self.pool.clone();
        let batch_size = batch_size.max(1);
        tokio::spawn(async move {
            if let Err(e) = stream_rows(pool, sql, kinds, batch_size, &tx).await {
                let _ = tx.send(Err(MigrationError::SourceRead(e.to_string()))).await;
            }
        });
        Ok(rx)
    }
}
