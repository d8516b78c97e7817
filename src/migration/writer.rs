//! Destination writes and the SQL text helpers shared by DDL and copy.

use crate::error::MigrationResult;
use crate::introspection::postgres::PostgresEndpoint;
use crate::migration::ddl::create_schema_sql;
use async_trait::async_trait;
use tracing::debug;

/// Quote an identifier, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `"schema"."name"`
pub fn qualify(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(name))
}

/// Escape a value for use inside a single-quoted literal
pub fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// One multi-row INSERT from already rendered literals
pub fn build_insert_sql(schema: &str, table: &str, columns: &[String], rows: &[Vec<String>]) -> String {
    let col_list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");

    let value_rows = rows
        .iter()
        .map(|row| format!("({})", row.join(", ")))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO {} ({}) VALUES {}",
        qualify(schema, table),
        col_list,
        value_rows
    )
}

/// Write access to the destination catalog and tables
#[async_trait]
pub trait DestinationWriter: Send + Sync {
    async fn create_schema(&self, schema: &str) -> MigrationResult<()>;

    async fn table_exists(&self, schema: &str, table: &str) -> MigrationResult<bool>;

    async fn execute_ddl(&self, ddl: &str) -> MigrationResult<()>;

    async fn sequence_exists(&self, schema: &str, name: &str) -> MigrationResult<bool>;

    async fn execute_sequence_ddl(&self, ddl: &str) -> MigrationResult<()>;

    async fn truncate(&self, schema: &str, table: &str) -> MigrationResult<()>;

    /// Run `sql` in its own transaction; nothing is kept when it fails
    async fn insert_batch(&self, sql: &str) -> MigrationResult<u64>;
}

#[async_trait]
impl DestinationWriter for PostgresEndpoint {
    async fn create_schema(&self, schema: &str) -> MigrationResult<()> {
        let client = self.pool().get().await?;
        client
            .batch_execute(&create_schema_sql(schema))
            .await?;
        Ok(())
    }

    async fn table_exists(&self, schema: &str, table: &str) -> MigrationResult<bool> {
        let client = self.pool().get().await?;
        let row = client
            .query_one(
                r#"
                SELECT EXISTS (
                    SELECT 1 FROM information_schema.tables
                    WHERE table_schema = $1 AND table_name = $2
                )
                "#,
                &[&schema, &table],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn execute_ddl(&self, ddl: &str) -> MigrationResult<()> {
        debug!("Executing DDL: {}", ddl);
        let client = self.pool().get().await?;
        client.batch_execute(ddl).await?;
        Ok(())
    }

    async fn sequence_exists(&self, schema: &str, name: &str) -> MigrationResult<bool> {
        let client = self.pool().get().await?;
        let row = client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM pg_sequences WHERE schemaname = $1 AND sequencename = $2)",
                &[&schema, &name],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn execute_sequence_ddl(&self, ddl: &str) -> MigrationResult<()> {
        debug!("Executing sequence DDL: {}", ddl);
        let client = self.pool().get().await?;
        client.batch_execute(ddl).await?;
        Ok(())
    }

    async fn truncate(&self, schema: &str, table: &str) -> MigrationResult<()> {
        let client = self.pool().get().await?;
        client
            .batch_execute(&format!("TRUNCATE TABLE {}", qualify(schema, table)))
            .await?;
        Ok(())
    }

    async fn insert_batch(&self, sql: &str) -> MigrationResult<u64> {
        let mut client = self.pool().get().await?;
        let tx = client.transaction().await?;
        match tx.execute(sql, &[]).await {
            Ok(inserted) => {
                tx.commit().await?;
                Ok(inserted)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    debug!("Rollback after failed batch also failed: {}", rollback);
                }
                Err(e.into())
            }
        }
    }
}
