//! In-memory endpoints for exercising the engine without a database.

use crate::connection::Dialect;
use crate::error::{MigrationError, MigrationResult};
use crate::introspection::{
    ColumnDescriptor, RowBatches, RowSource, SchemaIntrospector, SequenceDescriptor, TableDescriptor,
};
use crate::migration::value::{Row, Value};
use crate::migration::writer::{qualify, DestinationWriter};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tokio::sync::mpsc;

struct FakeTable {
    table: TableDescriptor,
    rows: Vec<Row>,
}

/// Source with fixed tables, rows and sequences
pub struct FakeSource {
    dialect: Dialect,
    tables: Vec<FakeTable>,
    sequences: HashMap<(String, String), SequenceDescriptor>,
    read_failures: HashMap<String, usize>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self {
            dialect: Dialect::Postgres,
            tables: Vec::new(),
            sequences: HashMap::new(),
            read_failures: HashMap::new(),
        }
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_table(mut self, table: TableDescriptor, rows: Vec<Row>) -> Self {
        self.tables.push(FakeTable { table, rows });
        self
    }

    pub fn with_sequence(mut self, schema: &str, desc: SequenceDescriptor) -> Self {
        self.sequences.insert((schema.to_string(), desc.name.clone()), desc);
        self
    }

    /// Make reads of `qualified` fail after `batches` good batches
    pub fn failing_read_after(mut self, qualified: &str, batches: usize) -> Self {
        self.read_failures.insert(qualified.to_string(), batches);
        self
    }

    fn find(&self, schema: &str, table: &str) -> Option<&FakeTable> {
        self.tables
            .iter()
            .find(|t| t.table.schema() == schema && t.table.name() == table)
    }
}

#[async_trait]
impl SchemaIntrospector for FakeSource {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn list_tables(&self, schema: &str) -> MigrationResult<Vec<String>> {
        Ok(self
            .tables
            .iter()
            .filter(|t| t.table.schema() == schema)
            .map(|t| t.table.name().to_string())
            .collect())
    }

    async fn list_columns(&self, schema: &str, table: &str) -> MigrationResult<Vec<ColumnDescriptor>> {
        Ok(self
            .find(schema, table)
            .map(|t| t.table.columns().to_vec())
            .unwrap_or_default())
    }

    async fn list_primary_keys(&self, schema: &str, table: &str) -> MigrationResult<Vec<String>> {
        Ok(self
            .find(schema, table)
            .map(|t| t.table.primary_keys().iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn sequence_metadata(&self, schema: &str, name: &str) -> MigrationResult<SequenceDescriptor> {
        self.sequences
            .get(&(schema.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| MigrationError::sequence(name, "permission denied for catalog"))
    }

    async fn count_rows(&self, schema: &str, table: &str) -> MigrationResult<i64> {
        self.find(schema, table)
            .map(|t| t.rows.len() as i64)
            .ok_or_else(|| MigrationError::introspection(format!("{}.{}", schema, table), "no such table"))
    }
}

#[async_trait]
impl RowSource for FakeSource {
    async fn read_rows(
        &self,
        table: &TableDescriptor,
        columns: &[ColumnDescriptor],
        batch_size: usize,
    ) -> MigrationResult<RowBatches> {
        let fake = self
            .find(table.schema(), table.name())
            .ok_or_else(|| MigrationError::SourceRead(format!("{} does not exist", table.qualified_name())))?;

        let positions: Vec<Option<usize>> = columns
            .iter()
            .map(|c| fake.table.columns().iter().position(|t| t.name == c.name))
            .collect();
        let projected: Vec<Row> = fake
            .rows
            .iter()
            .map(|row| {
                positions
                    .iter()
                    .map(|p| p.and_then(|i| row.get(i).cloned()).unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        let mut messages: Vec<MigrationResult<Vec<Row>>> =
            projected.chunks(batch_size.max(1)).map(|c| Ok(c.to_vec())).collect();
        if let Some(after) = self.read_failures.get(&table.qualified_name()) {
            messages.truncate(*after);
            messages.push(Err(MigrationError::SourceRead("connection reset by peer".into())));
        }

        let (tx, rx) = mpsc::channel(messages.len().max(1));
        for message in messages {
            let _ = tx.try_send(message);
        }
        Ok(rx)
    }
}

#[derive(Default)]
struct DestState {
    executed: Vec<String>,
    inserts: Vec<String>,
    tables: HashMap<String, Vec<String>>,
    rows: HashMap<String, usize>,
    sequences: HashSet<(String, String)>,
}

/// Destination that records statements and fails the ones matching a pattern
pub struct FakeDestination {
    failing: Vec<String>,
    state: Mutex<DestState>,
}

impl FakeDestination {
    pub fn new() -> Self {
        Self {
            failing: Vec::new(),
            state: Mutex::new(DestState::default()),
        }
    }

    /// Pre-create a table with the given column names
    pub fn with_table(self, schema: &str, table: &str, columns: &[&str]) -> Self {
        self.state
            .lock()
            .unwrap()
            .tables
            .insert(qualify(schema, table), columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn with_sequence(self, schema: &str, name: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .sequences
            .insert((schema.to_string(), name.to_string()));
        self
    }

    /// Any statement containing `pattern` fails
    pub fn failing_on(mut self, pattern: &str) -> Self {
        self.failing.push(pattern.to_string());
        self
    }

    /// Schema, table and sequence statements that succeeded, in order
    pub fn executed(&self) -> Vec<String> {
        self.state.lock().unwrap().executed.clone()
    }

    /// INSERT statements that were committed
    pub fn inserted_sql(&self) -> Vec<String> {
        self.state.lock().unwrap().inserts.clone()
    }

    pub fn row_count(&self, schema: &str, table: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .rows
            .get(&qualify(schema, table))
            .copied()
            .unwrap_or(0)
    }

    fn check(&self, sql: &str) -> MigrationResult<()> {
        match self.failing.iter().find(|p| sql.contains(p.as_str())) {
            Some(pattern) => Err(MigrationError::ddl("fake", format!("statement rejected ({})", pattern))),
            None => Ok(()),
        }
    }
}

/// Target of `CREATE TABLE IF NOT EXISTS <target> (` or `INSERT INTO <target> (`
fn statement_target<'a>(sql: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = sql.strip_prefix(prefix)?;
    rest.find(" (").map(|end| &rest[..end])
}

/// Number of value tuples in a multi-row INSERT
fn count_tuples(sql: &str) -> usize {
    let Some(start) = sql.find(" VALUES ") else {
        return 0;
    };
    let mut tuples = 0;
    let mut depth = 0;
    let mut in_quote = false;
    for c in sql[start..].chars() {
        match c {
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => {
                if depth == 0 {
                    tuples += 1;
                }
                depth += 1;
            }
            ')' if !in_quote => depth -= 1,
            _ => {}
        }
    }
    tuples
}

#[async_trait]
impl SchemaIntrospector for FakeDestination {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn list_tables(&self, schema: &str) -> MigrationResult<Vec<String>> {
        let prefix = format!("{}.", crate::migration::writer::quote_ident(schema));
        Ok(self
            .state
            .lock()
            .unwrap()
            .tables
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .map(|k| k.trim_matches('"').to_string())
            .collect())
    }

    async fn list_columns(&self, schema: &str, table: &str) -> MigrationResult<Vec<ColumnDescriptor>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .tables
            .get(&qualify(schema, table))
            .map(|cols| {
                cols.iter()
                    .enumerate()
                    .map(|(i, c)| ColumnDescriptor::new(c.as_str(), "text", i as i32 + 1))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_primary_keys(&self, _schema: &str, _table: &str) -> MigrationResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn sequence_metadata(&self, _schema: &str, name: &str) -> MigrationResult<SequenceDescriptor> {
        Err(MigrationError::sequence(name, "not tracked"))
    }

    async fn count_rows(&self, schema: &str, table: &str) -> MigrationResult<i64> {
        Ok(self.row_count(schema, table) as i64)
    }
}

#[async_trait]
impl DestinationWriter for FakeDestination {
    async fn create_schema(&self, schema: &str) -> MigrationResult<()> {
        let sql = crate::migration::ddl::create_schema_sql(schema);
        self.check(&sql)?;
        self.state.lock().unwrap().executed.push(sql);
        Ok(())
    }

    async fn table_exists(&self, schema: &str, table: &str) -> MigrationResult<bool> {
        Ok(self.state.lock().unwrap().tables.contains_key(&qualify(schema, table)))
    }

    async fn execute_ddl(&self, ddl: &str) -> MigrationResult<()> {
        self.check(ddl)?;
        let mut state = self.state.lock().unwrap();
        if let Some(target) = statement_target(ddl, "CREATE TABLE IF NOT EXISTS ") {
            state.tables.entry(target.to_string()).or_default();
        }
        state.executed.push(ddl.to_string());
        Ok(())
    }

    async fn sequence_exists(&self, schema: &str, name: &str) -> MigrationResult<bool> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .sequences
            .contains(&(schema.to_string(), name.to_string())))
    }

    async fn execute_sequence_ddl(&self, ddl: &str) -> MigrationResult<()> {
        self.check(ddl)?;
        self.state.lock().unwrap().executed.push(ddl.to_string());
        Ok(())
    }

    async fn truncate(&self, schema: &str, table: &str) -> MigrationResult<()> {
        let target = qualify(schema, table);
        self.check(&format!("TRUNCATE TABLE {}", target))?;
        self.state.lock().unwrap().rows.insert(target, 0);
        Ok(())
    }

    async fn insert_batch(&self, sql: &str) -> MigrationResult<u64> {
        self.check(sql)?;
        let tuples = count_tuples(sql);
        let mut state = self.state.lock().unwrap();
        if let Some(target) = statement_target(sql, "INSERT INTO ") {
            *state.rows.entry(target.to_string()).or_default() += tuples;
        }
        state.inserts.push(sql.to_string());
        Ok(tuples as u64)
    }
}
