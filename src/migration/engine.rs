//! Migration orchestrator.
//!
//! Tables are processed strictly one after another. Each table goes through
//! introspection, reconciliation, sequence resolution, DDL and copy; any
//! failure below the connection level is recorded and the next table starts.

use crate::config::MigrationSettings;
use crate::connection::{connect_destination, connect_source, EndpointConfig};
use crate::error::{MigrationError, MigrationResult};
use crate::introspection::{DestinationDatabase, SourceDatabase};
use crate::migration::copier::BatchCopier;
use crate::migration::ddl;
use crate::migration::plan::TablePlan;
use crate::migration::reconcile::reconcile;
use crate::migration::report::{ReportWriter, RunStatus, TablePhase};
use crate::migration::sequence::{SequenceResolution, SequenceResolver};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Immutable description of one run, built from a request
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    pub source: EndpointConfig,
    pub destination: EndpointConfig,
    /// `schema.table` or bare names; empty means every table of the source schema
    pub tables: Vec<String>,
    pub batch_size: usize,
}

#[derive(Debug, Clone)]
pub struct MigrationOptions {
    pub source_schema: String,
    pub dest_schema: String,
    pub batch_size: usize,
}

pub struct MigrationEngine {
    source: Arc<dyn SourceDatabase>,
    dest: Arc<dyn DestinationDatabase>,
    options: MigrationOptions,
}

impl MigrationEngine {
    pub fn new(source: Arc<dyn SourceDatabase>, dest: Arc<dyn DestinationDatabase>, options: MigrationOptions) -> Self {
        Self { source, dest, options }
    }

    /// Split `schema.table`, falling back to the run's source schema
    fn split_table<'t>(&'t self, table: &'t str) -> (&'t str, &'t str) {
        match table.split_once('.') {
            Some((schema, name)) if !schema.is_empty() && !name.is_empty() => (schema, name),
            _ => (self.options.source_schema.as_str(), table),
        }
    }

    async fn resolve_tables(&self, tables: &[String]) -> MigrationResult<Vec<String>> {
        if !tables.is_empty() {
            let mut seen = HashSet::new();
            let unique: Vec<String> = tables.iter().filter(|t| seen.insert(t.as_str())).cloned().collect();
            if unique.len() < tables.len() {
                warn!("Ignoring {} repeated table name(s)", tables.len() - unique.len());
            }
            return Ok(unique);
        }
        let schema = &self.options.source_schema;
        let names = self.source.list_tables(schema).await?;
        info!("No tables requested, migrating all {} table(s) of {}", names.len(), schema);
        Ok(names.into_iter().map(|n| format!("{}.{}", schema, n)).collect())
    }

    /// Run every table. Cancellation is honoured between tables.
    pub async fn run(&self, tables: &[String], report: &mut ReportWriter, cancel: &watch::Receiver<bool>) -> RunStatus {
        report.set_status(RunStatus::Running);

        let tables = match self.resolve_tables(tables).await {
            Ok(tables) => tables,
            Err(e) => {
                error!("Could not list source tables: {}", e);
                report.fail(e.to_string());
                return RunStatus::Failed;
            }
        };

        for (idx, table) in tables.iter().enumerate() {
            if *cancel.borrow() {
                info!("Run cancelled after {} of {} table(s)", idx, tables.len());
                report.set_status(RunStatus::Cancelled);
                return RunStatus::Cancelled;
            }
            info!("📦 [{}/{}] Migrating {}", idx + 1, tables.len(), table);
            self.migrate_table(table, report).await;
        }

        report.set_status(RunStatus::Completed);
        let summary = report.snapshot().summary();
        info!(
            "✅ Run finished: {} table(s), {} row(s) copied, {} table(s) with errors",
            summary.tables, summary.rows_copied, summary.tables_with_errors
        );
        RunStatus::Completed
    }

    async fn migrate_table(&self, table: &str, report: &mut ReportWriter) {
        report.begin_table(table);
        let (schema, name) = self.split_table(table);

        let source_table = match self.source.describe_table(schema, name).await {
            Ok(t) => t,
            Err(e) => {
                warn!("Skipping {}: {}", table, e);
                report.record_error(table, e.to_string());
                report.finalize_table(table, TablePhase::Skipped);
                return;
            }
        };

        let dest_schema = self.options.dest_schema.as_str();
        let dest_table = source_table.name().to_lowercase();

        // An existing destination table dictates the column set
        let expected: Vec<String> = match self.dest.table_exists(dest_schema, &dest_table).await {
            Ok(true) => match self.dest.list_columns(dest_schema, &dest_table).await {
                Ok(columns) => columns.into_iter().map(|c| c.original_name).collect(),
                Err(e) => {
                    report.record_error(table, MigrationError::introspection(format!("{}.{}", dest_schema, dest_table), e).to_string());
                    report.finalize_table(table, TablePhase::Skipped);
                    return;
                }
            },
            Ok(false) => source_table.columns().iter().map(|c| c.name.clone()).collect(),
            Err(e) => {
                report.record_error(table, e.to_string());
                report.finalize_table(table, TablePhase::Skipped);
                return;
            }
        };

        let reconciliation = reconcile(&expected, source_table.columns());
        report.record_warnings(table, &reconciliation.warnings);
        if reconciliation.is_empty() {
            report.record_error(table, "no destination column matches a source column");
            report.finalize_table(table, TablePhase::Skipped);
            return;
        }

        let (mut plan, warnings) = TablePlan::build(self.source.dialect(), &source_table, dest_schema, &reconciliation);
        report.record_warnings(table, &warnings);

        report.set_phase(table, TablePhase::Ddl);
        if let Err(e) = self.dest.create_schema(dest_schema).await {
            self.ddl_failed(table, MigrationError::ddl(plan.dest_qualified(), e), report);
            return;
        }

        self.resolve_sequences(&mut plan, table, report).await;

        let table_ddl = ddl::generate(&plan);
        report.record_warnings(table, &table_ddl.warnings);
        debug!("DDL for {}:\n{}", plan.dest_qualified(), table_ddl.create_table);
        let ddl_text = table_ddl.create_table.clone();
        report.update_table(table, |r| r.ddl = Some(ddl_text));

        if let Err(e) = self.dest.execute_ddl(&table_ddl.create_table).await {
            self.ddl_failed(table, MigrationError::ddl(plan.dest_qualified(), e), report);
            return;
        }
        report.update_table(table, |r| r.ddl_succeeded = true);

        report.set_phase(table, TablePhase::Copying);
        match self.source.count_rows(source_table.schema(), source_table.name()).await {
            Ok(total) => {
                report.update_table(table, |r| r.rows_total = total.max(0) as u64);
            }
            Err(e) => report.record_error(table, format!("row count failed: {}", e)),
        }

        BatchCopier::new(self.source.as_row_source(), self.dest.as_writer(), self.options.batch_size)
            .copy_table(&plan, table, report)
            .await;

        report.finalize_table(table, TablePhase::Done);
        if let Some(record) = report.snapshot().table(table) {
            info!(
                "{}: {}/{} row(s) copied, {} failed",
                table, record.rows_copied, record.rows_total, record.rows_failed
            );
        }
    }

    /// Make sure every sequence-backed column has its sequence at the destination
    async fn resolve_sequences(&self, plan: &mut TablePlan, table: &str, report: &mut ReportWriter) {
        let resolver = SequenceResolver::new(
            self.source.as_introspector(),
            self.dest.as_writer(),
            &self.options.dest_schema,
        );
        let source_schema = plan.source.schema().to_string();
        let defaults = match self.source.list_sequence_defaults(&source_schema, plan.source.name()).await {
            Ok(defaults) => defaults,
            Err(e) => {
                warn!("Sequence defaults of {} unavailable: {}", table, e);
                report.record_error(table, e.to_string());
                return;
            }
        };
        let mut resolved: HashMap<String, SequenceResolution> = HashMap::new();

        for column in plan.columns.iter_mut() {
            let Some(sequence) = defaults
                .iter()
                .find(|d| d.column == column.source.name)
                .map(|d| d.sequence.clone())
            else {
                continue;
            };

            let resolution = match resolved.get(&sequence.dest_name()) {
                Some(done) => done.clone(),
                None => {
                    let resolution = resolver.resolve(&source_schema, &sequence).await;
                    report.record_warnings(table, &resolution.warnings);
                    for err in &resolution.errors {
                        report.record_error(table, err.clone());
                    }
                    resolved.insert(sequence.dest_name(), resolution.clone());
                    resolution
                }
            };

            if resolution.outcome.is_resolved() {
                column.sequence = Some(resolution);
            }
        }
    }

    fn ddl_failed(&self, table: &str, err: MigrationError, report: &mut ReportWriter) {
        error!("{}", err);
        report.update_table(table, |r| {
            r.ddl_succeeded = false;
            r.errors.push(err.to_string());
        });
        report.finalize_table(table, TablePhase::Skipped);
    }
}

/// Connect both endpoints and run. Connection failures abort the run.
pub async fn execute_run(
    config: MigrationConfig,
    settings: MigrationSettings,
    mut report: ReportWriter,
    cancel: watch::Receiver<bool>,
) -> RunStatus {
    report.set_status(RunStatus::Running);

    let source = match connect_source(&config.source, &settings).await {
        Ok(source) => source,
        Err(e) => {
            error!("❌ {}", e);
            report.fail(e.to_string());
            return RunStatus::Failed;
        }
    };
    let dest: Arc<dyn DestinationDatabase> = match connect_destination(&config.destination, &settings).await {
        Ok(dest) => dest,
        Err(e) => {
            error!("❌ {}", e);
            report.fail(e.to_string());
            return RunStatus::Failed;
        }
    };

    let engine = MigrationEngine::new(
        source,
        dest,
        MigrationOptions {
            source_schema: config.source.schema.clone(),
            dest_schema: config.destination.schema.clone(),
            batch_size: config.batch_size,
        },
    );
    engine.run(&config.tables, &mut report, &cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspection::{ColumnDescriptor, TableDescriptor};
    use crate::migration::report::MigrationReport;
    use crate::migration::testing::{FakeDestination, FakeSource};
    use crate::migration::value::{Row, Value};
    use uuid::Uuid;

    fn options() -> MigrationOptions {
        MigrationOptions {
            source_schema: "src".to_string(),
            dest_schema: "public".to_string(),
            batch_size: 1000,
        }
    }

    fn employees() -> TableDescriptor {
        TableDescriptor::new(
            "src",
            "employees",
            vec![
                ColumnDescriptor::new("id", "integer", 1)
                    .not_null()
                    .with_default(Some("nextval('employees_id_seq'::regclass)".into())),
                ColumnDescriptor::new("name", "character varying", 2).with_length(Some(50)).not_null(),
                ColumnDescriptor::new("email", "character varying", 3).with_length(Some(100)),
            ],
            vec!["id".to_string()],
        )
    }

    fn employee_rows() -> Vec<Row> {
        ["Ann", "Bob", "Cy"]
            .iter()
            .enumerate()
            .map(|(i, n)| {
                vec![
                    Value::Int(i as i64 + 1),
                    Value::Text(n.to_string()),
                    if i == 1 { Value::Null } else { Value::Text(format!("{}@example.com", n.to_lowercase())) },
                ]
            })
            .collect()
    }

    fn simple_table(name: &str) -> TableDescriptor {
        TableDescriptor::new(
            "src",
            name,
            vec![
                ColumnDescriptor::new("id", "bigint", 1).not_null(),
                ColumnDescriptor::new("label", "text", 2),
            ],
            vec!["id".to_string()],
        )
    }

    fn simple_rows(n: usize) -> Vec<Row> {
        (1..=n)
            .map(|i| vec![Value::Int(i as i64), Value::Text(format!("row {}", i))])
            .collect()
    }

    async fn run(
        source: Arc<FakeSource>,
        dest: Arc<FakeDestination>,
        tables: &[&str],
        cancelled: bool,
    ) -> MigrationReport {
        let (mut writer, _rx) = ReportWriter::new(MigrationReport::new(Uuid::new_v4(), "src", "dest"));
        let (_cancel_tx, cancel_rx) = watch::channel(cancelled);
        let engine = MigrationEngine::new(source, dest, options());
        let tables: Vec<String> = tables.iter().map(|t| t.to_string()).collect();
        engine.run(&tables, &mut writer, &cancel_rx).await;
        writer.snapshot().clone()
    }

    #[tokio::test]
    async fn test_employees_end_to_end() {
        let source = Arc::new(FakeSource::new().with_table(employees(), employee_rows()));
        let dest = Arc::new(FakeDestination::new());

        let report = run(source, dest.clone(), &["src.employees"], false).await;

        assert_eq!(report.status, RunStatus::Completed);
        let record = report.table("src.employees").unwrap();
        assert!(record.ddl_succeeded);
        assert_eq!(record.phase, TablePhase::Done);
        assert_eq!(record.rows_total, 3);
        assert_eq!(record.rows_copied, 3);
        assert_eq!(record.rows_failed, 0);
        assert!(record.errors.is_empty());

        let ddl = record.ddl.as_deref().unwrap();
        assert!(ddl.contains("\"id\" SERIAL PRIMARY KEY"));
        assert!(ddl.contains("\"name\" VARCHAR(50) NOT NULL"));
        assert!(ddl.contains("\"email\" VARCHAR(100)\n"));
        assert_eq!(dest.row_count("public", "employees"), 3);

        let executed = dest.executed();
        assert_eq!(executed[0], "CREATE SCHEMA IF NOT EXISTS \"public\"");
        assert_eq!(executed[1], "CREATE SEQUENCE \"public\".\"employees_id_seq\"");
    }

    #[tokio::test]
    async fn test_rerun_keeps_row_count() {
        let source = Arc::new(FakeSource::new().with_table(employees(), employee_rows()));
        let dest = Arc::new(FakeDestination::new());

        run(source.clone(), dest.clone(), &["src.employees"], false).await;
        let report = run(source, dest.clone(), &["src.employees"], false).await;

        assert_eq!(report.table("src.employees").unwrap().rows_copied, 3);
        assert_eq!(dest.row_count("public", "employees"), 3);
    }

    #[tokio::test]
    async fn test_rejected_batch_is_isolated() {
        let mut rows = simple_rows(2000);
        rows[500][1] = Value::Text("REJECT".into());
        let source = Arc::new(FakeSource::new().with_table(simple_table("events"), rows));
        let dest = Arc::new(FakeDestination::new().failing_on("'REJECT'"));

        let report = run(source, dest.clone(), &["src.events"], false).await;

        let record = report.table("src.events").unwrap();
        assert_eq!(record.rows_total, 2000);
        assert_eq!(record.rows_copied, 1000);
        assert_eq!(record.rows_failed, 1000);
        assert_eq!(record.errors.len(), 1);
        assert_eq!(dest.row_count("public", "events"), 1000);
    }

    #[tokio::test]
    async fn test_missing_sequence_created_once_with_defaults() {
        let table = TableDescriptor::new(
            "src",
            "tickets",
            vec![
                ColumnDescriptor::new("id", "bigint", 1)
                    .not_null()
                    .with_default(Some("nextval('seq_x'::regclass)".into())),
                ColumnDescriptor::new("ref_no", "bigint", 2).with_default(Some("nextval('seq_x'::regclass)".into())),
            ],
            vec!["id".to_string()],
        );
        let source = Arc::new(FakeSource::new().with_table(table, vec![]));
        let dest = Arc::new(FakeDestination::new());

        let report = run(source, dest.clone(), &["src.tickets"], false).await;

        let creates: Vec<String> = dest
            .executed()
            .into_iter()
            .filter(|s| s.starts_with("CREATE SEQUENCE"))
            .collect();
        assert_eq!(creates, vec!["CREATE SEQUENCE \"public\".\"seq_x\"".to_string()]);

        let record = report.table("src.tickets").unwrap();
        assert!(record.errors.is_empty());
        assert_eq!(record.warnings.len(), 1);
        assert!(record.warnings[0].starts_with("sequence public.seq_x: reading source parameters failed"));
        assert!(record.ddl.as_deref().unwrap().contains("\"id\" BIGSERIAL PRIMARY KEY"));
    }

    #[tokio::test]
    async fn test_ddl_failure_skips_copy_and_continues() {
        let source = Arc::new(
            FakeSource::new()
                .with_table(simple_table("broken"), simple_rows(5))
                .with_table(simple_table("fine"), simple_rows(4)),
        );
        let dest = Arc::new(FakeDestination::new().failing_on("CREATE TABLE IF NOT EXISTS \"public\".\"broken\""));

        let report = run(source, dest.clone(), &["src.broken", "src.fine"], false).await;

        assert_eq!(report.status, RunStatus::Completed);
        let broken = report.table("src.broken").unwrap();
        assert!(!broken.ddl_succeeded);
        assert_eq!(broken.rows_copied, 0);
        assert_eq!(broken.phase, TablePhase::Skipped);
        assert!(broken.errors[0].starts_with("DDL for public.broken failed"));

        let fine = report.table("src.fine").unwrap();
        assert!(fine.ddl_succeeded);
        assert_eq!(fine.rows_copied, 4);
    }

    #[tokio::test]
    async fn test_unknown_table_is_skipped() {
        let source = Arc::new(FakeSource::new().with_table(simple_table("fine"), simple_rows(2)));
        let dest = Arc::new(FakeDestination::new());

        let report = run(source, dest, &["src.ghost", "fine"], false).await;

        let ghost = report.table("src.ghost").unwrap();
        assert_eq!(ghost.phase, TablePhase::Skipped);
        assert!(ghost.errors[0].starts_with("Introspection of src.ghost failed"));
        assert_eq!(report.table("fine").unwrap().rows_copied, 2);
    }

    #[tokio::test]
    async fn test_existing_destination_columns_drive_the_copy() {
        let table = TableDescriptor::new(
            "src",
            "customers",
            vec![
                ColumnDescriptor::new("customer_id", "integer", 1).not_null(),
                ColumnDescriptor::new("fullname", "text", 2),
            ],
            Vec::<String>::new(),
        );
        let rows = vec![vec![Value::Int(7), Value::Text("Ada".into())]];
        let source = Arc::new(FakeSource::new().with_table(table, rows));
        let dest = Arc::new(FakeDestination::new().with_table("public", "customers", &["customer_id", "full_name", "loyalty_tier"]));

        let report = run(source, dest.clone(), &["src.customers"], false).await;

        let record = report.table("src.customers").unwrap();
        assert_eq!(record.rows_copied, 1);
        assert_eq!(record.warnings.len(), 1);
        assert!(record.warnings[0].contains("loyalty_tier"));
        assert!(dest.inserted_sql()[0].starts_with("INSERT INTO \"public\".\"customers\" (\"customer_id\", \"full_name\") VALUES"));
    }

    #[tokio::test]
    async fn test_empty_table_list_migrates_whole_schema() {
        let source = Arc::new(
            FakeSource::new()
                .with_table(simple_table("a"), simple_rows(1))
                .with_table(simple_table("b"), simple_rows(2)),
        );
        let dest = Arc::new(FakeDestination::new());

        let report = run(source, dest, &[], false).await;

        assert_eq!(report.tables.len(), 2);
        assert_eq!(report.table("src.b").unwrap().rows_copied, 2);
    }

    #[tokio::test]
    async fn test_cancel_stops_at_table_boundary() {
        let source = Arc::new(FakeSource::new().with_table(simple_table("a"), simple_rows(1)));
        let dest = Arc::new(FakeDestination::new());

        let report = run(source, dest.clone(), &["src.a"], true).await;

        assert_eq!(report.status, RunStatus::Cancelled);
        assert!(report.tables.is_empty());
        assert!(dest.executed().is_empty());
    }

    #[tokio::test]
    async fn test_existing_mixed_case_columns_are_kept() {
        let table = TableDescriptor::new(
            "src",
            "customers",
            vec![
                ColumnDescriptor::new("ID", "bigint", 1).not_null(),
                ColumnDescriptor::new("FULLNAME", "text", 2),
            ],
            vec!["ID".to_string()],
        );
        let rows = vec![vec![Value::Int(1), Value::Text("Ann Lee".into())]];
        let source = Arc::new(FakeSource::new().with_table(table, rows));
        let dest = Arc::new(FakeDestination::new().with_table("public", "customers", &["ID", "FullName"]));

        let report = run(source, dest.clone(), &["src.customers"], false).await;

        let record = report.table("src.customers").unwrap();
        assert!(record.errors.is_empty());
        assert_eq!(record.rows_copied, 1);
        let inserts = dest.inserted_sql();
        assert_eq!(inserts.len(), 1);
        assert!(inserts[0].contains("(\"ID\", \"FullName\")"));
    }

    #[tokio::test]
    async fn test_repeated_table_is_migrated_once() {
        let source = Arc::new(FakeSource::new().with_table(simple_table("events"), simple_rows(3)));
        let dest = Arc::new(FakeDestination::new());

        let report = run(source, dest.clone(), &["src.events", "src.events"], false).await;

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.tables.len(), 1);
        assert_eq!(report.table("src.events").unwrap().rows_copied, 3);
        assert_eq!(dest.inserted_sql().len(), 1);
    }
}
