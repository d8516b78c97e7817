//! Transactional batch copy of one table.

use crate::error::{MigrationError, MigrationWarning};
use crate::introspection::RowSource;
use crate::migration::plan::TablePlan;
use crate::migration::report::ReportWriter;
use crate::migration::value::{to_sql_literal, Row};
use crate::migration::writer::{build_insert_sql, DestinationWriter};
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

/// Totals for one table copy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub batches: usize,
    pub rows_copied: u64,
    pub rows_failed: u64,
}

/// Copies rows with replace semantics: truncate, then one transaction per batch
pub struct BatchCopier<'a> {
    source: &'a dyn RowSource,
    dest: &'a dyn DestinationWriter,
    batch_size: usize,
}

impl<'a> BatchCopier<'a> {
    pub fn new(source: &'a dyn RowSource, dest: &'a dyn DestinationWriter, batch_size: usize) -> Self {
        Self {
            source,
            dest,
            batch_size: batch_size.max(1),
        }
    }

    /// Copy the planned columns. Progress and errors are written to `report`
    /// under `record`; a failed batch never stops the following ones.
    pub async fn copy_table(&self, plan: &TablePlan, record: &str, report: &mut ReportWriter) -> CopyStats {
        let mut stats = CopyStats::default();
        let dest_label = plan.dest_qualified();

        if let Err(e) = self.dest.truncate(&plan.dest_schema, &plan.dest_table).await {
            error!("Truncate of {} failed: {}", dest_label, e);
            report.record_error(record, format!("truncate of {} failed: {}", dest_label, e));
            return stats;
        }

        let source_columns = plan.source_columns();
        let mut batches = match self
            .source
            .read_rows(&plan.source, &source_columns, self.batch_size)
            .await
        {
            Ok(rx) => rx,
            Err(e) => {
                error!("Reading {} failed: {}", plan.source.qualified_name(), e);
                report.record_error(record, e.to_string());
                return stats;
            }
        };

        let dest_columns = plan.dest_columns();

        while let Some(batch) = batches.recv().await {
            let rows = match batch {
                Ok(rows) => rows,
                Err(e) => {
                    let err = MigrationError::SourceRead(format!(
                        "{} after {} batch(es): {}",
                        plan.source.qualified_name(),
                        stats.batches,
                        e
                    ));
                    error!("{}", err);
                    report.record_error(record, err.to_string());
                    break;
                }
            };
            if rows.is_empty() {
                continue;
            }

            stats.batches += 1;
            let batch_no = stats.batches;
            let row_count = rows.len() as u64;

            let (literals, warnings) = render_batch(plan, &rows);
            report.record_warnings(record, &warnings);

            let sql = build_insert_sql(&plan.dest_schema, &plan.dest_table, &dest_columns, &literals);
            match self.dest.insert_batch(&sql).await {
                Ok(_) => {
                    stats.rows_copied += row_count;
                    debug!("{}: batch {} committed ({} rows)", dest_label, batch_no, row_count);
                    report.update_table(record, |r| r.rows_copied += row_count);
                }
                Err(e) => {
                    stats.rows_failed += row_count;
                    let err = MigrationError::batch(&dest_label, batch_no, e);
                    warn!("{}", err);
                    report.update_table(record, |r| {
                        r.rows_failed += row_count;
                        r.errors.push(err.to_string());
                    });
                }
            }
        }

        info!(
            "{}: {} row(s) copied, {} row(s) failed in {} batch(es)",
            dest_label, stats.rows_copied, stats.rows_failed, stats.batches
        );
        stats
    }
}

/// Render a batch to literals, replacing unconvertible values with NULL.
///
/// Substitutions are summarized as one warning per column.
fn render_batch(plan: &TablePlan, rows: &[Row]) -> (Vec<Vec<String>>, Vec<MigrationWarning>) {
    let mut substitutions: BTreeMap<usize, (usize, String)> = BTreeMap::new();

    let literals = rows
        .iter()
        .map(|row| {
            plan.columns
                .iter()
                .enumerate()
                .map(|(idx, column)| {
                    let value = row.get(idx).unwrap_or(&crate::migration::value::Value::Null);
                    to_sql_literal(value, column.flag).unwrap_or_else(|e| {
                        let entry = substitutions.entry(idx).or_insert_with(|| (0, e.to_string()));
                        entry.0 += 1;
                        "NULL".to_string()
                    })
                })
                .collect()
        })
        .collect();

    let warnings = substitutions
        .into_iter()
        .map(|(idx, (count, reason))| MigrationWarning::NullSubstitution {
            column: plan.columns[idx].dest_name.clone(),
            count,
            reason,
        })
        .collect();

    (literals, warnings)
}
