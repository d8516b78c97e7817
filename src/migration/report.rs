//! Run progress and outcome.
//!
//! The engine owns a [`ReportWriter`]; every change is published as a full
//! snapshot through a `watch` channel so pollers never observe a half-applied
//! update and never block the run.

use crate::error::MigrationWarning;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Cancelled | RunStatus::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TablePhase {
    Pending,
    Ddl,
    Copying,
    Done,
    Skipped,
}

/// Outcome of one table
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    pub table: String,
    pub phase: TablePhase,
    pub ddl_succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ddl: Option<String>,
    pub rows_total: u64,
    pub rows_copied: u64,
    pub rows_failed: u64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl MigrationRecord {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            phase: TablePhase::Pending,
            ddl_succeeded: false,
            ddl: None,
            rows_total: 0,
            rows_copied: 0,
            rows_failed: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finished_at.is_some()
    }
}

/// Snapshot of a whole run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub source: String,
    pub destination: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatal_error: Option<String>,
    /// Records in processing order
    pub tables: Vec<MigrationRecord>,
}

impl MigrationReport {
    pub fn new(run_id: Uuid, source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            run_id,
            status: RunStatus::Pending,
            source: source.into(),
            destination: destination.into(),
            started_at: Utc::now(),
            finished_at: None,
            fatal_error: None,
            tables: Vec::new(),
        }
    }

    pub fn table(&self, name: &str) -> Option<&MigrationRecord> {
        self.tables.iter().find(|t| t.table == name)
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id,
            status: self.status,
            source: self.source.clone(),
            destination: self.destination.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            tables: self.tables.len(),
            rows_copied: self.tables.iter().map(|t| t.rows_copied).sum(),
            rows_failed: self.tables.iter().map(|t| t.rows_failed).sum(),
            tables_with_errors: self.tables.iter().filter(|t| !t.errors.is_empty()).count(),
        }
    }
}

/// Compact listing entry for a run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub source: String,
    pub destination: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub tables: usize,
    pub rows_copied: u64,
    pub rows_failed: u64,
    pub tables_with_errors: usize,
}

/// Single writer of a run's report
pub struct ReportWriter {
    report: MigrationReport,
    tx: watch::Sender<MigrationReport>,
}

impl ReportWriter {
    pub fn new(report: MigrationReport) -> (Self, watch::Receiver<MigrationReport>) {
        let (tx, rx) = watch::channel(report.clone());
        (Self { report, tx }, rx)
    }

    pub fn snapshot(&self) -> &MigrationReport {
        &self.report
    }

    fn publish(&self) {
        self.tx.send_replace(self.report.clone());
    }

    pub fn set_status(&mut self, status: RunStatus) {
        self.report.status = status;
        if status.is_finished() {
            self.report.finished_at = Some(Utc::now());
        }
        self.publish();
    }

    /// Abort the run with a fatal error
    pub fn fail(&mut self, error: impl Into<String>) {
        self.report.fatal_error = Some(error.into());
        self.set_status(RunStatus::Failed);
    }

    /// Open a record for `table`. Re-opening a table starts a fresh record.
    pub fn begin_table(&mut self, table: &str) {
        self.report.tables.retain(|t| t.table != table);
        self.report.tables.push(MigrationRecord::new(table));
        self.publish();
    }

    /// Apply `update` to the open record for `table`.
    ///
    /// Returns false when the record is missing or already finalized.
    pub fn update_table(&mut self, table: &str, update: impl FnOnce(&mut MigrationRecord)) -> bool {
        let Some(record) = self.report.tables.iter_mut().find(|t| t.table == table) else {
            warn!("No report record for {}", table);
            return false;
        };
        if record.is_finalized() {
            warn!("Report record for {} is final, ignoring update", table);
            return false;
        }
        update(record);
        self.publish();
        true
    }

    pub fn set_phase(&mut self, table: &str, phase: TablePhase) {
        self.update_table(table, |r| r.phase = phase);
    }

    pub fn record_error(&mut self, table: &str, error: impl Into<String>) {
        let error = error.into();
        self.update_table(table, |r| r.errors.push(error));
    }

    pub fn record_warnings<'w>(&mut self, table: &str, warnings: impl IntoIterator<Item = &'w MigrationWarning>) {
        let rendered: Vec<String> = warnings.into_iter().map(ToString::to_string).collect();
        if !rendered.is_empty() {
            self.update_table(table, |r| r.warnings.extend(rendered));
        }
    }

    /// Close the record; later updates are ignored
    pub fn finalize_table(&mut self, table: &str, phase: TablePhase) {
        self.update_table(table, |r| {
            r.phase = phase;
            r.finished_at = Some(Utc::now());
        });
    }
}
