//! In-memory registry of migration runs.
//!
//! Each run executes on its own task. The registry keeps the receiving end
//! of the run's report channel for polling and the sending end of its
//! cancel flag.

use crate::config::MigrationSettings;
use crate::migration::engine::{execute_run, MigrationConfig};
use crate::migration::report::{MigrationReport, ReportWriter, RunSummary};
use std::collections::HashMap;
use std::future::Future;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

struct RunHandle {
    report: watch::Receiver<MigrationReport>,
    cancel: watch::Sender<bool>,
}

impl RunHandle {
    fn is_finished(&self) -> bool {
        self.report.borrow().status.is_finished()
    }
}

/// Result of a cancel request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Requested,
    AlreadyFinished,
    NotFound,
}

pub struct RunRegistry {
    runs: RwLock<HashMap<Uuid, RunHandle>>,
    settings: MigrationSettings,
}

impl RunRegistry {
    pub fn new(settings: MigrationSettings) -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            settings,
        }
    }

    /// Start a run in the background and return its id
    pub async fn start(&self, config: MigrationConfig) -> Uuid {
        let settings = self.settings.clone();
        let source = config.source.label();
        let destination = config.destination.label();
        self.spawn_run(source, destination, move |report, cancel| {
            execute_run(config, settings, report, cancel)
        })
        .await
    }

    async fn spawn_run<F, Fut>(&self, source: String, destination: String, run: F) -> Uuid
    where
        F: FnOnce(ReportWriter, watch::Receiver<bool>) -> Fut,
        Fut: Future + Send + 'static,
    {
        let run_id = Uuid::new_v4();
        let (writer, report) = ReportWriter::new(MigrationReport::new(run_id, source, destination));
        let (cancel, cancel_rx) = watch::channel(false);

        {
            let mut runs = self.runs.write().await;
            evict_finished(&mut runs, self.settings.max_retained_runs);
            runs.insert(run_id, RunHandle { report, cancel });
        }

        let task = run(writer, cancel_rx);
        tokio::spawn(async move {
            task.await;
            info!("🏁 Run {} finished", run_id);
        });

        info!("▶️  Run {} started", run_id);
        run_id
    }

    /// Latest published report
    pub async fn snapshot(&self, run_id: Uuid) -> Option<MigrationReport> {
        self.runs.read().await.get(&run_id).map(|h| h.report.borrow().clone())
    }

    /// Summaries of every retained run, newest first
    pub async fn list(&self) -> Vec<RunSummary> {
        let mut summaries: Vec<RunSummary> = self
            .runs
            .read()
            .await
            .values()
            .map(|h| h.report.borrow().summary())
            .collect();
        summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        summaries
    }

    /// Ask a run to stop before its next table
    pub async fn cancel(&self, run_id: Uuid) -> CancelOutcome {
        let runs = self.runs.read().await;
        let Some(handle) = runs.get(&run_id) else {
            return CancelOutcome::NotFound;
        };
        if handle.is_finished() {
            return CancelOutcome::AlreadyFinished;
        }
        handle.cancel.send_replace(true);
        info!("⏹️  Cancellation requested for run {}", run_id);
        CancelOutcome::Requested
    }
}

/// Drop the oldest finished runs so at most `keep - 1` remain before an insert
fn evict_finished(runs: &mut HashMap<Uuid, RunHandle>, keep: usize) {
    let mut finished: Vec<(Uuid, chrono::DateTime<chrono::Utc>)> = runs
        .iter()
        .filter(|(_, h)| h.is_finished())
        .map(|(id, h)| (*id, h.report.borrow().started_at))
        .collect();
    if finished.len() < keep {
        return;
    }
    finished.sort_by_key(|(_, started)| *started);
    let excess = finished.len() + 1 - keep.max(1);
    for (id, _) in finished.into_iter().take(excess) {
        debug!("Evicting finished run {}", id);
        runs.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspection::{ColumnDescriptor, TableDescriptor};
    use crate::migration::engine::{MigrationEngine, MigrationOptions};
    use crate::migration::report::RunStatus;
    use crate::migration::testing::{FakeDestination, FakeSource};
    use crate::migration::value::Value;
    use std::sync::Arc;

    fn registry(max_retained_runs: usize) -> RunRegistry {
        RunRegistry::new(MigrationSettings {
            max_retained_runs,
            ..MigrationSettings::default()
        })
    }

    fn engine() -> MigrationEngine {
        let table = TableDescriptor::new(
            "src",
            "items",
            vec![ColumnDescriptor::new("id", "integer", 1).not_null()],
            vec!["id".to_string()],
        );
        let rows = (1..=5).map(|i| vec![Value::Int(i)]).collect();
        MigrationEngine::new(
            Arc::new(FakeSource::new().with_table(table, rows)),
            Arc::new(FakeDestination::new()),
            MigrationOptions {
                source_schema: "src".into(),
                dest_schema: "public".into(),
                batch_size: 2,
            },
        )
    }

    async fn start_fake(registry: &RunRegistry) -> Uuid {
        let engine = engine();
        registry
            .spawn_run("fake-src".into(), "fake-dst".into(), move |mut report, cancel| async move {
                engine.run(&["src.items".to_string()], &mut report, &cancel).await
            })
            .await
    }

    async fn wait_finished(registry: &RunRegistry, run_id: Uuid) -> MigrationReport {
        let mut rx = registry.runs.read().await.get(&run_id).unwrap().report.clone();
        let report = rx.wait_for(|r| r.status.is_finished()).await.unwrap().clone();
        report
    }

    #[tokio::test]
    async fn test_run_is_pollable_until_done() {
        let registry = registry(10);
        let run_id = start_fake(&registry).await;

        assert!(registry.snapshot(run_id).await.is_some());
        let report = wait_finished(&registry, run_id).await;

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.table("src.items").unwrap().rows_copied, 5);
        assert_eq!(registry.list().await[0].rows_copied, 5);
    }

    #[tokio::test]
    async fn test_cancel_finished_and_unknown_runs() {
        let registry = registry(10);
        let run_id = start_fake(&registry).await;
        wait_finished(&registry, run_id).await;

        assert_eq!(registry.cancel(run_id).await, CancelOutcome::AlreadyFinished);
        assert_eq!(registry.cancel(Uuid::new_v4()).await, CancelOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_cancel_before_first_table() {
        let registry = registry(10);
        let engine = engine();
        let (go_tx, go_rx) = tokio::sync::oneshot::channel::<()>();
        let run_id = registry
            .spawn_run("fake-src".into(), "fake-dst".into(), move |mut report, cancel| async move {
                let _ = go_rx.await;
                engine.run(&["src.items".to_string()], &mut report, &cancel).await
            })
            .await;

        assert_eq!(registry.cancel(run_id).await, CancelOutcome::Requested);
        go_tx.send(()).unwrap();

        let report = wait_finished(&registry, run_id).await;
        assert_eq!(report.status, RunStatus::Cancelled);
        assert!(report.tables.is_empty());
    }

    #[tokio::test]
    async fn test_oldest_finished_runs_are_evicted() {
        let registry = registry(2);
        let first = start_fake(&registry).await;
        wait_finished(&registry, first).await;
        let second = start_fake(&registry).await;
        wait_finished(&registry, second).await;
        let third = start_fake(&registry).await;

        assert!(registry.snapshot(first).await.is_none());
        assert!(registry.snapshot(second).await.is_some());
        assert!(registry.snapshot(third).await.is_some());
    }
}
