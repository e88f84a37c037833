//! Scheduler - タスク一覧を持ち、全部走らせて状態を配る
//!
//! # 設計
//! - タスク一覧は起動時に 1 度だけ組み立てる（[`super::plan::assemble`]）
//! - 実行の上限はリソースだけが決める。スケジューラ自体は全部を同時に起動する
//! - 状態が変わるたびに（`Harness` の変更カウンタ）スナップショットを作り直し、
//!   watch チャネルとレポートシンクに流す

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::domain::{PlanSpec, TaskId};
use crate::error::HarnessError;
use crate::harness::Harness;
use crate::observability::StatusReport;
use crate::ports::ReportSink;
use crate::task::TestTask;

pub struct Scheduler {
    harness: Arc<Harness>,
    tasks: Vec<Arc<TestTask>>,
    sinks: Vec<Arc<dyn ReportSink>>,
    status: watch::Sender<StatusReport>,
}

impl Scheduler {
    pub fn new(harness: Arc<Harness>, tasks: Vec<Arc<TestTask>>) -> Self {
        let (status, _) = watch::channel(StatusReport::empty(harness.run_id()));
        Self {
            harness,
            tasks,
            sinks: Vec::new(),
            status,
        }
    }

    /// Assembles the plan's projects against `harness`.
    pub fn from_plan(harness: Arc<Harness>, plan: &PlanSpec) -> Result<Self, HarnessError> {
        let tasks = super::plan::assemble(&harness, &plan.projects)?;
        Ok(Self::new(harness, tasks))
    }

    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn harness(&self) -> &Arc<Harness> {
        &self.harness
    }

    /// Top-level tasks, batches included.
    pub fn tasks(&self) -> &[Arc<TestTask>] {
        &self.tasks
    }

    /// Every task with the batch it belongs to, parents before their members.
    pub fn all_tasks(&self) -> Vec<(Arc<TestTask>, Option<TaskId>)> {
        let mut rv = Vec::new();
        for task in &self.tasks {
            rv.push((Arc::clone(task), None));
            for member in task.members() {
                rv.push((member, Some(task.id())));
            }
        }
        rv
    }

    pub fn find(&self, id: TaskId) -> Option<Arc<TestTask>> {
        self.all_tasks()
            .into_iter()
            .map(|(task, _)| task)
            .find(|t| t.id() == id)
    }

    pub fn snapshot(&self) -> StatusReport {
        let tasks = self
            .all_tasks()
            .iter()
            .map(|(task, parent)| task.snapshot(*parent))
            .collect();
        StatusReport::new(self.harness.run_id(), tasks)
    }

    /// Recomputes the report and hands it to the sinks and subscribers.
    pub fn publish(&self) -> StatusReport {
        let report = self.snapshot();
        for sink in &self.sinks {
            if let Err(e) = sink.publish(&report) {
                warn!(error = %e, "report sink failed");
            }
        }
        self.status.send_replace(report.clone());
        report
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusReport> {
        self.status.subscribe()
    }

    /// Runs every non-ignored task and returns once all of them finished.
    pub async fn run_all(&self) -> StatusReport {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let runs = async move {
            let mut pending: FuturesUnordered<_> = self
                .tasks
                .iter()
                .filter(|t| !t.is_ignored())
                .map(|t| t.run())
                .collect();
            info!(tasks = pending.len(), "running tasks");
            while pending.next().await.is_some() {
                self.publish();
            }
            shutdown_tx.send_replace(true);
        };
        tokio::join!(self.publisher_loop(shutdown_rx), runs);

        let report = self.publish();
        info!(
            total = report.counts.total(),
            succeeded = report.counts.succeeded,
            failed = report.counts.failed,
            skipped = report.counts.skipped,
            "all tasks finished"
        );
        report
    }

    /// Republishes after every state change until `shutdown_rx` turns true.
    pub async fn publisher_loop(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut changes = self.harness.subscribe_changes();
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    // 次のループで判定
                    continue;
                }
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.publish();
                }
            }
        }
        debug!("publisher loop stopped");
    }

    /// 0 when nothing failed or was skipped, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        let bad = self
            .all_tasks()
            .iter()
            .any(|(task, _)| task.is_failed() || task.is_skipped());
        if bad { 1 } else { 0 }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::testing::{Fixture, simulator};

    #[derive(Default)]
    struct Collect(Mutex<Vec<StatusReport>>);

    impl ReportSink for Collect {
        fn publish(&self, report: &StatusReport) -> Result<(), HarnessError> {
            self.0.lock().unwrap().push(report.clone());
            Ok(())
        }
    }

    fn plan() -> PlanSpec {
        PlanSpec::from_json(
            r#"{"projects": [
                {"name": "xammac", "kind": "desktop"},
                {"name": "monotouch-test", "kind": "mobile", "platforms": ["tvOS"]}
            ]}"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn runs_everything_not_ignored() {
        let fx = Fixture::builder().targets(vec![simulator("T", crate::domain::TestPlatform::TvOs)]).build();
        let sink = Arc::new(Collect::default());
        let scheduler = Scheduler::from_plan(Arc::clone(&fx.harness), &plan())
            .unwrap()
            .with_sink(sink.clone());

        let report = scheduler.run_all().await;

        // desktop run, ignored device run, batch + one member
        assert_eq!(report.counts.total(), 4);
        assert_eq!(report.counts.succeeded, 3);
        assert_eq!(report.counts.ignored, 1);
        assert_eq!(scheduler.exit_code(), 0);
        assert!(!sink.0.lock().unwrap().is_empty());
        assert_eq!(scheduler.subscribe().borrow().counts.succeeded, 3);
    }

    #[tokio::test]
    async fn skipped_runs_make_the_exit_code_fail() {
        let fx = Fixture::new();
        let scheduler = Scheduler::from_plan(Arc::clone(&fx.harness), &plan()).unwrap();

        scheduler.run_all().await;

        let batch = scheduler
            .tasks()
            .iter()
            .find(|t| t.name() == "Tests for tvOS")
            .unwrap();
        assert!(batch.is_skipped());
        assert_eq!(scheduler.exit_code(), 1);
    }

    #[tokio::test]
    async fn find_reaches_batch_members() {
        let fx = Fixture::new();
        let scheduler = Scheduler::from_plan(Arc::clone(&fx.harness), &plan()).unwrap();

        let (member, parent) = scheduler
            .all_tasks()
            .into_iter()
            .find(|(_, parent)| parent.is_some())
            .unwrap();

        let found = scheduler.find(member.id()).unwrap();
        assert!(Arc::ptr_eq(&found, &member));
        assert_eq!(scheduler.find(parent.unwrap()).unwrap().name(), "Tests for tvOS");
        assert!(scheduler.find(TaskId::from_u64(9999)).is_none());
    }
}
