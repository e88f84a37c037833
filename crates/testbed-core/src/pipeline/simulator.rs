//! Runs on simulators.
//!
//! # 設計
//! - 単独で走るときはデスクトップを排他で取り、シミュレータの準備と後始末も自分で行う
//! - バッチの一員として走るときは、バッチが排他リースを貸し出し（`lend`）、
//!   準備と後始末もバッチ側が行う

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::{info, warn};

use super::candidates::Candidates;
use super::run::{RunTarget, RunTest, apply_report};
use crate::broker::ResourceGuard;
use crate::domain::{TargetKind, TaskKind, Target, TestPlatform};
use crate::error::HarnessError;
use crate::task::TestTask;

#[derive(Debug, Clone)]
pub struct Selection {
    pub simulator: Target,
    pub companion: Option<Target>,
}

impl Selection {
    /// Simulator first, then the companion if any.
    pub fn targets(&self) -> Vec<Target> {
        std::iter::once(self.simulator.clone())
            .chain(self.companion.clone())
            .collect()
    }
}

#[derive(Debug)]
pub struct SimulatorTarget {
    candidates: Candidates,
    selected: Mutex<Option<Selection>>,
    lent: Mutex<Option<Arc<ResourceGuard>>>,
}

impl SimulatorTarget {
    pub fn new(platform: TestPlatform) -> Self {
        Self {
            candidates: Candidates::new(TargetKind::Simulator, platform),
            selected: Mutex::new(None),
            lent: Mutex::new(None),
        }
    }

    pub fn candidates(&self) -> &Candidates {
        &self.candidates
    }

    /// Lets the next run use an exclusive desktop lease held by someone else.
    pub fn lend(&self, guard: Arc<ResourceGuard>) {
        *lock(&self.lent) = Some(guard);
    }

    pub fn unlend(&self) {
        lock(&self.lent).take();
    }

    pub fn selected(&self) -> Option<Selection> {
        lock(&self.selected).clone()
    }

    /// Binds the task to the first candidate (and its companion for watch runs).
    pub async fn select(&self, task: &TestTask) -> Result<Selection, HarnessError> {
        let mut candidates = self.candidates.get();
        if candidates.is_empty() {
            candidates = self.candidates.load(task.harness()).await?;
        }
        let simulator = candidates
            .into_iter()
            .next()
            .ok_or_else(|| HarnessError::Collaborator("no simulator available".to_string()))?;
        let companion = self.candidates.companion_for(task.harness(), &simulator).await;
        task.set_targets(Some(simulator.clone()), companion.clone());

        let selection = Selection { simulator, companion };
        *lock(&self.selected) = Some(selection.clone());
        Ok(selection)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl RunTarget for SimulatorTarget {
    fn kind(&self) -> TaskKind {
        TaskKind::SimulatorRun
    }

    async fn verify(&self, task: &TestTask) -> Result<(), HarnessError> {
        self.candidates.verify(task).await
    }

    async fn run_test(&self, task: &TestTask, run: &RunTest<Self>) -> Result<(), HarnessError> {
        let harness = task.harness();
        let lent = lock(&self.lent).clone();

        let own_lease = match lent {
            Some(_) => None,
            None => Some(
                task.blocking_wait(harness.resources.desktop().acquire_exclusive())
                    .await?,
            ),
        };

        let selection = match (&own_lease, self.selected()) {
            (None, Some(selection)) => selection,
            _ => self.select(task).await?,
        };
        let targets = selection.targets();
        if own_lease.is_some() {
            harness
                .simulator_host
                .prepare(&targets, std::slice::from_ref(&run.settings().bundle_id))
                .await?;
        }
        info!(task_id = %task.id(), simulator = %selection.simulator.name, "running on simulator");

        let request = run.request(task, Some(selection.simulator.clone()), selection.companion.clone());
        let result = match harness.runner.run(&request).await {
            Ok(report) => apply_report(
                task,
                report,
                &format!("run-{}-{}.log", selection.simulator.id, harness.timestamp()),
            ),
            Err(e) => Err(e),
        };

        if own_lease.is_some() {
            for simulator in &targets {
                if let Err(e) = harness.simulator_host.shutdown(simulator).await {
                    warn!(task_id = %task.id(), simulator = %simulator.id, error = %e, "shutdown failed");
                }
            }
        }
        drop(own_lease);
        result
    }

    fn reset(&self) {
        lock(&self.selected).take();
        lock(&self.lent).take();
    }
}
