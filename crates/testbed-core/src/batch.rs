//! Simulator batch - 同じプラットフォームのシミュレータ実行をまとめて回す
//!
//! # 流れ
//! 1. 候補のないメンバーを Skipped にして外す（デスクトップを取る前）
//! 2. 残りのメンバーのビルドを並行に待つ
//! 3. デスクトップを排他で取り、シミュレータをまとめて準備する
//! 4. メンバーを順番に実行する（リースは各メンバーに貸し出す）
//! 5. 起動に失敗したメンバーは、対象プラットフォームなら 1 度だけやり直す
//!    - やり直しはリセット → 2. から（ビルドし直す間はデスクトップを返す）
//! 6. 毎サイクルの最後にシミュレータを落とし、残ったプロセスを掃除する
//!
//! # 結果
//! - 全員 Ignored → Ignored
//! - 誰か失敗 → Failed
//! - 全員 Skipped → Skipped
//! - それ以外 → Succeeded

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{info, warn};

use crate::broker::ResourceGuard;
use crate::domain::{Activity, Outcome, Stopwatch, TaskId, TaskKind, Target, TestPlatform};
use crate::error::HarnessError;
use crate::pipeline::{RunTest, SimulatorTarget};
use crate::task::{Executable, TestTask};

/// A simulator run-task and its body, which the batch drives directly.
#[derive(Clone)]
pub struct BatchMember {
    pub task: Arc<TestTask>,
    pub run: Arc<RunTest<SimulatorTarget>>,
}

pub struct SimulatorBatch {
    members: Vec<BatchMember>,
    build_timer: Mutex<Stopwatch>,
    run_timer: Mutex<Stopwatch>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl SimulatorBatch {
    pub fn new(members: Vec<BatchMember>) -> Self {
        Self {
            members,
            build_timer: Mutex::new(Stopwatch::default()),
            run_timer: Mutex::new(Stopwatch::default()),
        }
    }

    pub fn build_duration(&self) -> Duration {
        lock(&self.build_timer).elapsed()
    }

    pub fn run_duration(&self) -> Duration {
        lock(&self.run_timer).elapsed()
    }

    fn outcome(&self) -> Outcome {
        let active: Vec<_> = self.members.iter().filter(|m| !m.task.is_ignored()).collect();
        if active.is_empty() {
            Outcome::Ignored
        } else if active.iter().any(|m| m.task.is_failed()) {
            Outcome::Failed(None)
        } else if active.iter().all(|m| m.task.is_skipped()) {
            Outcome::Skipped
        } else {
            Outcome::Succeeded
        }
    }

    fn should_retry(task: &TestTask, retried: &mut HashSet<TaskId>) -> bool {
        !task.is_succeeded()
            && task.launched() == Some(false)
            // today extensions are launched through their host app; a second run does not help
            && task.platform() != TestPlatform::IosTodayExtension64
            && task.harness().config.retries_launch_failures(task.platform())
            && retried.insert(task.id())
    }

    /// One prepare / run / shut down cycle. Stops early when a member asks for a retry.
    async fn run_cycle(
        &self,
        task: &TestTask,
        queue: &mut VecDeque<&BatchMember>,
        lease: &Arc<ResourceGuard>,
        retried: &mut HashSet<TaskId>,
    ) -> Result<(), HarnessError> {
        let harness = task.harness();

        let mut simulators: Vec<Target> = Vec::new();
        let mut bundle_ids: Vec<String> = Vec::new();
        for member in queue.iter() {
            let selection = member.run.target().select(&member.task).await?;
            for target in selection.targets() {
                if !simulators.iter().any(|s| s.id == target.id) {
                    simulators.push(target);
                }
            }
            let bundle_id = &member.run.settings().bundle_id;
            if !bundle_ids.contains(bundle_id) {
                bundle_ids.push(bundle_id.clone());
            }
        }

        let result = async {
            harness.simulator_host.prepare(&simulators, &bundle_ids).await?;
            while let Some(&member) = queue.front() {
                member.run.target().lend(Arc::clone(lease));
                member.task.run().await;
                member.run.target().unlend();

                if Self::should_retry(&member.task, retried) {
                    info!(
                        batch_id = %task.id(),
                        task_id = %member.task.id(),
                        "tests did not launch, retrying once"
                    );
                    member.task.reset();
                    break;
                }
                queue.pop_front();
            }
            Ok(())
        }
        .await;

        for simulator in &simulators {
            if let Err(e) = harness.simulator_host.shutdown(simulator).await {
                warn!(batch_id = %task.id(), simulator = %simulator.id, error = %e, "shutdown failed");
            }
        }
        if let Err(e) = harness.simulator_host.kill_everything().await {
            warn!(batch_id = %task.id(), error = %e, "could not clean up simulator processes");
        }
        result
    }
}

#[async_trait]
impl Executable for SimulatorBatch {
    fn kind(&self) -> TaskKind {
        TaskKind::SimulatorBatch
    }

    async fn execute(&self, task: &TestTask) -> Result<(), HarnessError> {
        if self.members.iter().all(|m| m.task.is_ignored()) {
            task.finish(Outcome::Ignored);
            return Ok(());
        }

        let mut queue = VecDeque::new();
        for member in self.members.iter().filter(|m| !m.task.is_finished()) {
            member.run.target().candidates().verify(&member.task).await?;
            if !member.task.own_state().is_finished() {
                queue.push_back(member);
            }
        }

        let mut retried = HashSet::new();
        while !queue.is_empty() {
            task.set_activity(Activity::Building);
            lock(&self.build_timer).start();
            join_all(queue.iter().map(|m| m.run.build_async(&m.task))).await;
            lock(&self.build_timer).stop();
            // 終わったメンバーと、ビルド待ちの間に止められたメンバーを外す
            queue.retain(|m| m.task.own_state().is_in_progress());
            if queue.is_empty() {
                break;
            }

            let desktop = task.harness().resources.desktop();
            let lease = task
                .blocking_wait(async { desktop.acquire_exclusive().await.map(Arc::new) })
                .await?;
            task.set_activity(Activity::Running);
            lock(&self.run_timer).start();
            let cycle = self.run_cycle(task, &mut queue, &lease, &mut retried).await;
            lock(&self.run_timer).stop();
            drop(lease);
            cycle?;
        }

        let outcome = self.outcome();
        info!(
            batch_id = %task.id(),
            ?outcome,
            build_ms = self.build_duration().as_millis() as u64,
            run_ms = self.run_duration().as_millis() as u64,
            "simulator batch finished"
        );
        task.finish(outcome);
        Ok(())
    }

    fn reset(&self) {
        for member in self.members.iter().filter(|m| !m.task.is_ignored()) {
            member.task.reset();
        }
        lock(&self.build_timer).reset();
        lock(&self.run_timer).reset();
    }

    fn propagate_results(&self, task: &TestTask) {
        let state = task.own_state();
        let message = task.failure_message();
        for member in &self.members {
            member.task.set_state(state);
            member.task.set_failure_message(message.clone());
        }
    }

    fn members(&self) -> Vec<Arc<TestTask>> {
        self.members.iter().map(|m| Arc::clone(&m.task)).collect()
    }
}
