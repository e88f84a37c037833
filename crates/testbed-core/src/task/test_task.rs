//! TestTask - 全タスク共通のライフサイクル
//!
//! # 設計
//! - 試行（Attempt）は追記のみ。`current` が常に存在するので「空のリスト」は型で起こらない
//! - `run()` は tokio::spawn した実行を `Shared` で包んで返す。2 回目以降は同じ future を返す
//! - リソース待ちは `blocking_wait` を通す。待っている間は時計を止めて waiting フラグを立てる
//! - 取得したガードは `Held` に包まれ、Drop 時にその試行の時計を止める
//! - 状態のロック（std Mutex）を持ったまま await しない
//!
//! # 実行プロトコル
//! 1. 終了済みなら何もしない
//! 2. InProgress(Preparing)
//! 3. dependency → setup
//! 4. 事前チェック（ディスク容量 → 本体固有の verify）。ここで終了したら打ち切り
//! 5. 時計を開始して本体を実行
//! 6. completion
//! 7. 結果が設定されていなければ `ResultNotSet`
//!
//! 3〜7 のエラーは HarnessException としてこの試行に記録し、スケジューラへは漏らさない。

use std::future::Future;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use super::executable::{Executable, TaskHooks};
use crate::domain::logs::append_lines;
use crate::domain::{
    Activity, Attempt, AttemptLogs, ExecutionState, FailureKind, LogEntry, Outcome, TaskId,
    TaskKind, Target, TestPlatform,
};
use crate::error::HarnessError;
use crate::harness::Harness;
use crate::observability::TaskSnapshot;

const MB: f64 = 1024.0 * 1024.0;

/// Completion of one `run()`; cloneable so every caller awaits the same execution.
pub type RunFuture = Shared<BoxFuture<'static, ()>>;

/// Descriptive part of a task.
#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub test_name: String,
    /// Platform/configuration tag ("iOS Unified 64-bits", "Debug", ...).
    pub mode: String,
    pub variation: Option<String>,
    pub platform: TestPlatform,
    pub project_path: String,
}

impl TaskInfo {
    pub fn new(test_name: impl Into<String>, mode: impl Into<String>, platform: TestPlatform) -> Self {
        Self {
            test_name: test_name.into(),
            mode: mode.into(),
            variation: None,
            platform,
            project_path: String::new(),
        }
    }

    pub fn with_variation(mut self, variation: impl Into<String>) -> Self {
        self.variation = Some(variation.into());
        self
    }

    pub fn with_project_path(mut self, path: impl Into<String>) -> Self {
        self.project_path = path.into();
        self
    }

    /// `[test name, mode, variation]`, without the missing parts.
    pub fn path(&self) -> Vec<String> {
        let mut rv = vec![self.test_name.clone()];
        if !self.mode.is_empty() {
            rv.push(self.mode.clone());
        }
        if let Some(v) = &self.variation {
            rv.push(v.clone());
        }
        rv
    }
}

// ========================================
// 試行の履歴
// ========================================

#[derive(Debug, Default)]
struct History {
    previous: Vec<Attempt>,
    current: Attempt,
}

impl History {
    fn current_index(&self) -> usize {
        self.previous.len()
    }

    fn len(&self) -> usize {
        self.previous.len() + 1
    }

    fn get(&self, index: usize) -> Option<&Attempt> {
        if index == self.previous.len() {
            Some(&self.current)
        } else {
            self.previous.get(index)
        }
    }

    fn get_mut(&mut self, index: usize) -> Option<&mut Attempt> {
        if index == self.previous.len() {
            Some(&mut self.current)
        } else {
            self.previous.get_mut(index)
        }
    }

    /// Archives the current attempt and starts an empty one.
    fn push_new(&mut self) {
        if self.current.clock_running() {
            self.current.stop_clock();
        }
        if let Some(logs) = self.current.logs.as_mut() {
            logs.close();
        }
        let finished = std::mem::take(&mut self.current);
        self.previous.push(finished);
    }
}

struct Inflight {
    future: RunFuture,
    abort: AbortHandle,
}

/// A schedulable unit: identity, descriptive info, attempts and a body.
pub struct TestTask {
    id: TaskId,
    info: TaskInfo,
    harness: Arc<Harness>,
    runs: Mutex<History>,
    inflight: Mutex<Option<Inflight>>,
    hooks: TaskHooks,
    body: Arc<dyn Executable>,
}

impl TestTask {
    pub fn new(id: TaskId, info: TaskInfo, harness: Arc<Harness>, body: Arc<dyn Executable>) -> Self {
        Self {
            id,
            info,
            harness,
            runs: Mutex::new(History::default()),
            inflight: Mutex::new(None),
            hooks: TaskHooks::default(),
            body,
        }
    }

    pub fn with_hooks(mut self, hooks: TaskHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Ignored tasks stay visible and selectable but never execute.
    pub fn ignored(self, ignored: bool) -> Self {
        if ignored {
            self.lock_runs().current.state = ExecutionState::Finished(Outcome::Ignored);
        }
        self
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn info(&self) -> &TaskInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.test_name
    }

    pub fn path(&self) -> Vec<String> {
        self.info.path()
    }

    pub fn platform(&self) -> TestPlatform {
        self.info.platform
    }

    pub fn kind(&self) -> TaskKind {
        self.body.kind()
    }

    pub fn harness(&self) -> &Arc<Harness> {
        &self.harness
    }

    pub fn members(&self) -> Vec<Arc<TestTask>> {
        self.body.members()
    }

    fn lock_runs(&self) -> MutexGuard<'_, History> {
        self.runs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_inflight(&self) -> MutexGuard<'_, Option<Inflight>> {
        self.inflight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_current<R>(&self, f: impl FnOnce(&mut Attempt) -> R) -> R {
        f(&mut self.lock_runs().current)
    }

    fn with_attempt_mut(&self, index: usize, f: impl FnOnce(&mut Attempt)) {
        if let Some(attempt) = self.lock_runs().get_mut(index) {
            f(attempt);
        }
    }

    // ========================================
    // 状態の参照
    // ========================================

    /// State recorded on the current attempt, without any overlay.
    pub fn own_state(&self) -> ExecutionState {
        self.with_current(|a| a.state)
    }

    /// Effective state: the body may present a dependency's progress while
    /// this task has not finished.
    pub fn state(&self) -> ExecutionState {
        let own = self.own_state();
        if own.is_finished() {
            own
        } else {
            self.body.overlay(own)
        }
    }

    pub fn is_not_started(&self) -> bool {
        self.state().is_not_started()
    }

    pub fn is_in_progress(&self) -> bool {
        self.state().is_in_progress()
    }

    pub fn is_waiting(&self) -> bool {
        self.state().is_waiting()
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_finished()
    }

    pub fn is_building(&self) -> bool {
        self.state().is_building()
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    pub fn is_succeeded(&self) -> bool {
        self.state().is_succeeded()
    }

    pub fn is_failed(&self) -> bool {
        self.state().is_failed()
    }

    pub fn is_ignored(&self) -> bool {
        self.state().is_ignored()
    }

    pub fn is_skipped(&self) -> bool {
        self.state().is_skipped()
    }

    pub fn is_crashed(&self) -> bool {
        self.state().is_crashed()
    }

    pub fn is_timed_out(&self) -> bool {
        self.state().is_timed_out()
    }

    pub fn is_build_failure(&self) -> bool {
        self.state().is_build_failure()
    }

    pub fn is_harness_exception(&self) -> bool {
        self.state().is_harness_exception()
    }

    pub fn failure_message(&self) -> Option<String> {
        self.with_current(|a| a.failure_message.clone())
    }

    /// Whether the payload launched in the current attempt (None until reported).
    pub fn launched(&self) -> Option<bool> {
        self.with_current(|a| a.launched)
    }

    pub fn target(&self) -> Option<Target> {
        self.with_current(|a| a.target.clone())
    }

    pub fn companion(&self) -> Option<Target> {
        self.with_current(|a| a.companion.clone())
    }

    pub fn duration(&self) -> Duration {
        self.with_current(|a| a.duration())
    }

    pub fn attempt_count(&self) -> usize {
        self.lock_runs().len()
    }

    /// Reads one attempt (0 is the first). Earlier attempts never change.
    pub fn with_attempt<R>(&self, index: usize, f: impl FnOnce(&Attempt) -> R) -> Option<R> {
        self.lock_runs().get(index).map(f)
    }

    /// True while a `run()` is spawned and has not completed.
    pub fn is_executing(&self) -> bool {
        self.lock_inflight()
            .as_ref()
            .is_some_and(|f| f.future.peek().is_none())
    }

    // ========================================
    // 状態の更新
    // ========================================

    pub fn set_state(&self, state: ExecutionState) {
        self.with_current(|a| a.state = state);
        self.harness.notify_changed();
    }

    pub fn set_activity(&self, activity: Activity) {
        self.set_state(ExecutionState::in_progress(activity));
    }

    pub fn finish(&self, outcome: Outcome) {
        self.set_state(ExecutionState::Finished(outcome));
    }

    pub fn finish_with_message(&self, outcome: Outcome, message: impl Into<String>) {
        let message = message.into();
        self.with_current(|a| {
            a.state = ExecutionState::Finished(outcome);
            a.failure_message = Some(message);
        });
        self.harness.notify_changed();
    }

    pub fn fail(&self, kind: FailureKind, message: impl Into<String>) {
        self.finish_with_message(Outcome::failed(kind), message);
    }

    pub fn set_failure_message(&self, message: Option<String>) {
        self.with_current(|a| a.failure_message = message);
    }

    pub fn set_targets(&self, target: Option<Target>, companion: Option<Target>) {
        self.with_current(|a| {
            a.target = target;
            a.companion = companion;
        });
        self.harness.notify_changed();
    }

    pub fn record_launch(&self, launched: bool) {
        self.with_current(|a| a.launched = Some(launched));
    }

    pub fn start_clock(&self) {
        self.with_current(|a| a.start_clock());
    }

    pub fn stop_clock(&self) {
        self.with_current(|a| a.stop_clock());
    }

    /// Zeroes the duration of the current attempt (build time is not run time).
    pub fn reset_clock(&self) {
        self.with_current(|a| a.reset_clock());
    }

    /// Select / deselect. Only moves between NotStarted and Ignored.
    pub fn set_ignored(&self, ignored: bool) -> bool {
        let changed = self.with_current(|a| match (ignored, a.state) {
            (true, ExecutionState::NotStarted) => {
                a.state = ExecutionState::Finished(Outcome::Ignored);
                true
            }
            (false, ExecutionState::Finished(Outcome::Ignored)) => {
                a.state = ExecutionState::NotStarted;
                true
            }
            _ => false,
        });
        if changed {
            self.harness.notify_changed();
        }
        changed
    }

    // ========================================
    // ログ
    // ========================================

    /// Creates an empty log file owned by the current attempt.
    pub fn create_log(&self, file_name: &str, description: &str) -> Result<PathBuf, HarnessError> {
        let directory = self.harness.log_directory_for(&self.info.test_name, self.id);
        let path = self.with_current(|a| {
            a.logs
                .get_or_insert_with(|| AttemptLogs::new(directory))
                .create(file_name, description)
        })?;
        Ok(path)
    }

    pub fn append_log<I, S>(&self, path: &Path, lines: I) -> Result<(), HarnessError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        append_lines(path, lines)?;
        Ok(())
    }

    /// Creates a log file and fills it.
    pub fn write_log<I, S>(&self, file_name: &str, description: &str, lines: I) -> Result<PathBuf, HarnessError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let path = self.create_log(file_name, description)?;
        self.append_log(&path, lines)?;
        Ok(path)
    }

    /// Registers a file produced outside the harness.
    pub fn add_log_file(&self, path: impl Into<PathBuf>, description: &str) {
        let directory = self.harness.log_directory_for(&self.info.test_name, self.id);
        let path = path.into();
        self.with_current(|a| {
            a.logs
                .get_or_insert_with(|| AttemptLogs::new(directory))
                .add_file(path, description)
        });
    }

    pub fn log_entries(&self) -> Vec<LogEntry> {
        self.with_current(|a| {
            a.logs
                .as_ref()
                .map(|l| l.entries().to_vec())
                .unwrap_or_default()
        })
    }

    fn close_logs(&self) {
        self.with_current(|a| {
            if let Some(logs) = a.logs.as_mut() {
                logs.close();
            }
        });
    }

    // ========================================
    // 事前チェック
    // ========================================

    /// Fails the task when the disk root is below the configured minimum.
    /// A probe error is logged and treated as "enough space".
    pub fn verify_disk_space(&self) -> bool {
        let config = &self.harness.config;
        match self.harness.disk.available_bytes(&config.disk_root) {
            Ok(free) if free < config.min_free_disk_bytes => {
                let message = format!(
                    "Not enough space on the root drive '{}': {:.2} MB left of {:.2} MB required",
                    config.disk_root.display(),
                    free as f64 / MB,
                    config.min_free_disk_bytes as f64 / MB,
                );
                warn!(task_id = %self.id, free, "{message}");
                self.finish_with_message(Outcome::Failed(None), message);
                false
            }
            Ok(_) => true,
            Err(e) => {
                warn!(task_id = %self.id, error = %e, "could not read free disk space");
                true
            }
        }
    }

    // ========================================
    // リソース待ち
    // ========================================

    /// Awaits an acquisition with the clock paused and the waiting flag set.
    ///
    /// The returned [`Held`] stops this attempt's clock when dropped.
    pub async fn blocking_wait<G, F>(&self, acquire: F) -> Result<Held<'_, G>, HarnessError>
    where
        F: Future<Output = Result<G, HarnessError>>,
    {
        let index = {
            let mut runs = self.lock_runs();
            let index = runs.current_index();
            runs.current.stop_clock();
            runs.current.state = runs.current.state.with_waiting(true);
            index
        };
        self.harness.notify_changed();

        let marker = WaitMarker { task: self, index };
        let acquired = acquire.await;
        drop(marker);

        let guard = acquired?;
        {
            let mut runs = self.lock_runs();
            // 取得までの間に stop() で試行が差し替えられた
            if runs.current_index() != index {
                debug!(task_id = %self.id, "stopped while waiting, releasing");
                return Err(HarnessError::Stopped);
            }
            runs.current.start_clock();
        }
        Ok(Held {
            guard,
            task: self,
            index,
        })
    }

    // ========================================
    // 実行・リセット・停止
    // ========================================

    /// Starts the task unless it is already started; returns the completion.
    ///
    /// Must be called inside a tokio runtime.
    pub fn run(self: &Arc<Self>) -> RunFuture {
        let mut inflight = self.lock_inflight();
        if let Some(current) = inflight.as_ref() {
            return current.future.clone();
        }

        let task = Arc::clone(self);
        let join = tokio::spawn(async move { task.run_internal().await });
        let abort = join.abort_handle();
        let id = self.id;
        let index = self.lock_runs().current_index();
        let weak = Arc::downgrade(self);
        let future = async move {
            match join.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => debug!(task_id = %id, "run was cancelled"),
                Err(e) => {
                    error!(task_id = %id, error = %e, "run panicked");
                    if let Some(task) = weak.upgrade() {
                        task.fail_panicked(index);
                    }
                }
            }
        }
        .boxed()
        .shared();

        *inflight = Some(Inflight {
            future: future.clone(),
            abort,
        });
        future
    }

    /// Records a panicked run on its attempt so nothing waits on it forever.
    fn fail_panicked(&self, index: usize) {
        {
            let mut runs = self.lock_runs();
            if runs.current_index() != index || runs.current.state.is_finished() {
                return;
            }
            runs.current.state = ExecutionState::Finished(Outcome::failed(FailureKind::HarnessException));
            runs.current.failure_message = Some(format!("Harness exception for '{}': the run panicked", self.name()));
            if runs.current.clock_running() {
                runs.current.stop_clock();
            }
        }
        self.close_logs();
        self.harness.notify_changed();
    }

    async fn run_internal(&self) {
        if self.is_finished() {
            return;
        }
        info!(task_id = %self.id, name = %self.name(), mode = %self.info.mode, "task started");
        self.set_activity(Activity::Preparing);

        match self.run_steps().await {
            Ok(()) => {}
            Err(HarnessError::Stopped) => {
                // 新しい試行はもう別物。何も記録しない
                debug!(task_id = %self.id, "run ended by stop");
                return;
            }
            Err(e) => self.record_exception(e),
        }

        self.close_logs();
        self.stop_clock();
        self.harness.notify_changed();
        info!(
            task_id = %self.id,
            name = %self.name(),
            state = ?self.own_state(),
            duration_ms = self.duration().as_millis() as u64,
            "task finished"
        );
    }

    fn record_exception(&self, e: HarnessError) {
        let message = format!("Harness exception for '{}': {e}", self.name());
        error!(task_id = %self.id, "{message}");
        self.fail(FailureKind::HarnessException, message.clone());
        if let Err(log_err) = self.write_log("execution-failure.log", "Execution failure", [message]) {
            warn!(task_id = %self.id, error = %log_err, "could not write the execution failure log");
        }
        self.body.propagate_results(self);
    }

    async fn run_steps(&self) -> Result<(), HarnessError> {
        if let Some(hook) = &self.hooks.dependency {
            hook.call(self).await?;
        }
        if let Some(hook) = &self.hooks.setup {
            hook.call(self).await?;
        }

        if !self.verify_disk_space() {
            return Ok(());
        }
        self.body.verify(self).await?;
        if self.own_state().is_finished() {
            return Ok(());
        }

        self.start_clock();
        self.body.execute(self).await?;

        if let Some(hook) = &self.hooks.completion {
            hook.call(self).await?;
        }

        if !self.own_state().is_finished() {
            return Err(HarnessError::ResultNotSet(self.name().to_string()));
        }
        Ok(())
    }

    /// Prepares the task to run again.
    ///
    /// An ignored task goes back to NotStarted in place; any other started task
    /// gets a fresh attempt and keeps the old one as history.
    pub fn reset(&self) {
        self.abort_inflight();
        let new_attempt = {
            let mut runs = self.lock_runs();
            if runs.current.state.is_ignored() {
                runs.current.state = ExecutionState::NotStarted;
                false
            } else if !runs.current.state.is_not_started() {
                runs.push_new();
                true
            } else {
                false
            }
        };
        self.body.reset();
        debug!(task_id = %self.id, new_attempt, "task reset");
        self.harness.notify_changed();
    }

    fn abort_inflight(&self) {
        if let Some(inflight) = self.lock_inflight().take() {
            inflight.abort.abort();
        }
    }

    /// Cancels a task that is still queued for a resource.
    ///
    /// Returns false (and does nothing) once the task is past its waits. The
    /// waiting flag is checked and the attempt archived under one lock, so a
    /// wait that completes concurrently sees a newer attempt and gives up.
    pub fn stop(&self) -> bool {
        {
            let mut runs = self.lock_runs();
            let own = runs.current.state;
            let state = if own.is_finished() { own } else { self.body.overlay(own) };
            if !state.is_waiting() {
                return false;
            }
            runs.push_new();
        }
        info!(task_id = %self.id, name = %self.name(), "stopping queued task");
        self.abort_inflight();
        self.body.reset();
        self.harness.notify_changed();
        true
    }

    /// True while the task runs on its own or is driven by a batch or dependency.
    pub fn is_busy(&self) -> bool {
        self.is_executing() || self.own_state().is_in_progress()
    }

    pub fn snapshot(&self, parent: Option<TaskId>) -> TaskSnapshot {
        let state = self.state();
        let kind = self.body.kind();
        let runs = self.lock_runs();
        let current = &runs.current;
        TaskSnapshot {
            id: self.id,
            name: self.info.test_name.clone(),
            path: self.info.path(),
            kind,
            platform: self.info.platform,
            phase: state.phase(),
            activity: state.activity(),
            outcome: state.outcome(),
            failure_kind: state.failure_kind(),
            failure_message: current.failure_message.clone(),
            attempts: runs.len(),
            duration_ms: current.duration().as_millis() as u64,
            started_at: current.started_at,
            ended_at: current.ended_at,
            target: current.target.as_ref().map(|t| t.name.clone()),
            parent,
        }
    }
}

impl std::fmt::Debug for TestTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestTask")
            .field("id", &self.id)
            .field("path", &self.info.path())
            .field("state", &self.own_state())
            .finish()
    }
}

/// Clears the waiting flag of one attempt, also when the wait is cancelled.
struct WaitMarker<'a> {
    task: &'a TestTask,
    index: usize,
}

impl Drop for WaitMarker<'_> {
    fn drop(&mut self) {
        self.task.with_attempt_mut(self.index, |a| {
            a.state = a.state.with_waiting(false);
        });
        self.task.harness.notify_changed();
    }
}

/// A guard acquired through [`TestTask::blocking_wait`].
pub struct Held<'a, G> {
    guard: G,
    task: &'a TestTask,
    index: usize,
}

impl<G> Deref for Held<'_, G> {
    type Target = G;

    fn deref(&self) -> &G {
        &self.guard
    }
}

impl<G> Drop for Held<'_, G> {
    fn drop(&mut self) {
        self.task.with_attempt_mut(self.index, |a| a.stop_clock());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::broker::Resource;
    use crate::task::{TaskHook, TaskHooks};
    use crate::testing::Fixture;

    #[derive(Default)]
    struct Scripted {
        outcome: Option<Outcome>,
        error: Option<String>,
        skip: bool,
        gate: Option<Resource>,
        calls: AtomicUsize,
        propagated: AtomicBool,
    }

    #[async_trait]
    impl Executable for Scripted {
        fn kind(&self) -> TaskKind {
            TaskKind::DesktopRun
        }

        async fn verify(&self, task: &TestTask) -> Result<(), HarnessError> {
            if self.skip {
                task.finish_with_message(Outcome::Skipped, "No applicable devices found.");
            }
            Ok(())
        }

        async fn execute(&self, task: &TestTask) -> Result<(), HarnessError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                let _held = task.blocking_wait(gate.acquire_concurrent()).await?;
            }
            if let Some(e) = &self.error {
                return Err(HarnessError::Collaborator(e.clone()));
            }
            if let Some(outcome) = self.outcome {
                task.finish(outcome);
            }
            Ok(())
        }

        fn propagate_results(&self, _task: &TestTask) {
            self.propagated.store(true, Ordering::SeqCst);
        }
    }

    fn task(fx: &Fixture, body: Arc<Scripted>) -> Arc<TestTask> {
        Arc::new(TestTask::new(
            TaskId::from_u64(1),
            TaskInfo::new("monotouch-test", "Debug", TestPlatform::MacUnified),
            Arc::clone(&fx.harness),
            body,
        ))
    }

    async fn until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn run_records_the_body_outcome() {
        let fx = Fixture::new();
        let body = Arc::new(Scripted {
            outcome: Some(Outcome::Succeeded),
            ..Scripted::default()
        });
        let t = task(&fx, Arc::clone(&body));

        t.run().await;

        assert!(t.is_succeeded());
        assert_eq!(t.attempt_count(), 1);
        assert!(t.with_attempt(0, |a| !a.clock_running() && a.started_at.is_some()).unwrap());
    }

    #[tokio::test]
    async fn run_is_idempotent() {
        let fx = Fixture::new();
        let body = Arc::new(Scripted {
            outcome: Some(Outcome::Succeeded),
            ..Scripted::default()
        });
        let t = task(&fx, Arc::clone(&body));

        let first = t.run();
        let second = t.run();
        first.await;
        second.await;
        t.run().await;

        assert_eq!(body.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn body_without_outcome_is_a_harness_exception() {
        let fx = Fixture::new();
        let t = task(&fx, Arc::new(Scripted::default()));

        t.run().await;

        assert!(t.is_harness_exception());
        let msg = t.failure_message().unwrap();
        assert!(msg.starts_with("Harness exception for 'monotouch-test'"));
        assert!(msg.contains("result not set"));
    }

    #[tokio::test]
    async fn body_error_is_recorded_and_propagated() {
        let fx = Fixture::new();
        let body = Arc::new(Scripted {
            error: Some("simctl exploded".into()),
            ..Scripted::default()
        });
        let t = task(&fx, Arc::clone(&body));

        t.run().await;

        assert!(t.is_failed());
        assert!(t.is_harness_exception());
        assert!(t.failure_message().unwrap().contains("simctl exploded"));
        assert!(body.propagated.load(Ordering::SeqCst));

        let logs = t.log_entries();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].description, "Execution failure");
        let text = std::fs::read_to_string(&logs[0].path).unwrap();
        assert!(text.contains("simctl exploded"));
    }

    #[tokio::test]
    async fn reset_appends_an_attempt_and_keeps_history() {
        let fx = Fixture::new();
        let body = Arc::new(Scripted {
            error: Some("boom".into()),
            ..Scripted::default()
        });
        let t = task(&fx, body);
        t.run().await;
        let first_started = t.with_attempt(0, |a| a.started_at).unwrap();

        t.reset();

        assert_eq!(t.attempt_count(), 2);
        assert!(t.is_not_started());
        assert!(t.failure_message().is_none());
        t.with_attempt(0, |a| {
            assert!(a.state.is_harness_exception());
            assert!(a.failure_message.as_deref().unwrap().contains("boom"));
            assert_eq!(a.started_at, first_started);
        })
        .unwrap();
    }

    #[tokio::test]
    async fn reset_of_an_ignored_task_adds_no_attempt() {
        let fx = Fixture::new();
        let t = Arc::new(
            TestTask::new(
                TaskId::from_u64(3),
                TaskInfo::new("ignored", "Debug", TestPlatform::Mac),
                Arc::clone(&fx.harness),
                Arc::new(Scripted::default()),
            )
            .ignored(true),
        );
        assert!(t.is_ignored());

        t.reset();

        assert!(t.is_not_started());
        assert_eq!(t.attempt_count(), 1);
    }

    #[tokio::test]
    async fn ignored_task_does_not_execute() {
        let fx = Fixture::new();
        let body = Arc::new(Scripted {
            outcome: Some(Outcome::Succeeded),
            ..Scripted::default()
        });
        let t = Arc::new(
            TestTask::new(
                TaskId::from_u64(3),
                TaskInfo::new("ignored", "Debug", TestPlatform::Mac),
                Arc::clone(&fx.harness),
                body.clone(),
            )
            .ignored(true),
        );

        t.run().await;

        assert!(t.is_ignored());
        assert_eq!(body.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn low_disk_space_fails_before_the_body() {
        let fx = Fixture::builder().free_bytes(10 * 1024 * 1024).build();
        let body = Arc::new(Scripted {
            outcome: Some(Outcome::Succeeded),
            ..Scripted::default()
        });
        let t = task(&fx, Arc::clone(&body));

        t.run().await;

        assert!(t.is_failed());
        let msg = t.failure_message().unwrap();
        assert!(msg.starts_with("Not enough space on the root drive"), "{msg}");
        assert!(msg.contains("10.00 MB left of 1024.00 MB required"), "{msg}");
        assert_eq!(body.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn verify_can_skip_the_task() {
        let fx = Fixture::new();
        let body = Arc::new(Scripted {
            skip: true,
            outcome: Some(Outcome::Succeeded),
            ..Scripted::default()
        });
        let t = task(&fx, Arc::clone(&body));

        t.run().await;

        assert!(t.is_skipped());
        assert_eq!(t.failure_message().as_deref(), Some("No applicable devices found."));
        assert_eq!(body.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn waiting_flag_is_set_only_while_queued() {
        let fx = Fixture::new();
        let gate = Resource::new("device", 1);
        let holder = gate.acquire_concurrent().await.unwrap();
        let body = Arc::new(Scripted {
            gate: Some(gate.clone()),
            outcome: Some(Outcome::Succeeded),
            ..Scripted::default()
        });
        let t = task(&fx, body);

        let done = t.run();
        until(|| t.is_waiting()).await;
        assert!(t.with_attempt(0, |a| !a.clock_running()).unwrap());

        drop(holder);
        done.await;
        assert!(!t.is_waiting());
        assert!(t.is_succeeded());
        assert_eq!(gate.users(), 0);
    }

    #[tokio::test]
    async fn stop_cancels_a_queued_task_only() {
        let fx = Fixture::new();
        let gate = Resource::new("device", 1);
        let holder = gate.acquire_concurrent().await.unwrap();
        let body = Arc::new(Scripted {
            gate: Some(gate.clone()),
            outcome: Some(Outcome::Succeeded),
            ..Scripted::default()
        });
        let t = task(&fx, body);

        let done = t.run();
        until(|| t.is_waiting()).await;

        assert!(t.stop());
        done.await;
        assert!(t.is_not_started());
        assert_eq!(t.attempt_count(), 2);
        assert!(!t.is_executing());

        // the cancelled waiter must not keep the device after its holder leaves
        drop(holder);
        assert_eq!(gate.users(), 0);

        // not waiting any more: stop is refused
        assert!(!t.stop());
    }

    /// Gets stopped right as its acquisition completes.
    struct StoppedOnAcquire {
        gate: Resource,
        stopped: AtomicBool,
        saw_stop: AtomicBool,
    }

    #[async_trait]
    impl Executable for StoppedOnAcquire {
        fn kind(&self) -> TaskKind {
            TaskKind::DesktopRun
        }

        async fn execute(&self, task: &TestTask) -> Result<(), HarnessError> {
            let held = task
                .blocking_wait(async {
                    let guard = self.gate.acquire_concurrent().await;
                    self.stopped.store(task.stop(), Ordering::SeqCst);
                    guard
                })
                .await;
            self.saw_stop
                .store(matches!(held, Err(HarnessError::Stopped)), Ordering::SeqCst);
            let _held = held?;
            task.finish(Outcome::Succeeded);
            Ok(())
        }
    }

    #[tokio::test]
    async fn wait_that_completes_after_a_stop_gives_up() {
        let fx = Fixture::new();
        let gate = Resource::new("device", 1);
        let body = Arc::new(StoppedOnAcquire {
            gate: gate.clone(),
            stopped: AtomicBool::new(false),
            saw_stop: AtomicBool::new(false),
        });
        let t = Arc::new(TestTask::new(
            TaskId::from_u64(1),
            TaskInfo::new("monotouch-test", "Debug", TestPlatform::MacUnified),
            Arc::clone(&fx.harness),
            body.clone(),
        ));

        tokio::time::timeout(Duration::from_secs(5), t.run()).await.unwrap();

        assert!(body.stopped.load(Ordering::SeqCst));
        assert!(body.saw_stop.load(Ordering::SeqCst));
        assert!(t.is_not_started());
        assert_eq!(t.attempt_count(), 2);
        // the stopped attempt records neither an outcome nor a harness exception
        t.with_attempt(0, |a| {
            assert!(!a.state.is_finished());
            assert!(!a.state.is_waiting());
            assert!(a.failure_message.is_none());
        })
        .unwrap();
        assert_eq!(gate.users(), 0);
    }

    struct Record(&'static str, Arc<Mutex<Vec<&'static str>>>);

    #[async_trait]
    impl TaskHook for Record {
        async fn call(&self, _task: &TestTask) -> Result<(), HarnessError> {
            self.1.lock().unwrap().push(self.0);
            Ok(())
        }
    }

    #[tokio::test]
    async fn hooks_run_in_protocol_order() {
        let fx = Fixture::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let hooks = TaskHooks::new()
            .completion(Arc::new(Record("completion", Arc::clone(&seen))))
            .setup(Arc::new(Record("setup", Arc::clone(&seen))))
            .dependency(Arc::new(Record("dependency", Arc::clone(&seen))));
        let t = Arc::new(
            TestTask::new(
                TaskId::from_u64(5),
                TaskInfo::new("hooks", "Debug", TestPlatform::Mac),
                Arc::clone(&fx.harness),
                Arc::new(Scripted {
                    outcome: Some(Outcome::Succeeded),
                    ..Scripted::default()
                }),
            )
            .with_hooks(hooks),
        );

        t.run().await;

        assert_eq!(*seen.lock().unwrap(), vec!["dependency", "setup", "completion"]);
        assert!(t.is_succeeded());
    }

    #[test]
    fn path_skips_missing_parts() {
        let info = TaskInfo::new("xammac", "Mac_Unified", TestPlatform::MacUnified);
        assert_eq!(info.path(), vec!["xammac", "Mac_Unified"]);
        let info = info.with_variation("Release (all optimizations)");
        assert_eq!(info.path().len(), 3);
    }
}
