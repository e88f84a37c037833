//! Run phase: build first, then hand over to a target-specific runner.
//!
//! # 設計
//! - `RunTest<T>` が共通部分（ビルド待ち、build-only、時計のリセット）を持つ
//! - `T: RunTarget` がデスクトップ / デバイス / シミュレータごとの差分を持つ
//! - ビルドタスクは別の `TestTask`。複数の RunTest が同じビルドを共有することがある
//! - ビルドが進行中（または待ち）の間、観測される状態はビルドの状態になる

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::domain::{Activity, ExecutionState, FailureKind, Outcome, TaskKind, Target};
use crate::error::HarnessError;
use crate::ports::{RunReport, RunRequest, RunStatus};
use crate::task::{Executable, TestTask};

/// What the runner needs besides the target.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub bundle_id: String,
    pub configuration: String,
    pub executable: Option<String>,
    pub environment: BTreeMap<String, String>,
    pub build_only: bool,
}

impl RunSettings {
    pub fn new(bundle_id: impl Into<String>, configuration: impl Into<String>) -> Self {
        Self {
            bundle_id: bundle_id.into(),
            configuration: configuration.into(),
            executable: None,
            environment: BTreeMap::new(),
            build_only: false,
        }
    }
}

/// Target-specific half of a run-task.
#[async_trait]
pub trait RunTarget: Send + Sync + Sized + 'static {
    fn kind(&self) -> TaskKind;

    async fn verify(&self, _task: &TestTask) -> Result<(), HarnessError> {
        Ok(())
    }

    /// Runs the built app. Called with the task marked Running.
    async fn run_test(&self, task: &TestTask, run: &RunTest<Self>) -> Result<(), HarnessError>;

    fn reset(&self) {}
}

pub struct RunTest<T> {
    build: Arc<TestTask>,
    settings: RunSettings,
    target: T,
}

impl<T: RunTarget> RunTest<T> {
    pub fn new(build: Arc<TestTask>, settings: RunSettings, target: T) -> Self {
        Self {
            build,
            settings,
            target,
        }
    }

    pub fn build_task(&self) -> &Arc<TestTask> {
        &self.build
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn request(&self, task: &TestTask, target: Option<Target>, companion: Option<Target>) -> RunRequest {
        RunRequest {
            test_name: task.name().to_string(),
            project_path: task.info().project_path.clone(),
            bundle_id: self.settings.bundle_id.clone(),
            platform: task.platform(),
            configuration: self.settings.configuration.clone(),
            target,
            companion,
            executable: self.settings.executable.clone(),
            environment: self.settings.environment.clone(),
            timeout: task.harness().config.run_timeout(),
        }
    }

    /// Runs (or joins) the build and maps its result onto `task`.
    ///
    /// Returns whether the run may proceed. A task stopped while its build was
    /// queued gets false and keeps its fresh, not started attempt.
    pub async fn build_async(&self, task: &TestTask) -> bool {
        let attempt = task.attempt_count();
        task.set_activity(Activity::Building);
        loop {
            self.build.run().await;
            if self.build.own_state().is_finished() {
                break;
            }
            if task.attempt_count() != attempt {
                debug!(task_id = %task.id(), build_id = %self.build.id(), "stopped while the build was queued");
                return false;
            }
            // 共有ビルドが別のタスクの stop でリセットされた
            debug!(task_id = %task.id(), build_id = %self.build.id(), "build was reset, starting it again");
        }

        let build = self.build.own_state();
        match build.outcome() {
            Some(Outcome::Succeeded | Outcome::BuildSucceeded) => {
                if self.settings.build_only {
                    task.finish(Outcome::BuildSucceeded);
                } else {
                    task.set_activity(Activity::Built);
                }
                true
            }
            _ => {
                let kind = if build.is_timed_out() {
                    FailureKind::TimedOut
                } else {
                    FailureKind::BuildFailure
                };
                let message = self
                    .build
                    .failure_message()
                    .unwrap_or_else(|| "Build failed.".to_string());
                task.fail(kind, message);
                false
            }
        }
    }
}

#[async_trait]
impl<T: RunTarget> Executable for RunTest<T> {
    fn kind(&self) -> TaskKind {
        self.target.kind()
    }

    async fn verify(&self, task: &TestTask) -> Result<(), HarnessError> {
        self.target.verify(task).await
    }

    async fn execute(&self, task: &TestTask) -> Result<(), HarnessError> {
        if !self.build_async(task).await {
            return Ok(());
        }
        if self.settings.build_only {
            task.finish(Outcome::Succeeded);
            return Ok(());
        }

        task.set_activity(Activity::Running);
        task.reset_clock();
        task.start_clock();
        self.target.run_test(task, self).await
    }

    fn overlay(&self, own: ExecutionState) -> ExecutionState {
        let build = self.build.state();
        if build.is_in_progress() {
            ExecutionState::InProgress {
                activity: Activity::Building,
                waiting: build.is_waiting(),
            }
        } else {
            own
        }
    }

    fn reset(&self) {
        self.build.reset();
        self.target.reset();
    }
}

static FAILURE_REASON: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[A-Z][A-Z][0-9]{4}:.*").ok());

/// First tool diagnostic in a log ("MT1234: ...").
pub fn guess_failure_reason<S: AsRef<str>>(log: &[S]) -> Option<String> {
    let re = FAILURE_REASON.as_ref()?;
    log.iter()
        .find_map(|line| re.find(line.as_ref()).map(|m| m.as_str().trim_end().to_string()))
}

/// Writes the run log and records the report on the task.
pub fn apply_report(task: &TestTask, report: RunReport, log_file: &str) -> Result<(), HarnessError> {
    task.write_log(log_file, "Run log", &report.log)?;
    task.record_launch(report.launched);

    let message = report
        .failure_message
        .clone()
        .or_else(|| guess_failure_reason(&report.log));
    match report.status {
        RunStatus::Succeeded => task.finish(Outcome::Succeeded),
        RunStatus::Failed => task.finish_with_message(
            Outcome::Failed(None),
            message.unwrap_or_else(|| "Test run failed.".to_string()),
        ),
        RunStatus::Crashed => task.fail(
            FailureKind::Crashed,
            message.unwrap_or_else(|| "Test run crashed.".to_string()),
        ),
        RunStatus::TimedOut => task.fail(
            FailureKind::TimedOut,
            message.unwrap_or_else(|| {
                format!(
                    "Test run timed out after {} seconds.",
                    task.harness().config.run_timeout().as_secs()
                )
            }),
        ),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::rstest;

    use super::*;
    use crate::domain::{TaskId, TestPlatform};
    use crate::pipeline::{BuildProject, DesktopTarget};
    use crate::ports::ProcessOutcome;
    use crate::task::TaskInfo;
    use crate::testing::{Fixture, build_request};

    fn desktop_run(fx: &Fixture, settings: RunSettings) -> (Arc<TestTask>, Arc<TestTask>) {
        let build = Arc::new(TestTask::new(
            TaskId::from_u64(10),
            TaskInfo::new("xammac", "Mac_Unified", TestPlatform::MacUnified),
            Arc::clone(&fx.harness),
            Arc::new(BuildProject::new(build_request("xammac", TestPlatform::MacUnified))),
        ));
        let run = Arc::new(TestTask::new(
            TaskId::from_u64(11),
            TaskInfo::new("xammac", "Mac_Unified", TestPlatform::MacUnified),
            Arc::clone(&fx.harness),
            Arc::new(RunTest::new(Arc::clone(&build), settings, DesktopTarget)),
        ));
        (build, run)
    }

    #[tokio::test]
    async fn build_only_succeeds_without_running() {
        let fx = Fixture::new();
        let settings = RunSettings {
            build_only: true,
            ..RunSettings::new("com.xamarin.xammac", "Debug")
        };
        let (build, run) = desktop_run(&fx, settings);

        run.run().await;

        assert!(run.is_succeeded());
        assert!(build.is_succeeded());
        assert_eq!(fx.runner.run_count(), 0);
        assert!(fx.runner.events().is_empty());
    }

    #[rstest]
    #[case::failed(ProcessOutcome::failed(1), FailureKind::BuildFailure, "Build failed, exit code: 1.")]
    #[case::timed_out(ProcessOutcome::timed_out(), FailureKind::TimedOut, "Build timed out after 60 seconds.")]
    #[tokio::test]
    async fn build_failures_carry_over(
        #[case] outcome: ProcessOutcome,
        #[case] kind: FailureKind,
        #[case] message: &str,
    ) {
        let fx = Fixture::new();
        fx.builder.push_build(outcome);
        let (_build, run) = desktop_run(&fx, RunSettings::new("com.xamarin.xammac", "Debug"));

        run.run().await;

        assert_eq!(run.state().failure_kind(), Some(kind));
        assert_eq!(run.failure_message().as_deref(), Some(message));
        assert_eq!(fx.runner.run_count(), 0);
    }

    #[tokio::test]
    async fn run_shows_the_build_while_it_is_queued() {
        let fx = Fixture::new();
        let desktop = fx.harness.resources.desktop().clone();
        let (build, run) = desktop_run(&fx, RunSettings::new("com.xamarin.xammac", "Debug"));

        // fill the desktop so the build has to queue
        let mut holders = Vec::new();
        for _ in 0..desktop.max_concurrent_users() {
            holders.push(desktop.acquire_concurrent().await.unwrap());
        }
        assert!(run.is_not_started());

        let done = run.run();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !build.is_waiting() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();

        let seen = run.state();
        assert!(seen.is_building());
        assert!(seen.is_waiting());

        holders.clear();
        done.await;
        assert!(run.is_succeeded());
        assert_eq!(fx.runner.run_count(), 1);
    }

    #[tokio::test]
    async fn reset_also_resets_the_build() {
        let fx = Fixture::new();
        let (build, run) = desktop_run(&fx, RunSettings::new("com.xamarin.xammac", "Debug"));
        run.run().await;
        assert!(build.is_succeeded());

        run.reset();

        assert!(run.is_not_started());
        assert!(build.is_not_started());
        assert_eq!(build.attempt_count(), 2);

        run.run().await;
        assert!(run.is_succeeded());
        assert_eq!(fx.builder.build_count(), 2);
    }

    struct PanickingBuild;

    #[async_trait]
    impl Executable for PanickingBuild {
        fn kind(&self) -> TaskKind {
            TaskKind::Build
        }

        async fn execute(&self, _task: &TestTask) -> Result<(), HarnessError> {
            panic!("build tool wrapper blew up");
        }
    }

    #[tokio::test]
    async fn panicking_build_fails_the_run_instead_of_restarting() {
        let fx = Fixture::new();
        let build = Arc::new(TestTask::new(
            TaskId::from_u64(10),
            TaskInfo::new("xammac", "Mac_Unified", TestPlatform::MacUnified),
            Arc::clone(&fx.harness),
            Arc::new(PanickingBuild),
        ));
        let run = Arc::new(TestTask::new(
            TaskId::from_u64(11),
            TaskInfo::new("xammac", "Mac_Unified", TestPlatform::MacUnified),
            Arc::clone(&fx.harness),
            Arc::new(RunTest::new(
                Arc::clone(&build),
                RunSettings::new("com.xamarin.xammac", "Debug"),
                DesktopTarget,
            )),
        ));

        tokio::time::timeout(Duration::from_secs(5), run.run()).await.unwrap();

        assert!(build.is_harness_exception());
        assert_eq!(build.attempt_count(), 1);
        assert!(run.is_build_failure());
        assert!(run.failure_message().unwrap().contains("panicked"));
        assert_eq!(fx.runner.run_count(), 0);
    }

    #[rstest]
    #[case::reported(RunReport::failed("3 tests failed"), Some("3 tests failed"))]
    #[case::guessed(
        RunReport {
            failure_message: None,
            log: vec!["starting".into(), "error MT1006: Could not install the application".into()],
            ..RunReport::failed("")
        },
        Some("MT1006: Could not install the application")
    )]
    #[case::generic(
        RunReport { failure_message: None, ..RunReport::failed("") },
        Some("Test run failed.")
    )]
    #[tokio::test]
    async fn failure_message_is_reported_or_guessed(#[case] report: RunReport, #[case] expected: Option<&str>) {
        let fx = Fixture::new();
        fx.runner.push_run(report);
        let (_build, run) = desktop_run(&fx, RunSettings::new("com.xamarin.xammac", "Debug"));

        run.run().await;

        assert!(run.is_failed());
        assert_eq!(run.failure_message().as_deref(), expected);
        assert_eq!(run.launched(), Some(true));
    }

    #[tokio::test]
    async fn crash_and_timeout_are_refined_failures() {
        let fx = Fixture::new();
        fx.runner.push_run(RunReport {
            status: RunStatus::Crashed,
            failure_message: None,
            ..RunReport::succeeded()
        });
        let (_build, run) = desktop_run(&fx, RunSettings::new("com.xamarin.xammac", "Debug"));
        run.run().await;
        assert!(run.is_crashed());
        assert_eq!(run.failure_message().as_deref(), Some("Test run crashed."));

        fx.runner.push_run(RunReport {
            status: RunStatus::TimedOut,
            failure_message: None,
            ..RunReport::succeeded()
        });
        run.reset();
        run.run().await;
        assert!(run.is_timed_out());
        assert_eq!(
            run.failure_message().as_deref(),
            Some("Test run timed out after 600 seconds.")
        );
    }

    #[test]
    fn guess_picks_the_first_diagnostic() {
        let log = ["ok", "warning MT0000: w", "error MT1234: e"];
        assert_eq!(guess_failure_reason(&log).as_deref(), Some("MT0000: w"));
        assert_eq!(guess_failure_reason(&["nothing here"]), None);
    }
}
