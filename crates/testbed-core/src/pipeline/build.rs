//! Build phase: restore, build (or make) under the desktop resource.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::domain::{Activity, FailureKind, Outcome, TaskKind};
use crate::error::HarnessError;
use crate::ports::{BuildRequest, BuildTool, ProcessStatus};
use crate::task::{Executable, TestTask};

/// Produces the artifact a run-task consumes; also runs standalone make targets.
///
/// The desktop resource is taken concurrently when the tool can run in
/// parallel with other builds, exclusively otherwise.
#[derive(Debug)]
pub struct BuildProject {
    request: BuildRequest,
    parallel: bool,
}

impl BuildProject {
    pub fn new(request: BuildRequest) -> Self {
        let parallel = request.platform.supports_parallel_build();
        Self { request, parallel }
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn request(&self) -> &BuildRequest {
        &self.request
    }

    pub fn is_make(&self) -> bool {
        matches!(self.request.tool, BuildTool::Make { .. })
    }

    async fn restore(&self, task: &TestTask) -> Result<bool, HarnessError> {
        let Some(solution) = &self.request.solution else {
            return Ok(true);
        };
        let harness = task.harness();
        let request = BuildRequest {
            timeout: harness.config.restore_timeout(),
            ..self.request.clone()
        };
        let outcome = harness.builder.restore(&request).await?;
        let log_name = format!("nuget-restore-{}.txt", harness.timestamp());
        task.write_log(&log_name, "Restore log", &outcome.log)?;
        if outcome.is_success() {
            return Ok(true);
        }
        warn!(task_id = %task.id(), %solution, "package restore failed");
        task.fail(
            FailureKind::BuildFailure,
            format!("Restore failed, exit code: {}.", outcome.exit_code_label()),
        );
        Ok(false)
    }
}

#[async_trait]
impl Executable for BuildProject {
    fn kind(&self) -> TaskKind {
        if self.is_make() {
            TaskKind::Make
        } else {
            TaskKind::Build
        }
    }

    async fn execute(&self, task: &TestTask) -> Result<(), HarnessError> {
        let harness = task.harness();
        let desktop = harness.resources.desktop();
        let _desktop = if self.parallel {
            task.blocking_wait(desktop.acquire_concurrent()).await?
        } else {
            task.blocking_wait(desktop.acquire_exclusive()).await?
        };

        let (activity, what) = if self.is_make() {
            (Activity::Running, "Make")
        } else {
            (Activity::Building, "Build")
        };
        task.set_activity(activity);

        if !self.is_make() && !self.restore(task).await? {
            return Ok(());
        }

        info!(
            task_id = %task.id(),
            project = %self.request.project_path,
            platform = %self.request.platform,
            configuration = %self.request.configuration,
            "{what} started"
        );
        let outcome = harness.builder.build(&self.request).await?;
        let log_name = format!(
            "{}-{}-{}.txt",
            what.to_lowercase(),
            self.request.platform,
            harness.timestamp()
        );
        task.write_log(&log_name, &format!("{what} log"), &outcome.log)?;

        match outcome.status {
            ProcessStatus::Succeeded => task.finish(Outcome::Succeeded),
            ProcessStatus::TimedOut => task.fail(
                FailureKind::TimedOut,
                format!("{what} timed out after {} seconds.", self.request.timeout.as_secs()),
            ),
            ProcessStatus::Failed { .. } => {
                let message = format!("{what} failed, exit code: {}.", outcome.exit_code_label());
                if self.is_make() {
                    task.finish_with_message(Outcome::Failed(None), message);
                } else {
                    task.fail(FailureKind::BuildFailure, message);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use rstest::rstest;

    use super::*;
    use crate::domain::{TaskId, TestPlatform};
    use crate::ports::ProcessOutcome;
    use crate::task::TaskInfo;
    use crate::testing::{Fixture, build_request};

    fn build_task(fx: &Fixture, body: BuildProject) -> Arc<TestTask> {
        Arc::new(TestTask::new(
            TaskId::from_u64(1),
            TaskInfo::new("introspection", "iOS Unified", body.request().platform),
            Arc::clone(&fx.harness),
            Arc::new(body),
        ))
    }

    #[rstest]
    #[case::success(ProcessOutcome::succeeded(), None, None)]
    #[case::failure(
        ProcessOutcome::failed(1),
        Some(FailureKind::BuildFailure),
        Some("Build failed, exit code: 1.")
    )]
    #[case::timeout(
        ProcessOutcome::timed_out(),
        Some(FailureKind::TimedOut),
        Some("Build timed out after 60 seconds.")
    )]
    #[tokio::test]
    async fn build_outcome_is_mapped(
        #[case] outcome: ProcessOutcome,
        #[case] kind: Option<FailureKind>,
        #[case] message: Option<&str>,
    ) {
        let fx = Fixture::new();
        fx.builder.push_build(outcome);
        let t = build_task(&fx, BuildProject::new(build_request("introspection", TestPlatform::IosUnified)));

        t.run().await;

        match kind {
            None => assert!(t.is_succeeded()),
            Some(kind) => assert_eq!(t.state().failure_kind(), Some(kind)),
        }
        assert_eq!(t.failure_message().as_deref(), message);
        assert_eq!(fx.builder.build_count(), 1);
        assert_eq!(fx.harness.resources.desktop().users(), 0);
        let logs = t.log_entries();
        assert!(logs.iter().any(|l| l.description == "Build log"));
    }

    #[tokio::test]
    async fn failed_restore_skips_the_build() {
        let fx = Fixture::new();
        fx.builder.push_restore(ProcessOutcome::failed(3));
        let mut request = build_request("introspection", TestPlatform::IosUnified);
        request.solution = Some("tests.sln".into());
        let t = build_task(&fx, BuildProject::new(request));

        t.run().await;

        assert!(t.is_build_failure());
        assert_eq!(t.failure_message().as_deref(), Some("Restore failed, exit code: 3."));
        assert_eq!(fx.builder.build_count(), 0);
    }

    #[tokio::test]
    async fn failed_make_is_a_plain_failure() {
        let fx = Fixture::new();
        fx.builder.push_build(ProcessOutcome::failed(2));
        let mut request = build_request("mtouch", TestPlatform::Mac);
        request.tool = BuildTool::Make {
            target: "check".into(),
            working_directory: "tests/mtouch".into(),
        };
        let t = build_task(&fx, BuildProject::new(request));
        assert_eq!(t.kind(), TaskKind::Make);

        t.run().await;

        assert!(t.is_failed());
        assert_eq!(t.state().failure_kind(), None);
        assert_eq!(t.failure_message().as_deref(), Some("Make failed, exit code: 2."));
    }

    #[tokio::test]
    async fn serial_builds_take_the_desktop_exclusively() {
        let fx = Fixture::new();
        let desktop = fx.harness.resources.desktop().clone();
        let other = desktop.acquire_concurrent().await.unwrap();

        let t = build_task(
            &fx,
            BuildProject::new(build_request("introspection", TestPlatform::IosUnified)).parallel(false),
        );
        let done = t.run();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !t.is_waiting() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(fx.builder.build_count(), 0);

        drop(other);
        done.await;
        assert!(t.is_succeeded());
    }
}
