//! Host-local runs.

use async_trait::async_trait;

use super::run::{RunTarget, RunTest, apply_report};
use crate::domain::TaskKind;
use crate::error::HarnessError;
use crate::task::TestTask;

/// Runs the built executable on the host, sharing the desktop with other work.
#[derive(Debug, Default, Clone, Copy)]
pub struct DesktopTarget;

#[async_trait]
impl RunTarget for DesktopTarget {
    fn kind(&self) -> TaskKind {
        TaskKind::DesktopRun
    }

    async fn run_test(&self, task: &TestTask, run: &RunTest<Self>) -> Result<(), HarnessError> {
        let harness = task.harness();
        let report = {
            let _desktop = task
                .blocking_wait(harness.resources.desktop().acquire_concurrent())
                .await?;
            harness.runner.run(&run.request(task, None, None)).await?
        };
        let log_file = format!("run-{}-{}.log", task.platform(), harness.timestamp());
        apply_report(task, report, &log_file)
    }
}
