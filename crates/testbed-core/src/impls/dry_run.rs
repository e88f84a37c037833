//! Dry-run collaborator: every build and run succeeds without starting a process.

use async_trait::async_trait;
use tracing::debug;

use crate::domain::Target;
use crate::error::HarnessError;
use crate::ports::{AppRunner, BuildInvoker, BuildRequest, ProcessOutcome, RunReport, RunRequest, SimulatorHost};

#[derive(Debug, Default, Clone, Copy)]
pub struct DryRun;

fn skipped(what: &str, name: &str) -> ProcessOutcome {
    debug!(%what, test = %name, "dry run");
    ProcessOutcome::succeeded().with_log(vec![format!("dry run: {what} skipped for '{name}'")])
}

#[async_trait]
impl BuildInvoker for DryRun {
    async fn restore(&self, request: &BuildRequest) -> Result<ProcessOutcome, HarnessError> {
        Ok(skipped("restore", &request.test_name))
    }

    async fn build(&self, request: &BuildRequest) -> Result<ProcessOutcome, HarnessError> {
        Ok(skipped("build", &request.test_name))
    }

    async fn clean(&self, request: &BuildRequest) -> Result<ProcessOutcome, HarnessError> {
        Ok(skipped("clean", &request.test_name))
    }
}

#[async_trait]
impl AppRunner for DryRun {
    async fn install(&self, request: &RunRequest) -> Result<ProcessOutcome, HarnessError> {
        Ok(skipped("install", &request.test_name))
    }

    async fn uninstall(&self, request: &RunRequest) -> Result<ProcessOutcome, HarnessError> {
        Ok(skipped("uninstall", &request.test_name))
    }

    async fn run(&self, request: &RunRequest) -> Result<RunReport, HarnessError> {
        let mut report = RunReport::succeeded();
        report.log = skipped("run", &request.test_name).log;
        Ok(report)
    }
}

#[async_trait]
impl SimulatorHost for DryRun {
    async fn prepare(&self, _simulators: &[Target], _bundle_ids: &[String]) -> Result<(), HarnessError> {
        Ok(())
    }

    async fn shutdown(&self, _simulator: &Target) -> Result<(), HarnessError> {
        Ok(())
    }

    async fn kill_everything(&self) -> Result<(), HarnessError> {
        Ok(())
    }
}
