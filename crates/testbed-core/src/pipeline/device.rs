//! Runs on physical devices.
//!
//! # 流れ
//! 1. 候補デバイスのどれか 1 台を取る（デバイスごとに同時 1 本）
//! 2. 事前アンインストール（失敗はログのみ）
//! 3. インストール（`install_attempts` 回まで）
//! 4. 実行
//! 5. 後片付け：アンインストール、成功時（または設定時）はビルド成果物の clean

use std::path::Path;

use async_trait::async_trait;
use tracing::{info, warn};

use super::candidates::Candidates;
use super::run::{RunTarget, RunTest, apply_report};
use crate::domain::{Outcome, TargetKind, TaskKind, TestPlatform};
use crate::error::HarnessError;
use crate::ports::{BuildRequest, RunRequest};
use crate::task::TestTask;

pub struct DeviceTarget {
    candidates: Candidates,
    /// Build to clean after the run.
    build_request: Option<BuildRequest>,
}

impl DeviceTarget {
    pub fn new(platform: TestPlatform) -> Self {
        Self {
            candidates: Candidates::new(TargetKind::Device, platform),
            build_request: None,
        }
    }

    pub fn with_clean(mut self, build_request: BuildRequest) -> Self {
        self.build_request = Some(build_request);
        self
    }

    pub fn candidates(&self) -> &Candidates {
        &self.candidates
    }

    async fn uninstall(&self, task: &TestTask, request: &RunRequest, log: &Path) {
        match task.harness().runner.uninstall(request).await {
            Ok(outcome) => {
                if let Err(e) = task.append_log(log, &outcome.log) {
                    warn!(task_id = %task.id(), error = %e, "could not write the uninstall log");
                }
                if !outcome.is_success() {
                    warn!(
                        task_id = %task.id(),
                        exit_code = %outcome.exit_code_label(),
                        "uninstall failed"
                    );
                }
            }
            Err(e) => warn!(task_id = %task.id(), error = %e, "uninstall failed"),
        }
    }

    async fn install_and_run(
        &self,
        task: &TestTask,
        request: &RunRequest,
        uninstall_log: &Path,
    ) -> Result<(), HarnessError> {
        let harness = task.harness();
        self.uninstall(task, request, uninstall_log).await;

        let attempts = harness.config.install_attempts.max(1);
        let mut last = None;
        for n in 1..=attempts {
            let description = if n == 1 {
                "Install log".to_string()
            } else {
                format!("Install log #{n}")
            };
            let outcome = harness.runner.install(request).await?;
            task.write_log(&format!("install-{}.log", harness.timestamp()), &description, &outcome.log)?;
            if outcome.is_success() {
                last = None;
                break;
            }
            warn!(task_id = %task.id(), attempt = n, attempts, "install failed");
            last = Some(outcome);
        }
        if let Some(failed) = last {
            task.finish_with_message(
                Outcome::Failed(None),
                format!("Install failed, exit code: {}.", failed.exit_code_label()),
            );
            return Ok(());
        }

        let report = harness.runner.run(request).await?;
        let udid = request.target.as_ref().map(|t| t.id.as_str()).unwrap_or("device");
        apply_report(task, report, &format!("run-{udid}-{}.log", harness.timestamp()))
    }
}

#[async_trait]
impl RunTarget for DeviceTarget {
    fn kind(&self) -> TaskKind {
        TaskKind::DeviceRun
    }

    async fn verify(&self, task: &TestTask) -> Result<(), HarnessError> {
        self.candidates.verify(task).await
    }

    async fn run_test(&self, task: &TestTask, run: &RunTest<Self>) -> Result<(), HarnessError> {
        let harness = task.harness();
        let uninstall_log = task.create_log(&format!("uninstall-{}.log", harness.timestamp()), "Uninstall log")?;

        let candidates = self.candidates.get();
        let held = task
            .blocking_wait(harness.resources.devices_for(&candidates).acquire_any_concurrent())
            .await?;
        let device = candidates
            .iter()
            .find(|c| c.id == held.resource().name())
            .cloned()
            .ok_or_else(|| {
                HarnessError::Collaborator(format!("acquired unknown device '{}'", held.resource().name()))
            })?;
        let companion = self.candidates.companion_for(harness, &device).await;
        task.set_targets(Some(device.clone()), companion.clone());
        info!(task_id = %task.id(), device = %device.name, udid = %device.id, "running on device");

        let request = run.request(task, Some(device), companion);
        let result = self.install_and_run(task, &request, &uninstall_log).await;

        self.uninstall(task, &request, &uninstall_log).await;
        if task.own_state().is_succeeded() || harness.config.clean_after_device_run {
            if let Some(build) = &self.build_request {
                match harness.builder.clean(build).await {
                    Ok(outcome) if !outcome.is_success() => {
                        warn!(task_id = %task.id(), exit_code = %outcome.exit_code_label(), "clean failed")
                    }
                    Ok(_) => {}
                    Err(e) => warn!(task_id = %task.id(), error = %e, "clean failed"),
                }
            }
        }
        drop(held);
        result
    }
}
