//! Hooks attached at plan assembly.
//!
//! - [`Prerequisite`]: a make target shared by every task of a project, run once
//! - [`RequireDirectory`]: setup check for make tasks
//! - [`CollectLogs`]: attaches files a make target leaves behind

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::HarnessError;
use crate::ports::{BuildRequest, BuildTool};
use crate::task::{TaskHook, TestTask};

/// Runs its build once; every later caller gets the first result.
pub struct Prerequisite {
    request: BuildRequest,
    result: OnceCell<Result<(), String>>,
}

impl Prerequisite {
    pub fn new(request: BuildRequest) -> Self {
        Self {
            request,
            result: OnceCell::new(),
        }
    }

    fn describe(&self) -> String {
        match &self.request.tool {
            BuildTool::Make { target, working_directory } => {
                format!("make {target} in {}", working_directory.display())
            }
            BuildTool::Project => self.request.project_path.clone(),
        }
    }
}

#[async_trait]
impl TaskHook for Prerequisite {
    async fn call(&self, task: &TestTask) -> Result<(), HarnessError> {
        let result = self
            .result
            .get_or_init(|| async {
                let harness = task.harness();
                let _desktop = task
                    .blocking_wait(harness.resources.desktop().acquire_concurrent())
                    .await
                    .map_err(|e| e.to_string())?;
                info!(task_id = %task.id(), prerequisite = %self.describe(), "building prerequisite");
                let outcome = harness
                    .builder
                    .build(&self.request)
                    .await
                    .map_err(|e| e.to_string())?;
                if outcome.is_success() {
                    Ok(())
                } else {
                    Err(format!(
                        "prerequisite '{}' failed, exit code: {}",
                        self.describe(),
                        outcome.exit_code_label()
                    ))
                }
            })
            .await;
        result.clone().map_err(HarnessError::Collaborator)
    }
}

pub struct RequireDirectory(pub PathBuf);

#[async_trait]
impl TaskHook for RequireDirectory {
    async fn call(&self, _task: &TestTask) -> Result<(), HarnessError> {
        if tokio::fs::try_exists(&self.0).await? {
            Ok(())
        } else {
            Err(HarnessError::Config(format!(
                "working directory '{}' does not exist",
                self.0.display()
            )))
        }
    }
}

pub struct CollectLogs {
    pub directory: PathBuf,
    pub files: Vec<String>,
}

#[async_trait]
impl TaskHook for CollectLogs {
    async fn call(&self, task: &TestTask) -> Result<(), HarnessError> {
        for file in &self.files {
            let path = self.directory.join(file);
            if tokio::fs::try_exists(&path).await? {
                task.add_log_file(path, file);
            } else {
                debug!(task_id = %task.id(), path = %path.display(), "expected log file is missing");
            }
        }
        Ok(())
    }
}
