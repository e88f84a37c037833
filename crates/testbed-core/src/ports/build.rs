//! Build collaborator.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::TestPlatform;
use crate::error::HarnessError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildTool {
    /// Build a project file.
    Project,
    /// Run `make <target>` in a directory.
    Make {
        target: String,
        working_directory: PathBuf,
    },
}

#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub test_name: String,
    pub project_path: String,
    pub platform: TestPlatform,
    /// Build-system platform ("iPhoneSimulator", "iPhone", "AnyCPU").
    pub project_platform: String,
    pub configuration: String,
    pub environment: BTreeMap<String, String>,
    pub solution: Option<String>,
    pub tool: BuildTool,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Succeeded,
    Failed { exit_code: Option<i32> },
    TimedOut,
}

/// Result of an external process plus what it printed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub status: ProcessStatus,
    pub log: Vec<String>,
}

impl ProcessOutcome {
    pub fn succeeded() -> Self {
        Self {
            status: ProcessStatus::Succeeded,
            log: Vec::new(),
        }
    }

    pub fn failed(exit_code: i32) -> Self {
        Self {
            status: ProcessStatus::Failed {
                exit_code: Some(exit_code),
            },
            log: Vec::new(),
        }
    }

    pub fn timed_out() -> Self {
        Self {
            status: ProcessStatus::TimedOut,
            log: Vec::new(),
        }
    }

    pub fn with_log(mut self, log: Vec<String>) -> Self {
        self.log = log;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ProcessStatus::Succeeded
    }

    /// Exit code for messages; timeouts and signals have none.
    pub fn exit_code_label(&self) -> String {
        match self.status {
            ProcessStatus::Succeeded => "0".to_string(),
            ProcessStatus::Failed { exit_code: Some(code) } => code.to_string(),
            ProcessStatus::Failed { exit_code: None } => "unknown".to_string(),
            ProcessStatus::TimedOut => "timeout".to_string(),
        }
    }
}

/// Produces deployable artifacts.
///
/// `Err` is reserved for failures of the invoker itself (e.g. the tool could
/// not be spawned); a build that ran and failed is an `Ok` outcome.
#[async_trait]
pub trait BuildInvoker: Send + Sync {
    /// Restores packages for `request.solution`.
    async fn restore(&self, request: &BuildRequest) -> Result<ProcessOutcome, HarnessError>;

    async fn build(&self, request: &BuildRequest) -> Result<ProcessOutcome, HarnessError>;

    async fn clean(&self, request: &BuildRequest) -> Result<ProcessOutcome, HarnessError>;
}
