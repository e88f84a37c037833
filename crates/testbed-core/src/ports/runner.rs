//! Run collaborator.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use super::build::ProcessOutcome;
use crate::domain::{Target, TestPlatform};
use crate::error::HarnessError;

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub test_name: String,
    pub project_path: String,
    pub bundle_id: String,
    pub platform: TestPlatform,
    pub configuration: String,
    /// None for host-local runs.
    pub target: Option<Target>,
    pub companion: Option<Target>,
    /// Host executable for desktop runs.
    pub executable: Option<String>,
    pub environment: BTreeMap<String, String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Succeeded,
    Failed,
    Crashed,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub status: RunStatus,
    /// False when the test payload never started (launch failure).
    pub launched: bool,
    pub failure_message: Option<String>,
    pub log: Vec<String>,
}

impl RunReport {
    pub fn succeeded() -> Self {
        Self {
            status: RunStatus::Succeeded,
            launched: true,
            failure_message: None,
            log: Vec::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Failed,
            launched: true,
            failure_message: Some(message.into()),
            log: Vec::new(),
        }
    }

    pub fn not_launched() -> Self {
        Self {
            status: RunStatus::Failed,
            launched: false,
            failure_message: Some("Tests did not launch.".to_string()),
            log: Vec::new(),
        }
    }
}

/// Installs and runs built apps on targets (or on the host).
#[async_trait]
pub trait AppRunner: Send + Sync {
    async fn install(&self, request: &RunRequest) -> Result<ProcessOutcome, HarnessError>;

    async fn uninstall(&self, request: &RunRequest) -> Result<ProcessOutcome, HarnessError>;

    async fn run(&self, request: &RunRequest) -> Result<RunReport, HarnessError>;
}
