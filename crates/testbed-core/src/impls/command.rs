//! Command-based build and run collaborators.
//!
//! # 実装
//! - 外部ツールは `tokio::process::Command` で起動し、`tokio::time::timeout` で打ち切る
//! - 打ち切られたプロセスは `kill_on_drop` で殺す
//! - 標準出力と標準エラーはそのままログ行になる
//! - 起動できなかったときだけ `Err`。終了コードが 0 以外でも `Ok(ProcessOutcome)`

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::ToolConfig;
use crate::domain::TargetKind;
use crate::error::HarnessError;
use crate::ports::{
    AppRunner, BuildInvoker, BuildRequest, BuildTool, ProcessOutcome, ProcessStatus, RunReport, RunRequest, RunStatus,
};

/// One external invocation.
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    pub program: &'a str,
    pub args: Vec<String>,
    pub working_directory: Option<&'a Path>,
    pub environment: &'a BTreeMap<String, String>,
    pub timeout: Duration,
}

impl<'a> Invocation<'a> {
    pub fn new(program: &'a str, args: Vec<String>, environment: &'a BTreeMap<String, String>, timeout: Duration) -> Self {
        Self {
            program,
            args,
            working_directory: None,
            environment,
            timeout,
        }
    }

    pub fn in_directory(mut self, dir: &'a Path) -> Self {
        self.working_directory = Some(dir);
        self
    }

    pub async fn run(&self) -> Result<ProcessOutcome, HarnessError> {
        let mut cmd = Command::new(self.program);
        cmd.args(&self.args)
            .envs(self.environment)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = self.working_directory {
            cmd.current_dir(dir);
        }
        debug!(program = %self.program, args = ?self.args, "spawning");

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(output) => output.map_err(|e| {
                HarnessError::Collaborator(format!("could not start '{}': {e}", self.program))
            })?,
            Err(_) => {
                info!(program = %self.program, timeout_secs = self.timeout.as_secs(), "process timed out");
                return Ok(ProcessOutcome::timed_out().with_log(vec![format!(
                    "{} timed out after {} seconds",
                    self.program,
                    self.timeout.as_secs()
                )]));
            }
        };

        let mut log: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect();
        log.extend(String::from_utf8_lossy(&output.stderr).lines().map(str::to_string));
        let status = if output.status.success() {
            ProcessStatus::Succeeded
        } else {
            ProcessStatus::Failed {
                exit_code: output.status.code(),
            }
        };
        Ok(ProcessOutcome { status, log })
    }
}

pub struct CommandBuildInvoker {
    tools: ToolConfig,
}

impl CommandBuildInvoker {
    pub fn new(tools: ToolConfig) -> Self {
        Self { tools }
    }

    fn project_args(request: &BuildRequest, target: Option<&str>) -> Vec<String> {
        let mut args = vec![request.project_path.clone()];
        if let Some(target) = target {
            args.push(format!("/t:{target}"));
        }
        if !request.configuration.is_empty() {
            args.push(format!("/p:Configuration={}", request.configuration));
        }
        if !request.project_platform.is_empty() {
            args.push(format!("/p:Platform={}", request.project_platform));
        }
        args.push("/verbosity:diagnostic".to_string());
        args
    }
}

#[async_trait]
impl BuildInvoker for CommandBuildInvoker {
    async fn restore(&self, request: &BuildRequest) -> Result<ProcessOutcome, HarnessError> {
        let Some(solution) = &request.solution else {
            return Ok(ProcessOutcome::succeeded());
        };
        Invocation::new(
            &self.tools.restore,
            vec!["restore".to_string(), solution.clone()],
            &request.environment,
            request.timeout,
        )
        .run()
        .await
    }

    async fn build(&self, request: &BuildRequest) -> Result<ProcessOutcome, HarnessError> {
        match &request.tool {
            BuildTool::Project => {
                Invocation::new(
                    &self.tools.build,
                    Self::project_args(request, None),
                    &request.environment,
                    request.timeout,
                )
                .run()
                .await
            }
            BuildTool::Make { target, working_directory } => {
                Invocation::new(&self.tools.make, vec![target.clone()], &request.environment, request.timeout)
                    .in_directory(working_directory)
                    .run()
                    .await
            }
        }
    }

    async fn clean(&self, request: &BuildRequest) -> Result<ProcessOutcome, HarnessError> {
        match &request.tool {
            BuildTool::Project => {
                Invocation::new(
                    &self.tools.build,
                    Self::project_args(request, Some("Clean")),
                    &request.environment,
                    request.timeout,
                )
                .run()
                .await
            }
            // make ターゲットは後片付けしない
            BuildTool::Make { .. } => Ok(ProcessOutcome::succeeded()),
        }
    }
}

/// Markers the launcher prints when the app never started.
const LAUNCH_FAILURE_MARKERS: [&str; 3] = ["Failed to launch", "did not launch", "launch failed"];

pub struct CommandAppRunner {
    tools: ToolConfig,
}

impl CommandAppRunner {
    pub fn new(tools: ToolConfig) -> Self {
        Self { tools }
    }

    fn target_args(request: &RunRequest) -> Result<Vec<String>, HarnessError> {
        let target = request
            .target
            .as_ref()
            .ok_or_else(|| HarnessError::Collaborator(format!("'{}' has no target", request.test_name)))?;
        Ok(match target.kind {
            TargetKind::Device => vec!["--devname".to_string(), target.id.clone()],
            TargetKind::Simulator => vec!["--device".to_string(), format!(":v2:udid={}", target.id)],
        })
    }

    fn report(outcome: ProcessOutcome) -> RunReport {
        let launched = !outcome
            .log
            .iter()
            .any(|line| LAUNCH_FAILURE_MARKERS.iter().any(|m| line.contains(m)));
        let status = match outcome.status {
            ProcessStatus::Succeeded => RunStatus::Succeeded,
            ProcessStatus::TimedOut => RunStatus::TimedOut,
            // シグナルで死んだ
            ProcessStatus::Failed { exit_code: None } => RunStatus::Crashed,
            ProcessStatus::Failed { .. } => RunStatus::Failed,
        };
        RunReport {
            status,
            launched,
            failure_message: if launched { None } else { Some("Tests did not launch.".to_string()) },
            log: outcome.log,
        }
    }
}

#[async_trait]
impl AppRunner for CommandAppRunner {
    async fn install(&self, request: &RunRequest) -> Result<ProcessOutcome, HarnessError> {
        let mut args = vec!["--installdev".to_string(), request.project_path.clone()];
        args.extend(Self::target_args(request)?);
        Invocation::new(&self.tools.launcher, args, &request.environment, request.timeout)
            .run()
            .await
    }

    async fn uninstall(&self, request: &RunRequest) -> Result<ProcessOutcome, HarnessError> {
        let mut args = vec!["--uninstalldevbundleid".to_string(), request.bundle_id.clone()];
        args.extend(Self::target_args(request)?);
        Invocation::new(&self.tools.launcher, args, &request.environment, request.timeout)
            .run()
            .await
    }

    async fn run(&self, request: &RunRequest) -> Result<RunReport, HarnessError> {
        let outcome = match &request.target {
            None => {
                let executable = request.executable.as_deref().unwrap_or(&request.project_path);
                Invocation::new(executable, Vec::new(), &request.environment, request.timeout)
                    .run()
                    .await?
            }
            Some(target) => {
                let verb = match target.kind {
                    TargetKind::Device => "--launchdev",
                    TargetKind::Simulator => "--launchsim",
                };
                let mut args = vec![verb.to_string(), request.project_path.clone()];
                args.extend(Self::target_args(request)?);
                args.push("--wait-for-exit".to_string());
                Invocation::new(&self.tools.launcher, args, &request.environment, request.timeout)
                    .run()
                    .await?
            }
        };
        Ok(Self::report(outcome))
    }
}
