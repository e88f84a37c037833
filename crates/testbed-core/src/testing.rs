//! Test doubles for the collaborator ports.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use crate::config::HarnessConfig;
use crate::domain::{Target, TargetKind, TestPlatform};
use crate::error::HarnessError;
use crate::harness::{Collaborators, Harness};
use crate::impls::discovery::StaticDiscovery;
use crate::ports::{
    AppRunner, BuildInvoker, BuildRequest, BuildTool, DiskProbe, ProcessOutcome, RunReport, RunRequest,
    SimulatorHost,
};

pub(crate) fn device(id: &str, platform: TestPlatform, debug_speed: u32) -> Target {
    Target {
        id: id.to_string(),
        name: format!("device {id}"),
        kind: TargetKind::Device,
        platform,
        debug_speed,
        companion: None,
    }
}

pub(crate) fn simulator(id: &str, platform: TestPlatform) -> Target {
    Target {
        id: id.to_string(),
        name: format!("simulator {id}"),
        kind: TargetKind::Simulator,
        platform,
        debug_speed: 0,
        companion: None,
    }
}

/// Pops scripted outcomes; succeeds once the script runs out.
#[derive(Default)]
pub(crate) struct ScriptedBuilder {
    builds: Mutex<VecDeque<ProcessOutcome>>,
    restores: Mutex<VecDeque<ProcessOutcome>>,
    pub requests: Mutex<Vec<BuildRequest>>,
    pub cleans: Mutex<Vec<BuildRequest>>,
}

impl ScriptedBuilder {
    pub fn push_build(&self, outcome: ProcessOutcome) {
        self.builds.lock().unwrap().push_back(outcome);
    }

    pub fn push_restore(&self, outcome: ProcessOutcome) {
        self.restores.lock().unwrap().push_back(outcome);
    }

    pub fn build_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl BuildInvoker for ScriptedBuilder {
    async fn restore(&self, _request: &BuildRequest) -> Result<ProcessOutcome, HarnessError> {
        let next = self.restores.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(ProcessOutcome::succeeded))
    }

    async fn build(&self, request: &BuildRequest) -> Result<ProcessOutcome, HarnessError> {
        self.requests.lock().unwrap().push(request.clone());
        tokio::task::yield_now().await;
        let next = self.builds.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| ProcessOutcome::succeeded().with_log(vec!["Build succeeded.".into()])))
    }

    async fn clean(&self, request: &BuildRequest) -> Result<ProcessOutcome, HarnessError> {
        self.cleans.lock().unwrap().push(request.clone());
        Ok(ProcessOutcome::succeeded())
    }
}

/// Pops scripted run reports and install outcomes; succeeds once they run out.
#[derive(Default)]
pub(crate) struct ScriptedRunner {
    runs: Mutex<VecDeque<RunReport>>,
    installs: Mutex<VecDeque<ProcessOutcome>>,
    pub run_requests: Mutex<Vec<RunRequest>>,
    pub events: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn push_run(&self, report: RunReport) {
        self.runs.lock().unwrap().push_back(report);
    }

    pub fn push_install(&self, outcome: ProcessOutcome) {
        self.installs.lock().unwrap().push_back(outcome);
    }

    pub fn run_count(&self) -> usize {
        self.run_requests.lock().unwrap().len()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn target_of(request: &RunRequest) -> String {
        request
            .target
            .as_ref()
            .map(|t| t.id.clone())
            .unwrap_or_else(|| "host".to_string())
    }
}

#[async_trait]
impl AppRunner for ScriptedRunner {
    async fn install(&self, request: &RunRequest) -> Result<ProcessOutcome, HarnessError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("install:{}", Self::target_of(request)));
        let next = self.installs.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(ProcessOutcome::succeeded))
    }

    async fn uninstall(&self, request: &RunRequest) -> Result<ProcessOutcome, HarnessError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("uninstall:{}", Self::target_of(request)));
        Ok(ProcessOutcome::succeeded())
    }

    async fn run(&self, request: &RunRequest) -> Result<RunReport, HarnessError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("run:{}:{}", request.test_name, Self::target_of(request)));
        self.run_requests.lock().unwrap().push(request.clone());
        tokio::task::yield_now().await;
        let next = self.runs.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(RunReport::succeeded))
    }
}

/// Records every call as a short string ("prepare:S1", "shutdown:S1", "kill").
#[derive(Default)]
pub(crate) struct RecordingSimulatorHost {
    pub events: Mutex<Vec<String>>,
    failing_prepare: Mutex<Option<usize>>,
}

impl RecordingSimulatorHost {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Makes the nth prepare (1-based) fail.
    pub fn fail_prepare(&self, nth: usize) {
        *self.failing_prepare.lock().unwrap() = Some(nth);
    }
}

#[async_trait]
impl SimulatorHost for RecordingSimulatorHost {
    async fn prepare(&self, simulators: &[Target], bundle_ids: &[String]) -> Result<(), HarnessError> {
        let ids: Vec<_> = simulators.iter().map(|s| s.id.as_str()).collect();
        self.events
            .lock()
            .unwrap()
            .push(format!("prepare:{}:{}", ids.join(","), bundle_ids.join(",")));
        let count = self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with("prepare:"))
            .count();
        if *self.failing_prepare.lock().unwrap() == Some(count) {
            return Err(HarnessError::Collaborator("simctl could not boot the simulators".into()));
        }
        Ok(())
    }

    async fn shutdown(&self, simulator: &Target) -> Result<(), HarnessError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("shutdown:{}", simulator.id));
        Ok(())
    }

    async fn kill_everything(&self) -> Result<(), HarnessError> {
        self.events.lock().unwrap().push("kill".to_string());
        Ok(())
    }
}

pub(crate) struct FixedDisk(pub AtomicU64);

impl DiskProbe for FixedDisk {
    fn available_bytes(&self, _path: &std::path::Path) -> Result<u64, HarnessError> {
        Ok(self.0.load(Ordering::SeqCst))
    }
}

/// A harness wired to the doubles above, logging into a scratch directory.
pub(crate) struct Fixture {
    pub harness: Arc<Harness>,
    pub builder: Arc<ScriptedBuilder>,
    pub runner: Arc<ScriptedRunner>,
    pub host: Arc<RecordingSimulatorHost>,
    pub devices: Arc<StaticDiscovery>,
    pub simulators: Arc<StaticDiscovery>,
    _logs: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> FixtureBuilder {
        FixtureBuilder {
            config: HarnessConfig {
                desktop_concurrency: Some(4),
                ..HarnessConfig::default()
            },
            targets: Vec::new(),
            free_bytes: u64::MAX,
        }
    }
}

pub(crate) struct FixtureBuilder {
    config: HarnessConfig,
    targets: Vec<Target>,
    free_bytes: u64,
}

impl FixtureBuilder {
    pub fn config(mut self, f: impl FnOnce(&mut HarnessConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn targets(mut self, targets: Vec<Target>) -> Self {
        self.targets = targets;
        self
    }

    pub fn free_bytes(mut self, bytes: u64) -> Self {
        self.free_bytes = bytes;
        self
    }

    pub fn build(mut self) -> Fixture {
        let logs = tempfile::tempdir().unwrap();
        self.config.log_directory = logs.path().to_path_buf();

        let builder = Arc::new(ScriptedBuilder::default());
        let runner = Arc::new(ScriptedRunner::default());
        let host = Arc::new(RecordingSimulatorHost::default());
        let devices = Arc::new(StaticDiscovery::new(TargetKind::Device, &self.targets));
        let simulators = Arc::new(StaticDiscovery::new(TargetKind::Simulator, &self.targets));
        let disk = Arc::new(FixedDisk(AtomicU64::new(self.free_bytes)));

        let harness = Arc::new(Harness::new(
            self.config,
            Collaborators {
                builder: builder.clone(),
                runner: runner.clone(),
                devices: devices.clone(),
                simulators: simulators.clone(),
                simulator_host: host.clone(),
                disk,
            },
        ));
        Fixture {
            harness,
            builder,
            runner,
            host,
            devices,
            simulators,
            _logs: logs,
        }
    }
}

pub(crate) fn build_request(test_name: &str, platform: TestPlatform) -> BuildRequest {
    BuildRequest {
        test_name: test_name.to_string(),
        project_path: format!("tests/{test_name}/{test_name}.csproj"),
        platform,
        project_platform: "iPhoneSimulator".to_string(),
        configuration: "Debug".to_string(),
        environment: Default::default(),
        solution: None,
        tool: BuildTool::Project,
        timeout: std::time::Duration::from_secs(60),
    }
}
