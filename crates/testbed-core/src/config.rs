//! Harness configuration.
//!
//! Every field has a default, so a plan file may omit the whole `config`
//! section or any part of it.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::TestPlatform;

pub const DEFAULT_SERVER_PORT: u16 = 51234;
pub const ONE_GIB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Root directory for per-task log folders and the JSON report.
    pub log_directory: PathBuf,

    /// Mount point checked before builds and runs.
    pub disk_root: PathBuf,

    /// Builds and runs fail fast below this many free bytes.
    pub min_free_disk_bytes: u64,

    /// Concurrent holders of the desktop resource. Defaults to host parallelism.
    pub desktop_concurrency: Option<usize>,

    pub build_timeout_secs: u64,
    pub restore_timeout_secs: u64,
    pub make_timeout_secs: u64,
    pub run_timeout_secs: u64,

    /// Install tries per device run.
    pub install_attempts: u32,

    /// Clean the build output after a successful device run.
    pub clean_after_device_run: bool,

    /// Platforms whose simulator runs are retried once when the tests never launched.
    pub retry_launch_failure_platforms: Vec<TestPlatform>,

    /// Skip external tools; builds and runs are recorded as succeeded.
    pub dry_run: bool,

    pub server_port: u16,
    pub periodic: Option<PeriodicConfig>,
    pub include: IncludeFlags,

    /// External programs used by the command-based collaborators.
    pub tools: ToolConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            log_directory: PathBuf::from("./testbed-results"),
            disk_root: PathBuf::from("/"),
            min_free_disk_bytes: ONE_GIB,
            desktop_concurrency: None,
            build_timeout_secs: 60 * 60,
            restore_timeout_secs: 15 * 60,
            make_timeout_secs: 5 * 60,
            run_timeout_secs: 10 * 60,
            install_attempts: 3,
            clean_after_device_run: false,
            retry_launch_failure_platforms: vec![TestPlatform::WatchOs],
            dry_run: false,
            server_port: DEFAULT_SERVER_PORT,
            periodic: None,
            include: IncludeFlags::default(),
            tools: ToolConfig::default(),
        }
    }
}

impl HarnessConfig {
    pub fn desktop_concurrency(&self) -> usize {
        self.desktop_concurrency
            .filter(|n| *n > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn restore_timeout(&self) -> Duration {
        Duration::from_secs(self.restore_timeout_secs)
    }

    pub fn make_timeout(&self) -> Duration {
        Duration::from_secs(self.make_timeout_secs)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    pub fn retries_launch_failures(&self, platform: TestPlatform) -> bool {
        self.retry_launch_failure_platforms.contains(&platform)
    }
}

/// Housekeeping command run on an interval while tests execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodicConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_periodic_interval")]
    pub interval_secs: u64,
}

fn default_periodic_interval() -> u64 {
    10 * 60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub build: String,
    pub restore: String,
    pub make: String,
    /// Installs, launches and uninstalls apps on devices and simulators.
    pub launcher: String,
    /// Simulator control (`simctl` subcommands).
    pub simctl: String,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            build: "msbuild".to_string(),
            restore: "nuget".to_string(),
            make: "make".to_string(),
            launcher: "mlaunch".to_string(),
            simctl: "xcrun".to_string(),
        }
    }
}

/// Which parts of the matrix are enabled (the rest is created as Ignored).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IncludeFlags {
    pub simulator: bool,
    pub device: bool,
    pub ios: bool,
    pub tvos: bool,
    pub watchos: bool,
    pub mac: bool,
    pub make: bool,
}

impl Default for IncludeFlags {
    fn default() -> Self {
        Self {
            simulator: true,
            device: false,
            ios: true,
            tvos: true,
            watchos: true,
            mac: true,
            make: true,
        }
    }
}
