//! Harness - 1 回の実行で共有されるコンテキスト
//!
//! # 設計
//! - 設定、リソースレジストリ、外部コラボレータをまとめて `Arc<Harness>` で配る
//! - グローバル状態は持たない。レジストリはここで 1 度だけ作られ、実行終了まで生きる
//! - タスクの状態が変わるたびに `changed` カウンタを進める（スケジューラが購読する）

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;

use crate::broker::ResourceRegistry;
use crate::config::HarnessConfig;
use crate::domain::{RunId, TaskId};
use crate::ports::{AppRunner, BuildInvoker, DiskProbe, SimulatorHost, TargetDiscovery};

/// External collaborators the core depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub builder: Arc<dyn BuildInvoker>,
    pub runner: Arc<dyn AppRunner>,
    pub devices: Arc<dyn TargetDiscovery>,
    pub simulators: Arc<dyn TargetDiscovery>,
    pub simulator_host: Arc<dyn SimulatorHost>,
    pub disk: Arc<dyn DiskProbe>,
}

pub struct Harness {
    pub config: HarnessConfig,
    pub resources: ResourceRegistry,
    pub builder: Arc<dyn BuildInvoker>,
    pub runner: Arc<dyn AppRunner>,
    pub devices: Arc<dyn TargetDiscovery>,
    pub simulators: Arc<dyn TargetDiscovery>,
    pub simulator_host: Arc<dyn SimulatorHost>,
    pub disk: Arc<dyn DiskProbe>,
    run_id: RunId,
    /// Used in log file names ("20240131_235959").
    timestamp: String,
    changed: watch::Sender<u64>,
}

impl Harness {
    pub fn new(config: HarnessConfig, collaborators: Collaborators) -> Self {
        let resources = ResourceRegistry::new(config.desktop_concurrency());
        let (changed, _) = watch::channel(0);
        Self {
            config,
            resources,
            builder: collaborators.builder,
            runner: collaborators.runner,
            devices: collaborators.devices,
            simulators: collaborators.simulators,
            simulator_host: collaborators.simulator_host,
            disk: collaborators.disk,
            run_id: RunId::new(),
            timestamp: Utc::now().format("%Y%m%d_%H%M%S").to_string(),
            changed,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// `<log_dir>/<test name>/<task id>/`
    pub fn log_directory_for(&self, test_name: &str, id: TaskId) -> PathBuf {
        let safe: String = test_name
            .chars()
            .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
            .collect();
        self.config
            .log_directory
            .join(safe)
            .join(id.as_u64().to_string())
    }

    pub fn notify_changed(&self) {
        self.changed.send_modify(|n| *n = n.wrapping_add(1));
    }

    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.changed.subscribe()
    }
}

impl std::fmt::Debug for Harness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harness")
            .field("run_id", &self.run_id)
            .field("resources", &self.resources)
            .finish_non_exhaustive()
    }
}
