//! CommandSimulatorHost - `simctl` を呼ぶ SimulatorHost
//!
//! # 流れ（prepare）
//! 1. 各シミュレータ × 各バンドルに `privacy grant all`（起動前でないと効かない）
//! 2. `boot`。すでに起動済みだと失敗するので警告だけ出す
//!
//! 権限付与の失敗はエラーとして返す。テストが権限ダイアログで止まるため。

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use super::command::Invocation;
use crate::config::ToolConfig;
use crate::domain::Target;
use crate::error::HarnessError;
use crate::ports::SimulatorHost;

const SIMCTL_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// Process names left behind by crashed or abandoned simulator sessions.
const SIMULATOR_PROCESSES: [&str; 2] = ["Simulator", "launchd_sim"];

pub struct CommandSimulatorHost {
    tools: ToolConfig,
    environment: BTreeMap<String, String>,
}

impl CommandSimulatorHost {
    pub fn new(tools: ToolConfig) -> Self {
        Self {
            tools,
            environment: BTreeMap::new(),
        }
    }

    fn simctl(&self, args: &[&str]) -> Invocation<'_> {
        let mut full = vec!["simctl".to_string()];
        full.extend(args.iter().map(|a| a.to_string()));
        Invocation::new(&self.tools.simctl, full, &self.environment, SIMCTL_TIMEOUT)
    }
}

#[async_trait]
impl SimulatorHost for CommandSimulatorHost {
    async fn prepare(&self, simulators: &[Target], bundle_ids: &[String]) -> Result<(), HarnessError> {
        for sim in simulators {
            for bundle in bundle_ids {
                let outcome = self.simctl(&["privacy", sim.id.as_str(), "grant", "all", bundle.as_str()]).run().await?;
                if !outcome.is_success() {
                    return Err(HarnessError::Collaborator(format!(
                        "could not grant permissions to {bundle} on {}: exit code {}",
                        sim.name,
                        outcome.exit_code_label()
                    )));
                }
            }
            let boot = self.simctl(&["boot", sim.id.as_str()]).run().await?;
            if !boot.is_success() {
                warn!(simulator = %sim.name, log = ?boot.log, "boot failed (already booted?)");
            }
            info!(simulator = %sim.name, bundles = bundle_ids.len(), "simulator prepared");
        }
        Ok(())
    }

    async fn shutdown(&self, simulator: &Target) -> Result<(), HarnessError> {
        let outcome = self.simctl(&["shutdown", simulator.id.as_str()]).run().await?;
        if outcome.is_success() {
            Ok(())
        } else {
            Err(HarnessError::Collaborator(format!(
                "could not shut down {}: exit code {}",
                simulator.name,
                outcome.exit_code_label()
            )))
        }
    }

    async fn kill_everything(&self) -> Result<(), HarnessError> {
        let mut args = vec!["-9".to_string()];
        args.extend(SIMULATOR_PROCESSES.iter().map(|p| p.to_string()));
        // 何も残っていなければ killall は 1 を返すので結果は見ない
        let outcome = Invocation::new("killall", args, &self.environment, SIMCTL_TIMEOUT)
            .run()
            .await?;
        info!(status = %outcome.exit_code_label(), "simulator processes killed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TestPlatform;
    use crate::testing;

    /// `echo` in place of `xcrun` records the argument lists.
    fn echo_host() -> CommandSimulatorHost {
        CommandSimulatorHost::new(ToolConfig {
            simctl: "echo".into(),
            ..ToolConfig::default()
        })
    }

    #[tokio::test]
    async fn prepare_and_shutdown_succeed_when_simctl_does() {
        let host = echo_host();
        let sim = testing::simulator("S1", TestPlatform::Ios);

        host.prepare(&[sim.clone()], &["com.xamarin.a".to_string()]).await.unwrap();
        host.shutdown(&sim).await.unwrap();
    }

    #[tokio::test]
    async fn failed_permission_grant_is_an_error() {
        let host = CommandSimulatorHost::new(ToolConfig {
            simctl: "false".into(),
            ..ToolConfig::default()
        });
        let sim = testing::simulator("S1", TestPlatform::Ios);

        let err = host.prepare(&[sim], &["com.xamarin.a".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("com.xamarin.a"), "{err}");
    }
}
