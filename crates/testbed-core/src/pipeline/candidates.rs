//! Candidate targets of a device- or simulator-bound run.

use std::sync::Mutex;

use crate::domain::{Outcome, PlatformFamily, Target, TargetKind, TargetQuery, TestPlatform};
use crate::error::HarnessError;
use crate::harness::Harness;
use crate::task::TestTask;

/// Ordered list of targets a run may bind to, refreshed on every verify.
///
/// Devices are ordered by `debug_speed` (fastest first); simulators keep the
/// discovery order.
#[derive(Debug)]
pub struct Candidates {
    query: TargetQuery,
    loaded: Mutex<Vec<Target>>,
}

impl Candidates {
    pub fn new(kind: TargetKind, platform: TestPlatform) -> Self {
        Self {
            query: TargetQuery { kind, platform },
            loaded: Mutex::new(Vec::new()),
        }
    }

    pub fn query(&self) -> TargetQuery {
        self.query
    }

    /// Waits for discovery, then reads and caches the candidates.
    pub async fn load(&self, harness: &Harness) -> Result<Vec<Target>, HarnessError> {
        let discovery = match self.query.kind {
            TargetKind::Device => &harness.devices,
            TargetKind::Simulator => &harness.simulators,
        };
        discovery.wait_ready().await?;
        let mut found = discovery.candidates(&self.query).await;
        if self.query.kind == TargetKind::Device {
            found.sort_by_key(|t| t.debug_speed);
        }
        *self.loaded.lock().unwrap_or_else(|e| e.into_inner()) = found.clone();
        Ok(found)
    }

    pub fn get(&self) -> Vec<Target> {
        self.loaded.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Skips the task when there is nothing to run on.
    pub async fn verify(&self, task: &TestTask) -> Result<(), HarnessError> {
        if self.load(task.harness()).await?.is_empty() {
            let what = match self.query.kind {
                TargetKind::Device => "devices",
                TargetKind::Simulator => "simulators",
            };
            task.finish_with_message(Outcome::Skipped, format!("No applicable {what} found."));
        }
        Ok(())
    }

    /// Watch runs also need the paired phone.
    pub async fn companion_for(&self, harness: &Harness, target: &Target) -> Option<Target> {
        if self.query.platform.family() != PlatformFamily::WatchOs {
            return None;
        }
        let discovery = match self.query.kind {
            TargetKind::Device => &harness.devices,
            TargetKind::Simulator => &harness.simulators,
        };
        discovery.companion_for(target).await
    }
}
