//! Execution targets (devices and simulators).

use serde::{Deserialize, Serialize};

use super::platform::TestPlatform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Device,
    Simulator,
}

/// A concrete device or simulator a run-task executes against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Stable identity (UDID). Device resources are keyed by this.
    pub id: String,
    pub name: String,
    pub kind: TargetKind,
    pub platform: TestPlatform,

    /// Lower is faster. Device candidates are ordered by this.
    #[serde(default)]
    pub debug_speed: u32,

    /// Id of the paired target (watch companion).
    #[serde(default)]
    pub companion: Option<String>,
}

/// What a run-task is looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetQuery {
    pub kind: TargetKind,
    pub platform: TestPlatform,
}

impl TargetQuery {
    pub fn matches(&self, target: &Target) -> bool {
        target.kind == self.kind && target.platform.family() == self.platform.family()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(kind: TargetKind, platform: TestPlatform) -> Target {
        Target {
            id: "udid".into(),
            name: "name".into(),
            kind,
            platform,
            debug_speed: 0,
            companion: None,
        }
    }

    #[test]
    fn query_matches_by_kind_and_family() {
        let q = TargetQuery {
            kind: TargetKind::Device,
            platform: TestPlatform::IosUnified64,
        };
        assert!(q.matches(&target(TargetKind::Device, TestPlatform::Ios)));
        assert!(!q.matches(&target(TargetKind::Simulator, TestPlatform::Ios)));
        assert!(!q.matches(&target(TargetKind::Device, TestPlatform::TvOs)));
    }
}
