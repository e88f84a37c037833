//! Input specs for a test run (plan file).
//!
//! A plan lists projects and the targets available to run them on. The
//! scheduler turns it into a fixed task list once, at startup.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::platform::TestPlatform;
use super::target::{Target, TargetKind};
use crate::config::HarnessConfig;
use crate::error::HarnessError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanSpec {
    #[serde(default)]
    pub config: HarnessConfig,

    #[serde(default)]
    pub projects: Vec<ProjectSpec>,

    /// Known devices and simulators.
    #[serde(default)]
    pub targets: Vec<Target>,
}

impl PlanSpec {
    pub fn from_json(json: &str) -> Result<Self, HarnessError> {
        let plan: PlanSpec = serde_json::from_str(json)?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> Result<(), HarnessError> {
        let mut names = std::collections::HashSet::new();
        for project in &self.projects {
            if project.name.trim().is_empty() {
                return Err(HarnessError::Config("project name must not be empty".into()));
            }
            if !names.insert(project.name.as_str()) {
                return Err(HarnessError::Config(format!(
                    "duplicate project name '{}'",
                    project.name
                )));
            }
            if project.kind == ProjectKind::Make && project.make.is_none() {
                return Err(HarnessError::Config(format!(
                    "make project '{}' needs a 'make' section",
                    project.name
                )));
            }
        }
        let mut ids = std::collections::HashSet::new();
        for target in &self.targets {
            if !ids.insert(target.id.as_str()) {
                return Err(HarnessError::Config(format!(
                    "duplicate target id '{}'",
                    target.id
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectKind {
    /// Built and run on the host.
    Desktop,
    /// Built on the host, run on simulators and/or devices.
    Mobile,
    /// A make target; build and run in one step.
    Make,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSpec {
    pub name: String,

    /// Project file handed to the build invoker.
    #[serde(default)]
    pub path: String,

    pub kind: ProjectKind,

    #[serde(default = "default_configurations")]
    pub configurations: Vec<String>,

    /// Platforms to build for. Defaults depend on the project kind.
    #[serde(default)]
    pub platforms: Vec<TestPlatform>,

    /// Where mobile projects run.
    #[serde(default = "default_run_on")]
    pub run_on: Vec<TargetKind>,

    #[serde(default)]
    pub build_only: bool,

    #[serde(default)]
    pub ignored: bool,

    /// Overrides the platform default (Mac builds are parallel, others are not).
    #[serde(default)]
    pub supports_parallel_build: Option<bool>,

    /// Solution whose packages are restored before building.
    #[serde(default)]
    pub solution: Option<String>,

    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    #[serde(default)]
    pub bundle_id: Option<String>,

    /// Executable for desktop runs. Defaults to `path`.
    #[serde(default)]
    pub executable: Option<String>,

    /// Make target that must succeed once before any task of this project runs.
    #[serde(default)]
    pub prerequisite: Option<MakeSpec>,

    #[serde(default)]
    pub variations: Vec<VariationSpec>,

    #[serde(default)]
    pub make: Option<MakeSpec>,
}

impl ProjectSpec {
    pub fn platforms(&self) -> Vec<TestPlatform> {
        if !self.platforms.is_empty() {
            return self.platforms.clone();
        }
        match self.kind {
            ProjectKind::Desktop => vec![TestPlatform::MacUnified],
            ProjectKind::Mobile => vec![
                TestPlatform::IosUnified,
                TestPlatform::TvOs,
                TestPlatform::WatchOs,
            ],
            ProjectKind::Make => vec![TestPlatform::Mac],
        }
    }

    pub fn bundle_id(&self) -> String {
        self.bundle_id.clone().unwrap_or_else(|| {
            let slug: String = self
                .name
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
                .collect();
            format!("com.testbed.{slug}")
        })
    }
}

fn default_configurations() -> Vec<String> {
    vec!["Debug".to_string()]
}

fn default_run_on() -> Vec<TargetKind> {
    vec![TargetKind::Simulator, TargetKind::Device]
}

/// Extra build/run pair derived from a base task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariationSpec {
    pub name: String,
    #[serde(default)]
    pub configuration: Option<String>,
    #[serde(default)]
    pub ignored: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MakeSpec {
    pub target: String,
    pub working_directory: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_true")]
    pub supports_parallel: bool,
    /// Files (relative to `working_directory`) attached to the task's logs afterwards.
    #[serde(default)]
    pub log_files: Vec<String>,
}

fn default_true() -> bool {
    true
}
