//! Kinds of schedulable tasks.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Builds a project; the build half of a run-task.
    Build,
    /// Standalone make target.
    Make,
    /// Runs on the host.
    DesktopRun,
    DeviceRun,
    SimulatorRun,
    /// Group of simulator runs sharing one simulator cycle.
    SimulatorBatch,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskKind::Build => "build",
            TaskKind::Make => "make",
            TaskKind::DesktopRun => "desktop",
            TaskKind::DeviceRun => "device",
            TaskKind::SimulatorRun => "simulator",
            TaskKind::SimulatorBatch => "simulator-batch",
        };
        f.write_str(s)
    }
}
