//! Domain model (IDs, platforms, states, attempts, targets, plan specs, ...).

pub mod attempt;
pub mod ids;
pub mod kind;
pub mod logs;
pub mod platform;
pub mod spec;
pub mod state;
pub mod target;

pub use attempt::{Attempt, Stopwatch};
pub use ids::{IdAllocator, RunId, TaskId};
pub use kind::TaskKind;
pub use logs::{AttemptLogs, LogEntry};
pub use platform::{PlatformFamily, TestPlatform};
pub use spec::{MakeSpec, PlanSpec, ProjectKind, ProjectSpec, VariationSpec};
pub use state::{Activity, ExecutionState, FailureKind, Outcome, Phase};
pub use target::{Target, TargetKind, TargetQuery};
