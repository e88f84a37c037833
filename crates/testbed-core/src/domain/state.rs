//! Execution state of a task attempt.
//!
//! # 状態
//! - `NotStarted`
//! - `InProgress { activity, waiting }`: waiting は「リソース待ち」フラグ
//! - `Finished(Outcome)`: Outcome は終了時のみ存在し、FailureKind は Failed のみが持つ
//!
//! フラグの組み合わせで表現していた不変条件（outcome ⇒ finished など）は
//! 型で表現されるので、判定関数は単純な match になります。

use serde::{Deserialize, Serialize};

/// What an in-progress task is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Activity {
    /// Started, not yet building or running (dependencies, pre-flight).
    Preparing,
    Building,
    /// Build finished, run not started yet.
    Built,
    Running,
}

/// Refinement of a failed outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    Crashed,
    TimedOut,
    HarnessException,
    BuildFailure,
}

/// Terminal result of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Succeeded,
    /// Build-only task whose build succeeded.
    BuildSucceeded,
    Failed(Option<FailureKind>),
    Ignored,
    Skipped,
}

impl Outcome {
    pub fn failed(kind: FailureKind) -> Self {
        Outcome::Failed(Some(kind))
    }

    pub fn is_failure(self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

/// Coarse phase for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    NotStarted,
    InProgress,
    Building,
    Running,
    Waiting,
    Finished,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionState {
    #[default]
    NotStarted,
    InProgress { activity: Activity, waiting: bool },
    Finished(Outcome),
}

impl ExecutionState {
    pub fn in_progress(activity: Activity) -> Self {
        ExecutionState::InProgress {
            activity,
            waiting: false,
        }
    }

    /// Same state with the waiting flag set or cleared.
    ///
    /// Only meaningful while in progress; a task that is not started yet moves
    /// to `Preparing` so the flag has somewhere to live.
    pub fn with_waiting(self, waiting: bool) -> Self {
        match self {
            ExecutionState::InProgress { activity, .. } => {
                ExecutionState::InProgress { activity, waiting }
            }
            ExecutionState::NotStarted if waiting => ExecutionState::InProgress {
                activity: Activity::Preparing,
                waiting,
            },
            other => other,
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            ExecutionState::NotStarted => Phase::NotStarted,
            ExecutionState::InProgress { waiting: true, .. } => Phase::Waiting,
            ExecutionState::InProgress { activity, .. } => match activity {
                Activity::Preparing => Phase::InProgress,
                Activity::Building | Activity::Built => Phase::Building,
                Activity::Running => Phase::Running,
            },
            ExecutionState::Finished(_) => Phase::Finished,
        }
    }

    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            ExecutionState::Finished(outcome) => Some(*outcome),
            _ => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            ExecutionState::Finished(Outcome::Failed(kind)) => *kind,
            _ => None,
        }
    }

    pub fn activity(&self) -> Option<Activity> {
        match self {
            ExecutionState::InProgress { activity, .. } => Some(*activity),
            _ => None,
        }
    }

    pub fn is_not_started(&self) -> bool {
        matches!(self, ExecutionState::NotStarted)
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, ExecutionState::InProgress { .. })
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self, ExecutionState::InProgress { waiting: true, .. })
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, ExecutionState::Finished(_))
    }

    pub fn is_building(&self) -> bool {
        self.activity() == Some(Activity::Building)
    }

    pub fn is_built(&self) -> bool {
        self.activity() == Some(Activity::Built)
    }

    pub fn is_running(&self) -> bool {
        self.activity() == Some(Activity::Running)
    }

    pub fn is_succeeded(&self) -> bool {
        self.outcome() == Some(Outcome::Succeeded)
    }

    pub fn is_build_succeeded(&self) -> bool {
        self.outcome() == Some(Outcome::BuildSucceeded)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ExecutionState::Finished(Outcome::Failed(_)))
    }

    pub fn is_ignored(&self) -> bool {
        self.outcome() == Some(Outcome::Ignored)
    }

    pub fn is_skipped(&self) -> bool {
        self.outcome() == Some(Outcome::Skipped)
    }

    pub fn is_crashed(&self) -> bool {
        self.failure_kind() == Some(FailureKind::Crashed)
    }

    pub fn is_timed_out(&self) -> bool {
        self.failure_kind() == Some(FailureKind::TimedOut)
    }

    pub fn is_build_failure(&self) -> bool {
        self.failure_kind() == Some(FailureKind::BuildFailure)
    }

    pub fn is_harness_exception(&self) -> bool {
        self.failure_kind() == Some(FailureKind::HarnessException)
    }
}
