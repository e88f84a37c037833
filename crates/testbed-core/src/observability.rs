use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Activity, FailureKind, Outcome, Phase, RunId, TaskId, TaskKind, TestPlatform};

/// Read-only view of one task, as handed to report sinks and the status page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub name: String,
    pub path: Vec<String>,
    pub kind: TaskKind,
    pub platform: TestPlatform,
    pub phase: Phase,
    pub activity: Option<Activity>,
    pub outcome: Option<Outcome>,
    pub failure_kind: Option<FailureKind>,
    pub failure_message: Option<String>,
    pub attempts: usize,
    pub duration_ms: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub target: Option<String>,
    /// Batch this task belongs to, if any.
    pub parent: Option<TaskId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub not_started: usize,
    pub in_progress: usize,
    pub building: usize,
    pub building_queued: usize,
    pub running: usize,
    pub running_queued: usize,
    pub succeeded: usize,
    pub build_succeeded: usize,
    pub failed: usize,
    pub ignored: usize,
    pub skipped: usize,
}

impl StatusCounts {
    pub fn tally<'a>(tasks: impl IntoIterator<Item = &'a TaskSnapshot>) -> Self {
        let mut counts = StatusCounts::default();
        for t in tasks {
            match (t.phase, t.outcome) {
                (Phase::NotStarted, _) => counts.not_started += 1,
                (Phase::Finished, Some(Outcome::Succeeded)) => counts.succeeded += 1,
                (Phase::Finished, Some(Outcome::BuildSucceeded)) => counts.build_succeeded += 1,
                (Phase::Finished, Some(Outcome::Failed(_))) => counts.failed += 1,
                (Phase::Finished, Some(Outcome::Ignored)) => counts.ignored += 1,
                (Phase::Finished, Some(Outcome::Skipped)) => counts.skipped += 1,
                (Phase::Finished, None) => {}
                (Phase::Building, _) => counts.building += 1,
                (Phase::Running, _) => counts.running += 1,
                (Phase::InProgress, _) => counts.in_progress += 1,
                (Phase::Waiting, _) if t.activity == Some(Activity::Running) => {
                    counts.running_queued += 1
                }
                (Phase::Waiting, _) => counts.building_queued += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.not_started
            + self.in_progress
            + self.building
            + self.building_queued
            + self.running
            + self.running_queued
            + self.succeeded
            + self.build_succeeded
            + self.failed
            + self.ignored
            + self.skipped
    }

    pub fn finished(&self) -> usize {
        self.succeeded + self.build_succeeded + self.failed + self.ignored + self.skipped
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub run_id: RunId,
    pub generated_at: DateTime<Utc>,
    pub counts: StatusCounts,
    pub tasks: Vec<TaskSnapshot>,
}

impl StatusReport {
    pub fn new(run_id: RunId, tasks: Vec<TaskSnapshot>) -> Self {
        Self {
            run_id,
            generated_at: Utc::now(),
            counts: StatusCounts::tally(&tasks),
            tasks,
        }
    }

    pub fn empty(run_id: RunId) -> Self {
        Self::new(run_id, Vec::new())
    }

    /// Line-oriented rendering for the control plane's status page.
    pub fn render_text(&self) -> String {
        let c = &self.counts;
        let mut out = format!(
            "{} tasks: {} not started, {} building ({} queued), {} running ({} queued), \
             {} succeeded, {} build-only succeeded, {} failed, {} ignored, {} skipped\n",
            c.total(),
            c.not_started,
            c.building,
            c.building_queued,
            c.running,
            c.running_queued,
            c.succeeded,
            c.build_succeeded,
            c.failed,
            c.ignored,
            c.skipped,
        );
        for t in &self.tasks {
            let state = match t.outcome {
                Some(outcome) => format!("{outcome:?}"),
                None => format!("{:?}", t.phase),
            };
            out.push_str(&format!(
                "{:>4} {:<60} {:<24} {:>8.1}s",
                t.id.as_u64(),
                t.path.join(" / "),
                state,
                t.duration_ms as f64 / 1000.0,
            ));
            if let Some(msg) = &t.failure_message {
                out.push_str("  ");
                out.push_str(msg.lines().next().unwrap_or_default());
            }
            out.push('\n');
        }
        out
    }
}
