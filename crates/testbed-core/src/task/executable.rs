//! Capabilities a task body plugs into [`TestTask`](super::TestTask).

use std::sync::Arc;

use async_trait::async_trait;

use super::test_task::TestTask;
use crate::domain::{ExecutionState, TaskKind};
use crate::error::HarnessError;

/// What a task actually does once the common protocol has prepared it.
///
/// The body never owns its task; the task hands itself in on every call, so
/// bodies can be shared (`Arc`) between a task and the batch that drives it.
#[async_trait]
pub trait Executable: Send + Sync {
    fn kind(&self) -> TaskKind;

    /// Pre-flight beyond the disk check (e.g. target availability).
    /// May finish the task (Skipped); the protocol then stops.
    async fn verify(&self, _task: &TestTask) -> Result<(), HarnessError> {
        Ok(())
    }

    /// The task-specific body. Must leave the task finished.
    async fn execute(&self, task: &TestTask) -> Result<(), HarnessError>;

    /// Effective state as seen by observers, given the task's own state.
    fn overlay(&self, own: ExecutionState) -> ExecutionState {
        own
    }

    /// Extra reset work (dependent tasks, cached selections).
    fn reset(&self) {}

    /// Called after the body failed with a harness error.
    fn propagate_results(&self, _task: &TestTask) {}

    /// Tasks driven by this one (batch members).
    fn members(&self) -> Vec<Arc<TestTask>> {
        Vec::new()
    }
}

/// An asynchronous precondition or follow-up around a task body.
#[async_trait]
pub trait TaskHook: Send + Sync {
    async fn call(&self, task: &TestTask) -> Result<(), HarnessError>;
}

/// Optional hooks, in protocol order: dependency, setup, (body), completion.
#[derive(Clone, Default)]
pub struct TaskHooks {
    pub dependency: Option<Arc<dyn TaskHook>>,
    pub setup: Option<Arc<dyn TaskHook>>,
    pub completion: Option<Arc<dyn TaskHook>>,
}

impl TaskHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dependency(mut self, hook: Arc<dyn TaskHook>) -> Self {
        self.dependency = Some(hook);
        self
    }

    pub fn setup(mut self, hook: Arc<dyn TaskHook>) -> Self {
        self.setup = Some(hook);
        self
    }

    pub fn completion(mut self, hook: Arc<dyn TaskHook>) -> Self {
        self.completion = Some(hook);
        self
    }
}
