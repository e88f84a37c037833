use thiserror::Error;

use crate::domain::TaskId;

/// Errors raised inside the orchestrator itself.
///
/// Test failures are not errors: a failing build or run is recorded as an
/// [`Outcome`](crate::domain::Outcome) on the task. A `HarnessError` escaping a
/// task body is turned into a `HarnessException` outcome by the task runner.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("no resources to acquire")]
    NoResources,

    #[error("resource '{0}' was closed while waiting")]
    ResourceClosed(String),

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("{0}")]
    Collaborator(String),

    #[error("stopped while waiting for a resource")]
    Stopped,

    #[error("result not set for '{0}'")]
    ResultNotSet(String),

    #[error("server error: {0}")]
    Server(String),
}

impl From<serde_json::Error> for HarnessError {
    fn from(e: serde_json::Error) -> Self {
        HarnessError::Config(e.to_string())
    }
}
