//! Report collaborator.

use crate::error::HarnessError;
use crate::observability::StatusReport;

/// Receives a full snapshot after every status change.
pub trait ReportSink: Send + Sync {
    fn publish(&self, report: &StatusReport) -> Result<(), HarnessError>;
}
