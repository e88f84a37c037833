//! Report sinks.
//!
//! - **JsonReportSink**: `report.json` を毎回まるごと書き直す（tmp に書いて rename）
//! - **TracingReportSink**: 件数だけを tracing に流す

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::HarnessError;
use crate::observability::StatusReport;
use crate::ports::ReportSink;

pub struct JsonReportSink {
    path: PathBuf,
}

impl JsonReportSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<log_dir>/report.json`
    pub fn in_directory(dir: &Path) -> Self {
        Self::new(dir.join("report.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReportSink for JsonReportSink {
    fn publish(&self, report: &StatusReport) -> Result<(), HarnessError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_vec_pretty(report)?;
        // 読み手が書きかけのファイルを見ないように
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct TracingReportSink;

impl ReportSink for TracingReportSink {
    fn publish(&self, report: &StatusReport) -> Result<(), HarnessError> {
        let c = &report.counts;
        info!(
            run_id = %report.run_id,
            total = c.total(),
            finished = c.finished(),
            succeeded = c.succeeded + c.build_succeeded,
            failed = c.failed,
            skipped = c.skipped,
            "status"
        );
        Ok(())
    }
}
