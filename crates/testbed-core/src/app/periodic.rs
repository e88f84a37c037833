//! Periodic housekeeping command.
//!
//! Runs the configured command every `interval_secs` until shutdown. The
//! shutdown signal is only looked at between runs; a run in progress is
//! bounded by [`RUN_TIMEOUT`] instead.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::PeriodicConfig;
use crate::domain::logs::append_lines;
use crate::error::HarnessError;

pub const RUN_TIMEOUT: Duration = Duration::from_secs(10 * 60);

pub struct PeriodicCommand {
    config: PeriodicConfig,
    log: PathBuf,
}

impl PeriodicCommand {
    pub fn new(config: PeriodicConfig, log_directory: &Path) -> Self {
        Self {
            config,
            log: log_directory.join("periodic-command.log"),
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log
    }

    async fn run_once(&self, timeout: Duration) -> Result<(), HarnessError> {
        if let Some(dir) = self.log.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let started = chrono::Utc::now();
        let child = Command::new(&self.config.command)
            .args(&self.config.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let mut lines = vec![format!(
            "{} {} {}",
            started.to_rfc3339(),
            self.config.command,
            self.config.args.join(" ")
        )];
        match tokio::time::timeout(timeout, child).await {
            Ok(Ok(output)) => {
                lines.extend(String::from_utf8_lossy(&output.stdout).lines().map(str::to_string));
                lines.extend(String::from_utf8_lossy(&output.stderr).lines().map(str::to_string));
                lines.push(format!("exit: {}", output.status));
            }
            Ok(Err(e)) => lines.push(format!("could not start: {e}")),
            Err(_) => lines.push(format!("timed out after {} seconds", timeout.as_secs())),
        }
        append_lines(&self.log, &lines)?;
        Ok(())
    }

    /// Runs until `shutdown_rx` turns true.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.config.interval_secs.max(1));
        info!(command = %self.config.command, interval_secs = interval.as_secs(), "periodic command started");
        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            if let Err(e) = self.run_once(RUN_TIMEOUT).await {
                warn!(error = %e, "periodic command failed");
            }

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
        debug!("periodic command stopped");
    }
}
