//! Attempt: one execution record of a task.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use super::logs::AttemptLogs;
use super::state::ExecutionState;
use super::target::Target;

/// Pausable elapsed-time clock.
#[derive(Debug, Clone, Default)]
pub struct Stopwatch {
    accumulated: Duration,
    running_since: Option<Instant>,
}

impl Stopwatch {
    pub fn start(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    pub fn stop(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += since.elapsed();
        }
    }

    /// Stops the clock and zeroes it.
    pub fn reset(&mut self) {
        self.accumulated = Duration::ZERO;
        self.running_since = None;
    }

    pub fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    pub fn elapsed(&self) -> Duration {
        match self.running_since {
            Some(since) => self.accumulated + since.elapsed(),
            None => self.accumulated,
        }
    }
}

/// A single run of a task.
///
/// Records:
/// - state (phase / outcome / failure kind)
/// - wall-clock start and end, plus the pausable duration
/// - which target (and companion) the run was bound to
/// - failure message and the attempt's own log files
///
/// Attempts are appended, never replaced, so previous runs stay readable.
#[derive(Debug, Default)]
pub struct Attempt {
    pub state: ExecutionState,
    pub failure_message: Option<String>,

    /// First time the clock was started. Not moved by a clock reset.
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,

    pub target: Option<Target>,
    pub companion: Option<Target>,

    /// Whether the test payload actually launched (None until a run reported).
    pub launched: Option<bool>,

    pub logs: Option<AttemptLogs>,

    clock: Stopwatch,
}

impl Attempt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_clock(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        self.clock.start();
    }

    pub fn stop_clock(&mut self) {
        self.ended_at = Some(Utc::now());
        self.clock.stop();
    }

    /// Zeroes the duration but keeps `started_at`.
    pub fn reset_clock(&mut self) {
        self.clock.reset();
    }

    pub fn duration(&self) -> Duration {
        self.clock.elapsed()
    }

    pub fn clock_running(&self) -> bool {
        self.clock.is_running()
    }
}
