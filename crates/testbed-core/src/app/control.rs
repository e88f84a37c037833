//! Control plane endpoints (transport independent).
//!
//! Every endpoint answers with plain text lines. Starting a task that is
//! already executing is a no-op reported in the reply.

use std::sync::Arc;

use rand::seq::SliceRandom;
use tracing::{info, warn};

use super::scheduler::Scheduler;
use crate::domain::{PlatformFamily, TaskId, TaskKind};
use crate::task::TestTask;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
    /// The transport should stop after answering.
    pub quit: bool,
}

impl Reply {
    fn text(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            content_type: "text/plain; charset=utf-8",
            body: body.into(),
            quit: false,
        }
    }

    fn lines(lines: Vec<String>) -> Self {
        let mut body = lines.join("\n");
        body.push('\n');
        Self::text(body)
    }

    fn not_found(body: impl Into<String>) -> Self {
        Self {
            status: 404,
            ..Self::text(body)
        }
    }
}

/// Selection category of `/select` and `/deselect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    All,
    Device,
    Simulator,
    Family(PlatformFamily),
}

impl Category {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "all" => Category::All,
            "all-device" => Category::Device,
            "all-simulator" => Category::Simulator,
            "all-ios" => Category::Family(PlatformFamily::Ios),
            "all-tvos" => Category::Family(PlatformFamily::TvOs),
            "all-watchos" => Category::Family(PlatformFamily::WatchOs),
            "all-mac" => Category::Family(PlatformFamily::Mac),
            _ => return None,
        })
    }

    fn matches(self, task: &TestTask) -> bool {
        match self {
            Category::All => true,
            Category::Device => task.kind() == TaskKind::DeviceRun,
            Category::Simulator => task.kind() == TaskKind::SimulatorRun,
            Category::Family(family) => task.platform().family() == family,
        }
    }
}

pub struct Control {
    scheduler: Arc<Scheduler>,
}

impl Control {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self { scheduler }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Dispatches `url` (path plus optional query). Must run inside a tokio runtime.
    pub async fn handle(&self, url: &str) -> Reply {
        let (path, query) = match url.split_once('?') {
            Some((path, query)) => (path, query),
            None => (url, ""),
        };
        info!(%path, %query, "control request");
        match path {
            "/" => Reply::text(self.scheduler.snapshot().render_text()),
            "/report.json" => match serde_json::to_string_pretty(&self.scheduler.snapshot()) {
                Ok(json) => Reply {
                    content_type: "application/json",
                    ..Reply::text(json)
                },
                Err(e) => Reply {
                    status: 500,
                    ..Reply::text(e.to_string())
                },
            },
            "/select" => self.select(query, true),
            "/deselect" => self.select(query, false),
            "/runalltests" => self.run_all_tests(),
            "/runselected" => self.run_selected(),
            "/runfailed" => self.run_failed(),
            "/runtest" => self.run_test(query),
            "/stoptest" => self.stop_test(query),
            "/reload-devices" => self.reload(false).await,
            "/reload-simulators" => self.reload(true).await,
            "/quit" => Reply {
                quit: true,
                ..Reply::text("OK\n")
            },
            other => Reply::not_found(format!("unknown endpoint: {other}\n")),
        }
    }

    fn select(&self, query: &str, selected: bool) -> Reply {
        let mut categories = Vec::new();
        for part in query.split('&').filter(|p| !p.is_empty()) {
            match Category::parse(part) {
                Some(c) => categories.push(c),
                None => return Reply::text(format!("unknown query: {part}\n")),
            }
        }

        for (task, _) in self.scheduler.all_tasks() {
            if task.kind() == TaskKind::SimulatorBatch {
                continue;
            }
            if categories.iter().any(|c| c.matches(&task)) {
                task.set_ignored(!selected);
            }
        }
        // batches follow their members
        for task in self.scheduler.tasks() {
            let members = task.members();
            if task.kind() == TaskKind::SimulatorBatch && !members.is_empty() {
                task.set_ignored(members.iter().all(|m| m.is_ignored()));
            }
        }
        Reply::text("OK\n")
    }

    fn start(task: &Arc<TestTask>) -> Option<String> {
        // batch members are driven by their batch, not by their own run()
        if task.is_busy() {
            return Some(format!("Test '{}' is already executing.", task.name()));
        }
        task.reset();
        drop(task.run());
        None
    }

    fn shuffled(mut tasks: Vec<Arc<TestTask>>) -> Vec<Arc<TestTask>> {
        tasks.shuffle(&mut rand::thread_rng());
        tasks
    }

    fn run_all_tests(&self) -> Reply {
        let mut lines = Vec::new();
        for task in Self::shuffled(self.scheduler.tasks().to_vec()) {
            lines.extend(Self::start(&task));
        }
        lines.push("OK".to_string());
        Reply::lines(lines)
    }

    fn start_each(tasks: Vec<Arc<TestTask>>) -> Reply {
        let mut lines = Vec::new();
        for task in Self::shuffled(tasks) {
            match Self::start(&task) {
                Some(line) => lines.push(line),
                None => lines.push(format!("Started '{}'.", task.name())),
            }
        }
        if lines.is_empty() {
            lines.push("OK".to_string());
        }
        Reply::lines(lines)
    }

    fn run_selected(&self) -> Reply {
        let tasks = self
            .scheduler
            .tasks()
            .iter()
            .filter(|t| !t.is_ignored())
            .cloned()
            .collect();
        Self::start_each(tasks)
    }

    /// Failed members are rerun on their own; a batch is only rerun when it failed as a whole.
    fn run_failed(&self) -> Reply {
        let tasks = self
            .scheduler
            .all_tasks()
            .into_iter()
            .map(|(task, _)| task)
            .filter(|t| t.is_failed())
            .filter(|t| t.kind() != TaskKind::SimulatorBatch || t.members().iter().all(|m| !m.is_failed()))
            .collect();
        Self::start_each(tasks)
    }

    fn parse_ids(query: &str) -> Option<Vec<TaskId>> {
        let ids = query.strip_prefix("id=")?;
        ids.split(',')
            .map(|s| s.trim().parse::<u64>().ok().map(TaskId::from_u64))
            .collect()
    }

    fn run_test(&self, query: &str) -> Reply {
        let Some(ids) = Self::parse_ids(query) else {
            return Reply::text(format!("Could not parse {query}\n"));
        };
        let lines = ids
            .into_iter()
            .map(|id| match self.scheduler.find(id) {
                None => format!("Could not find test {}", id.as_u64()),
                Some(task) => Self::start(&task).unwrap_or_else(|| format!("OK: {}", id.as_u64())),
            })
            .collect();
        Reply::lines(lines)
    }

    fn stop_test(&self, query: &str) -> Reply {
        let Some(ids) = Self::parse_ids(query) else {
            return Reply::text(format!("Could not parse {query}\n"));
        };
        let lines = ids
            .into_iter()
            .map(|id| match self.scheduler.find(id) {
                None => format!("Could not find test {}", id.as_u64()),
                Some(task) if task.stop() => format!("OK: {}", id.as_u64()),
                Some(task) => format!("Test '{}' is not in a waiting state.", task.name()),
            })
            .collect();
        Reply::lines(lines)
    }

    async fn reload(&self, simulators: bool) -> Reply {
        let harness = self.scheduler.harness();
        let discovery = if simulators {
            &harness.simulators
        } else {
            &harness.devices
        };
        match discovery.reload().await {
            Ok(()) => Reply::text("OK\n"),
            Err(e) => {
                warn!(error = %e, simulators, "reload failed");
                Reply {
                    status: 500,
                    ..Reply::text(format!("{e}\n"))
                }
            }
        }
    }
}
