//! StaticDiscovery - プランファイルに書かれたターゲットを返す TargetDiscovery
//!
//! # 実装
//! - 起動時はプランの `targets` のうち、担当する種類（device / simulator）だけを持つ
//! - `reload()` はプランファイルを読み直す（パスが無ければ同じ一覧のまま ready に戻す）
//! - ready は watch::channel(bool)。reload 中は false になり、`wait_ready` が待つ

use std::path::PathBuf;
use std::sync::RwLock;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::info;

use crate::domain::{PlanSpec, Target, TargetKind, TargetQuery};
use crate::error::HarnessError;
use crate::ports::TargetDiscovery;

pub struct StaticDiscovery {
    kind: TargetKind,
    source: Option<PathBuf>,
    targets: RwLock<Vec<Target>>,
    ready: watch::Sender<bool>,
}

impl StaticDiscovery {
    pub fn new(kind: TargetKind, targets: &[Target]) -> Self {
        let (ready, _) = watch::channel(true);
        Self {
            kind,
            source: None,
            targets: RwLock::new(of_kind(kind, targets)),
            ready,
        }
    }

    /// Re-reads `path` on every reload.
    pub fn with_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = Some(path.into());
        self
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    pub fn targets(&self) -> Vec<Target> {
        self.targets.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

fn of_kind(kind: TargetKind, targets: &[Target]) -> Vec<Target> {
    targets.iter().filter(|t| t.kind == kind).cloned().collect()
}

#[async_trait]
impl TargetDiscovery for StaticDiscovery {
    async fn wait_ready(&self) -> Result<(), HarnessError> {
        let mut rx = self.ready.subscribe();
        rx.wait_for(|ready| *ready)
            .await
            .map_err(|_| HarnessError::Collaborator("target discovery went away".into()))?;
        Ok(())
    }

    async fn candidates(&self, query: &TargetQuery) -> Vec<Target> {
        self.targets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|t| query.matches(t))
            .cloned()
            .collect()
    }

    async fn companion_for(&self, target: &Target) -> Option<Target> {
        let companion = target.companion.as_deref()?;
        self.targets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|t| t.id == companion)
            .cloned()
    }

    async fn reload(&self) -> Result<(), HarnessError> {
        self.ready.send_replace(false);
        let loaded = match &self.source {
            Some(path) => {
                let json = tokio::fs::read_to_string(path).await;
                json.map_err(HarnessError::from)
                    .and_then(|json| PlanSpec::from_json(&json))
                    .map(|plan| of_kind(self.kind, &plan.targets))
            }
            None => Ok(self.targets()),
        };
        // 失敗しても古い一覧のまま ready に戻す
        let result = loaded.map(|targets| {
            info!(kind = ?self.kind, count = targets.len(), "targets reloaded");
            *self.targets.write().unwrap_or_else(|e| e.into_inner()) = targets;
        });
        self.ready.send_replace(true);
        result
    }
}
