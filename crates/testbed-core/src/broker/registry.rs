//! Resource registry owned by the scheduler.

use std::collections::HashMap;
use std::sync::Mutex;

use super::resource::Resource;
use super::set::ResourceSet;
use crate::domain::Target;

pub const DESKTOP: &str = "Desktop";

/// All resources of one orchestrator run.
///
/// The desktop resource bounds host-local work to the host's parallelism.
/// Device resources are created on first use, keyed by the target's stable
/// identity, and each admits a single holder.
#[derive(Debug)]
pub struct ResourceRegistry {
    desktop: Resource,
    devices: Mutex<HashMap<String, Resource>>,
}

impl ResourceRegistry {
    pub fn new(desktop_concurrency: usize) -> Self {
        Self {
            desktop: Resource::new(DESKTOP, desktop_concurrency),
            devices: Mutex::new(HashMap::new()),
        }
    }

    pub fn desktop(&self) -> &Resource {
        &self.desktop
    }

    pub fn device(&self, target: &Target) -> Resource {
        let mut devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        devices
            .entry(target.id.clone())
            .or_insert_with(|| Resource::with_description(target.id.clone(), 1, target.name.clone()))
            .clone()
    }

    pub fn devices_for(&self, targets: &[Target]) -> ResourceSet {
        ResourceSet::new(targets.iter().map(|t| self.device(t)).collect())
    }

    /// Snapshot of every known resource, desktop first.
    pub fn resources(&self) -> Vec<Resource> {
        let devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        let mut rv = vec![self.desktop.clone()];
        let mut named: Vec<_> = devices.values().cloned().collect();
        named.sort_by(|a, b| a.name().cmp(b.name()));
        rv.extend(named);
        rv
    }
}
