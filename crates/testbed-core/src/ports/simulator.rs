//! Simulator host collaborator.

use async_trait::async_trait;

use crate::domain::Target;
use crate::error::HarnessError;

#[async_trait]
pub trait SimulatorHost: Send + Sync {
    /// Readies the simulators for the given bundles (permissions are granted
    /// before boot because a booted simulator caches them).
    async fn prepare(&self, simulators: &[Target], bundle_ids: &[String]) -> Result<(), HarnessError>;

    async fn shutdown(&self, simulator: &Target) -> Result<(), HarnessError>;

    /// Kills leftover simulator processes.
    async fn kill_everything(&self) -> Result<(), HarnessError>;
}
