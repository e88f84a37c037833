//! Target discovery collaborator.

use async_trait::async_trait;

use crate::domain::{Target, TargetQuery};
use crate::error::HarnessError;

/// Enumerates devices or simulators.
///
/// Enumeration may still be in flight when tasks start; callers await
/// [`wait_ready`](TargetDiscovery::wait_ready) before reading candidates.
#[async_trait]
pub trait TargetDiscovery: Send + Sync {
    async fn wait_ready(&self) -> Result<(), HarnessError>;

    /// Targets matching the query, in discovery order.
    async fn candidates(&self, query: &TargetQuery) -> Vec<Target>;

    /// Paired target (e.g. the phone for a watch).
    async fn companion_for(&self, target: &Target) -> Option<Target>;

    /// Forces a fresh enumeration.
    async fn reload(&self) -> Result<(), HarnessError>;
}
