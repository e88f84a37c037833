//! Free-space probe.

use std::path::Path;

use crate::error::HarnessError;

pub trait DiskProbe: Send + Sync {
    fn available_bytes(&self, path: &Path) -> Result<u64, HarnessError>;
}
