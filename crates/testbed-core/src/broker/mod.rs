//! Resource broker.
//!
//! - [`Resource`]: shared / exclusive acquisition with FIFO waiters
//! - [`ResourceSet`]: any one of several interchangeable resources
//! - [`ResourceRegistry`]: the desktop plus one resource per device

pub mod registry;
pub mod resource;
pub mod set;

pub use registry::{DESKTOP, ResourceRegistry};
pub use resource::{AcquireMode, Resource, ResourceGuard};
pub use set::ResourceSet;
