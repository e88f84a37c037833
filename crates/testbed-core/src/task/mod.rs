//! Task state machine.
//!
//! - [`TestTask`]: attempts, the run protocol, reset / stop, resource waits
//! - [`Executable`]: the pluggable body (build, run, batch, ...)
//! - [`TaskHook`]: dependency / setup / completion steps around the body

pub mod executable;
pub mod test_task;

pub use executable::{Executable, TaskHook, TaskHooks};
pub use test_task::{Held, RunFuture, TaskInfo, TestTask};
