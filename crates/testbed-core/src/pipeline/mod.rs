//! Build and run pipeline.
//!
//! # 構成
//! - [`BuildProject`]: ビルド（と単独の make ターゲット）
//! - [`RunTest`]: ビルド → 実行。実行先は [`RunTarget`] で差し替える
//!   - [`DesktopTarget`] / [`DeviceTarget`] / [`SimulatorTarget`]
//! - [`hooks`]: 計画の組み立て時に付けるフック

pub mod build;
pub mod candidates;
pub mod desktop;
pub mod device;
pub mod hooks;
pub mod run;
pub mod simulator;

pub use build::BuildProject;
pub use candidates::Candidates;
pub use desktop::DesktopTarget;
pub use device::DeviceTarget;
pub use hooks::{CollectLogs, Prerequisite, RequireDirectory};
pub use run::{RunSettings, RunTarget, RunTest, apply_report, guess_failure_reason};
pub use simulator::{Selection, SimulatorTarget};
