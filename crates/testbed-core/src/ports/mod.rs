//! Ports - 外部コラボレータとの境界
//!
//! スケジューリングの中核はここにある trait だけに依存します。
//! 実際のプロセス起動やデバイス列挙は `impls` 側の実装（またはテストの fake）が担当します。
//!
//! - **BuildInvoker**: restore / build / clean
//! - **AppRunner**: install / uninstall / run
//! - **TargetDiscovery**: 候補ターゲットの列挙と ready シグナル
//! - **SimulatorHost**: シミュレータの準備・停止
//! - **DiskProbe**: 空き容量
//! - **ReportSink**: ステータスのスナップショット配信

pub mod build;
pub mod discovery;
pub mod disk;
pub mod report;
pub mod runner;
pub mod simulator;

pub use self::build::{BuildInvoker, BuildRequest, BuildTool, ProcessOutcome, ProcessStatus};
pub use self::discovery::TargetDiscovery;
pub use self::disk::DiskProbe;
pub use self::report::ReportSink;
pub use self::runner::{AppRunner, RunReport, RunRequest, RunStatus};
pub use self::simulator::SimulatorHost;
