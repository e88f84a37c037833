//! Impls - ports の実装
//!
//! - **command**: 外部ツールを起動する BuildInvoker / AppRunner
//! - **simulator**: `simctl` を使う SimulatorHost
//! - **discovery**: プランファイル由来の TargetDiscovery
//! - **disk**: `statvfs` による DiskProbe
//! - **report**: JSON ファイルと tracing への ReportSink
//! - **dry_run**: 何も起動しない BuildInvoker / AppRunner / SimulatorHost

pub mod command;
pub mod discovery;
pub mod disk;
pub mod dry_run;
pub mod report;
pub mod simulator;

pub use self::command::{CommandAppRunner, CommandBuildInvoker, Invocation};
pub use self::discovery::StaticDiscovery;
pub use self::disk::StatvfsProbe;
pub use self::dry_run::DryRun;
pub use self::report::{JsonReportSink, TracingReportSink};
pub use self::simulator::CommandSimulatorHost;
