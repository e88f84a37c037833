//! testbed-core
//!
//! Test-execution orchestrator: builds test projects, runs them on the host,
//! on simulators and on devices, and reports their status while they run.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, platform, state, attempt, target, spec）
//! - **broker**: 共有リソース（desktop / device）のリース
//! - **task**: タスクの状態機械と `Executable` trait
//! - **pipeline**: build → run のパイプライン（desktop / device / simulator）
//! - **batch**: シミュレータのバッチ実行と起動失敗のリトライ
//! - **app**: プランの組み立て、スケジューラ、コントロールプレーン
//! - **ports**: 外部コラボレータの抽象化
//! - **impls**: ports の実装（プロセス起動、dry run など）

pub mod app;
pub mod batch;
pub mod broker;
pub mod config;
pub mod domain;
pub mod error;
pub mod harness;
pub mod impls;
pub mod observability;
pub mod pipeline;
pub mod ports;
pub mod task;

#[cfg(test)]
mod testing;

pub use error::HarnessError;
