//! App - アプリケーション層
//!
//! # 主要コンポーネント
//! - **plan**: プロジェクト一覧 → タスク一覧
//! - **Scheduler**: 全タスクの実行と状態の配信
//! - **Control**: コントロールプレーンの各エンドポイント
//! - **ControlServer**: Control の HTTP 版
//! - **PeriodicCommand**: 実行中に定期的に走らせる掃除コマンド

pub mod control;
pub mod periodic;
pub mod plan;
pub mod scheduler;
pub mod server;

pub use self::control::{Category, Control, Reply};
pub use self::periodic::PeriodicCommand;
pub use self::plan::assemble;
pub use self::scheduler::Scheduler;
pub use self::server::ControlServer;
