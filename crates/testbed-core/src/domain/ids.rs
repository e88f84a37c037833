//! Domain identifiers (strongly-typed IDs).
//!
//! # 設計
//! - `Id<T>` は単調増加の `u64` を包む。T は PhantomData のマーカー型
//! - 採番は `IdAllocator` が行う（プロセス全体のカウンタは持たない）
//! - 1 回の実行全体の識別には ULID の `RunId` を使う（ログディレクトリ名など）

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"task-" など）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
///
/// `T` は実行時にはメモリを消費しません。
/// ```ignore
/// let ids = IdAllocator::<Task>::new();
/// let a: TaskId = ids.next();
/// let b: TaskId = ids.next();
/// assert!(a < b);
/// ```
#[repr(transparent)]
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    value: u64,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_u64(value: u64) -> Self {
        Self {
            value,
            _marker: PhantomData,
        }
    }

    pub fn as_u64(&self) -> u64 {
        self.value
    }
}

// derive だと T にも境界が付いてしまうので手で実装する
impl<T: IdMarker> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: IdMarker> Copy for Id<T> {}

impl<T: IdMarker> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T: IdMarker> Eq for Id<T> {}

impl<T: IdMarker> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: IdMarker> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.value.cmp(&other.value)
    }
}

impl<T: IdMarker> std::hash::Hash for Id<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl<T: IdMarker> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.value)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.value)
    }
}

/// Hands out monotonically increasing ids for one marker type.
pub struct IdAllocator<T: IdMarker> {
    next: AtomicU64,
    _marker: PhantomData<T>,
}

impl<T: IdMarker> IdAllocator<T> {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
            _marker: PhantomData,
        }
    }

    pub fn next(&self) -> Id<T> {
        Id::from_u64(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl<T: IdMarker> Default for IdAllocator<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Task のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task-"
    }
}

/// Identifier of a schedulable task (stable for the process lifetime).
pub type TaskId = Id<Task>;

/// Identifier of one orchestrator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Ulid);

impl RunId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}
