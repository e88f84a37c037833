//! Bounded-concurrency resource with shared and exclusive acquisition.
//!
//! # 設計
//! - 状態（users / exclusive / 待ち行列 2 本）は 1 つの Mutex で守る
//! - 待ち手は oneshot の Sender として並ぶ。昇格時に users を増やしてから guard を送る
//! - 解放は `ResourceGuard` の Drop。送信はロックの外で行う
//! - 受信側がもういない（待ちがキャンセルされた）場合、送れなかった guard が
//!   その場で Drop されて次の待ち手に回る
//!
//! 解放時は concurrent 待ちを exclusive 待ちより優先する。concurrent 需要が
//! 続く限り exclusive 待ちは進まないが、これは観測できるスケジューリング順なので
//! 変えない。

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tracing::debug;

use crate::error::HarnessError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireMode {
    Concurrent,
    Exclusive,
}

struct ResourceState {
    users: usize,
    exclusive: bool,
    concurrent_waiters: VecDeque<oneshot::Sender<ResourceGuard>>,
    exclusive_waiters: VecDeque<oneshot::Sender<ResourceGuard>>,
}

struct ResourceInner {
    name: String,
    description: String,
    max_concurrent_users: usize,
    state: Mutex<ResourceState>,
}

/// A named capability shared by at most `max_concurrent_users` holders.
///
/// Cloning is cheap and yields a handle to the same resource.
#[derive(Clone)]
pub struct Resource {
    inner: Arc<ResourceInner>,
}

impl Resource {
    pub fn new(name: impl Into<String>, max_concurrent_users: usize) -> Self {
        let name = name.into();
        Self::with_description(name.clone(), max_concurrent_users, name)
    }

    pub fn with_description(
        name: impl Into<String>,
        max_concurrent_users: usize,
        description: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(ResourceInner {
                name: name.into(),
                description: description.into(),
                max_concurrent_users: max_concurrent_users.max(1),
                state: Mutex::new(ResourceState {
                    users: 0,
                    exclusive: false,
                    concurrent_waiters: VecDeque::new(),
                    exclusive_waiters: VecDeque::new(),
                }),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn description(&self) -> &str {
        &self.inner.description
    }

    pub fn max_concurrent_users(&self) -> usize {
        self.inner.max_concurrent_users
    }

    pub fn users(&self) -> usize {
        self.lock().users
    }

    pub fn is_exclusive(&self) -> bool {
        self.lock().exclusive
    }

    /// Waiters in both queues, including ones whose caller gave up.
    pub fn queued(&self) -> usize {
        let st = self.lock();
        st.concurrent_waiters.len() + st.exclusive_waiters.len()
    }

    /// Shared acquisition: immediate while not exclusive and below capacity,
    /// otherwise FIFO in the concurrent queue.
    pub async fn acquire_concurrent(&self) -> Result<ResourceGuard, HarnessError> {
        let rx = {
            let mut st = self.lock();
            if !st.exclusive && st.users < self.inner.max_concurrent_users {
                st.users += 1;
                return Ok(ResourceGuard::new(self.clone(), AcquireMode::Concurrent));
            }
            let (tx, rx) = oneshot::channel();
            st.concurrent_waiters.push_back(tx);
            debug!(resource = %self.name(), users = st.users, "queued concurrent acquisition");
            rx
        };
        rx.await
            .map_err(|_| HarnessError::ResourceClosed(self.name().to_string()))
    }

    /// Exclusive acquisition: immediate only when nobody holds the resource,
    /// otherwise FIFO in the exclusive queue.
    pub async fn acquire_exclusive(&self) -> Result<ResourceGuard, HarnessError> {
        let rx = {
            let mut st = self.lock();
            if st.users == 0 {
                st.users += 1;
                st.exclusive = true;
                return Ok(ResourceGuard::new(self.clone(), AcquireMode::Exclusive));
            }
            let (tx, rx) = oneshot::channel();
            st.exclusive_waiters.push_back(tx);
            debug!(resource = %self.name(), users = st.users, "queued exclusive acquisition");
            rx
        };
        rx.await
            .map_err(|_| HarnessError::ResourceClosed(self.name().to_string()))
    }

    fn release(&self) {
        let promoted = {
            let mut st = self.lock();
            st.users = st.users.saturating_sub(1);
            st.exclusive = false;
            if let Some(tx) = st.concurrent_waiters.pop_front() {
                st.users += 1;
                Some((tx, AcquireMode::Concurrent))
            } else if st.users == 0 {
                match st.exclusive_waiters.pop_front() {
                    Some(tx) => {
                        st.users += 1;
                        st.exclusive = true;
                        Some((tx, AcquireMode::Exclusive))
                    }
                    None => None,
                }
            } else {
                None
            }
        };

        // ロックの外で送る（送れなかった guard は Drop で再度 release される）
        if let Some((tx, mode)) = promoted {
            let guard = ResourceGuard::new(self.clone(), mode);
            if let Err(unclaimed) = tx.send(guard) {
                debug!(resource = %self.name(), "waiter went away, passing the slot on");
                drop(unclaimed);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, ResourceState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.lock();
        f.debug_struct("Resource")
            .field("name", &self.inner.name)
            .field("users", &st.users)
            .field("max_concurrent_users", &self.inner.max_concurrent_users)
            .field("exclusive", &st.exclusive)
            .field("queued", &(st.concurrent_waiters.len() + st.exclusive_waiters.len()))
            .finish()
    }
}

/// Proof of acquisition. Dropping it releases the slot.
pub struct ResourceGuard {
    resource: Resource,
    mode: AcquireMode,
}

impl ResourceGuard {
    fn new(resource: Resource, mode: AcquireMode) -> Self {
        Self { resource, mode }
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn mode(&self) -> AcquireMode {
        self.mode
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        self.resource.release();
    }
}

impl fmt::Debug for ResourceGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceGuard")
            .field("resource", &self.resource.name())
            .field("mode", &self.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::Poll;
    use std::time::Duration;

    use futures::poll;

    use super::*;

    #[tokio::test]
    async fn concurrent_waiters_are_served_fifo() {
        let r = Resource::new("device", 1);

        let a = r.acquire_concurrent().await.unwrap();
        let mut b = Box::pin(r.acquire_concurrent());
        let mut c = Box::pin(r.acquire_concurrent());
        assert!(poll!(&mut b).is_pending());
        assert!(poll!(&mut c).is_pending());
        assert_eq!(r.queued(), 2);

        drop(a);
        let b = match poll!(&mut b) {
            Poll::Ready(g) => g.unwrap(),
            Poll::Pending => panic!("b should be promoted"),
        };
        assert!(poll!(&mut c).is_pending());
        assert_eq!(r.users(), 1);

        drop(b);
        let c = c.await.unwrap();
        assert_eq!(r.users(), 1);
        drop(c);
        assert_eq!(r.users(), 0);
    }

    #[tokio::test]
    async fn concurrent_waiter_beats_earlier_exclusive_waiter() {
        let r = Resource::new("desktop", 1);
        let holder = r.acquire_concurrent().await.unwrap();

        let mut exclusive = Box::pin(r.acquire_exclusive());
        assert!(poll!(&mut exclusive).is_pending());
        let mut concurrent = Box::pin(r.acquire_concurrent());
        assert!(poll!(&mut concurrent).is_pending());

        drop(holder);
        assert!(poll!(&mut exclusive).is_pending());
        let shared = match poll!(&mut concurrent) {
            Poll::Ready(g) => g.unwrap(),
            Poll::Pending => panic!("concurrent waiter should win"),
        };
        assert_eq!(shared.mode(), AcquireMode::Concurrent);

        drop(shared);
        let ex = exclusive.await.unwrap();
        assert_eq!(ex.mode(), AcquireMode::Exclusive);
        assert!(r.is_exclusive());
    }

    #[tokio::test]
    async fn exclusive_holder_blocks_concurrent_even_with_capacity() {
        let r = Resource::new("desktop", 4);
        let ex = r.acquire_exclusive().await.unwrap();

        let mut shared = Box::pin(r.acquire_concurrent());
        assert!(poll!(&mut shared).is_pending());

        drop(ex);
        let g = shared.await.unwrap();
        assert!(!r.is_exclusive());
        assert_eq!(g.mode(), AcquireMode::Concurrent);
    }

    #[tokio::test]
    async fn exclusive_waits_until_all_holders_leave() {
        let r = Resource::new("desktop", 2);
        let a = r.acquire_concurrent().await.unwrap();
        let b = r.acquire_concurrent().await.unwrap();

        let mut ex = Box::pin(r.acquire_exclusive());
        assert!(poll!(&mut ex).is_pending());
        drop(a);
        assert!(poll!(&mut ex).is_pending());
        drop(b);
        assert!(matches!(poll!(&mut ex), Poll::Ready(Ok(_))));
    }

    #[tokio::test]
    async fn abandoned_waiter_does_not_strand_capacity() {
        let r = Resource::new("device", 1);
        let holder = r.acquire_concurrent().await.unwrap();

        let gave_up =
            tokio::time::timeout(Duration::from_millis(10), r.acquire_concurrent()).await;
        assert!(gave_up.is_err());

        drop(holder);
        assert_eq!(r.users(), 0);
        assert_eq!(r.queued(), 0);

        let again = tokio::time::timeout(Duration::from_millis(100), r.acquire_concurrent())
            .await
            .expect("slot must be free")
            .unwrap();
        drop(again);
        assert_eq!(r.users(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn holders_never_exceed_capacity() {
        let r = Resource::new("desktop", 3);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let exclusive_overlap = Arc::new(AtomicUsize::new(0));

        let mut joins = Vec::new();
        for i in 0..40 {
            let r = r.clone();
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            let overlap = Arc::clone(&exclusive_overlap);
            joins.push(tokio::spawn(async move {
                let exclusive = i % 5 == 0;
                let guard = if exclusive {
                    r.acquire_exclusive().await.unwrap()
                } else {
                    r.acquire_concurrent().await.unwrap()
                };
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                if exclusive && now != 1 {
                    overlap.fetch_add(1, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                drop(guard);
            }));
        }
        for j in joins {
            j.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(exclusive_overlap.load(Ordering::SeqCst), 0);
        assert_eq!(r.users(), 0);
    }
}
