//! "Any one of" several interchangeable resources.

use futures::future::{BoxFuture, FutureExt, select_all};

use super::resource::{Resource, ResourceGuard};
use crate::error::HarnessError;

#[derive(Debug, Clone, Default)]
pub struct ResourceSet {
    members: Vec<Resource>,
}

impl ResourceSet {
    pub fn new(members: Vec<Resource>) -> Self {
        Self { members }
    }

    pub fn members(&self) -> &[Resource] {
        &self.members
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Races a concurrent acquisition against every member and keeps the first
    /// one granted.
    ///
    /// The losing acquisitions are dropped: a queued loser leaves the queue on
    /// its next promotion, and a slot already granted to a loser is released
    /// with it.
    pub async fn acquire_any_concurrent(&self) -> Result<ResourceGuard, HarnessError> {
        match self.members.as_slice() {
            [] => Err(HarnessError::NoResources),
            [only] => only.acquire_concurrent().await,
            members => {
                let racers: Vec<BoxFuture<'_, Result<ResourceGuard, HarnessError>>> = members
                    .iter()
                    .map(|r| r.acquire_concurrent().boxed())
                    .collect();
                let (first, _index, losers) = select_all(racers).await;
                drop(losers);
                first
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::task::Poll;
    use std::time::Duration;

    use futures::poll;

    use super::*;

    #[tokio::test]
    async fn empty_set_has_nothing_to_acquire() {
        let set = ResourceSet::default();
        assert!(matches!(
            set.acquire_any_concurrent().await,
            Err(HarnessError::NoResources)
        ));
    }

    #[tokio::test]
    async fn picks_the_free_member() {
        let a = Resource::new("A", 1);
        let b = Resource::new("B", 1);
        let _busy = a.acquire_concurrent().await.unwrap();

        let set = ResourceSet::new(vec![a.clone(), b.clone()]);
        let got = set.acquire_any_concurrent().await.unwrap();
        assert_eq!(got.resource().name(), "B");
        assert_eq!(b.users(), 1);
        assert_eq!(a.users(), 1);
    }

    #[tokio::test]
    async fn losers_are_released_when_all_were_busy() {
        let a = Resource::new("A", 1);
        let b = Resource::new("B", 1);
        let hold_a = a.acquire_concurrent().await.unwrap();
        let hold_b = b.acquire_concurrent().await.unwrap();

        let set = ResourceSet::new(vec![a.clone(), b.clone()]);
        let mut any = Box::pin(set.acquire_any_concurrent());
        assert!(poll!(&mut any).is_pending());

        drop(hold_b);
        let got = match poll!(&mut any) {
            Poll::Ready(g) => g.unwrap(),
            Poll::Pending => panic!("B was released"),
        };
        assert_eq!(got.resource().name(), "B");
        drop(any);

        // the abandoned waiter on A must not keep A busy after its holder leaves
        drop(hold_a);
        assert_eq!(a.users(), 0);
        let again = tokio::time::timeout(Duration::from_millis(100), a.acquire_concurrent())
            .await
            .expect("A must be free")
            .unwrap();
        drop(again);
        drop(got);
        assert_eq!(b.users(), 0);
    }
}
