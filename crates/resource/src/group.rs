//! Racing acquisition across several identical resources.

use crate::pool::{AcquiredResource, ResourceError, ResourcePool};
use futures::future::{self, BoxFuture, FutureExt};
use tracing::debug;

/// A set of interchangeable pools, e.g. one per physical device.
///
/// Pools are kept in preference order: when several are free at the same
/// time, the earliest one wins.
#[derive(Debug, Clone, Default)]
pub struct ResourceGroup {
    pools: Vec<ResourcePool>,
}

impl ResourceGroup {
    /// Create a group from pools in preference order.
    pub fn new(pools: Vec<ResourcePool>) -> Self {
        Self { pools }
    }

    /// Member pools.
    pub fn pools(&self) -> &[ResourcePool] {
        &self.pools
    }

    /// Check if the group has no members.
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Take a concurrent token from the first free member, without waiting.
    pub fn try_acquire_any_concurrent(&self) -> Option<(usize, AcquiredResource)> {
        self.pools
            .iter()
            .enumerate()
            .find_map(|(index, pool)| pool.try_acquire_concurrent().map(|token| (index, token)))
    }

    /// Race a concurrent acquisition against every member.
    ///
    /// Returns the index of the winning pool and its token. Every losing
    /// acquisition is cancelled; a loser that was granted in the meantime
    /// hands its slot straight back to its pool.
    pub async fn acquire_any_concurrent(&self) -> Result<(usize, AcquiredResource), ResourceError> {
        if self.pools.is_empty() {
            return Err(ResourceError::EmptyGroup);
        }
        if let Some(won) = self.try_acquire_any_concurrent() {
            return Ok(won);
        }

        let racers: Vec<BoxFuture<'static, Result<(usize, AcquiredResource), ResourceError>>> =
            self.pools
                .iter()
                .cloned()
                .enumerate()
                .map(|(index, pool)| {
                    async move { pool.acquire_concurrent().await.map(|token| (index, token)) }.boxed()
                })
                .collect();

        let ((index, token), losers) = future::select_ok(racers).await?;
        debug!(
            winner = token.pool_name(),
            cancelled = losers.len(),
            "group acquisition won"
        );
        drop(losers);
        Ok((index, token))
    }
}
