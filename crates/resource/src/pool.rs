//! Counting resource pool with concurrent and exclusive acquisition.
//!
//! Waiters are queued per mode, FIFO. On release, queued concurrent waiters
//! are served first while capacity allows; an exclusive waiter is only
//! granted once the pool is completely idle.

use std::collections::VecDeque;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

/// Errors from resource acquisition.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// The pool dropped the request without granting it
    #[error("resource {0} closed while waiting")]
    Closed(String),

    /// A group with no member pools cannot grant anything
    #[error("resource group is empty")]
    EmptyGroup,
}

/// How a token was acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Shared with up to `max_concurrent_users - 1` other holders
    Concurrent,
    /// Sole holder
    Exclusive,
}

/// Point-in-time view of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSnapshot {
    /// Current holders
    pub users: usize,
    /// Whether the single holder is exclusive
    pub exclusive: bool,
    /// Capacity for concurrent holders
    pub max_concurrent_users: usize,
    /// Waiters queued for concurrent access
    pub queued_concurrent: usize,
    /// Waiters queued for exclusive access
    pub queued_exclusive: usize,
}

impl PoolSnapshot {
    /// Mutual exclusion invariant of the pool.
    pub fn is_consistent(&self) -> bool {
        if self.exclusive {
            self.users == 1
        } else {
            self.users <= self.max_concurrent_users
        }
    }
}

struct PoolState {
    users: usize,
    exclusive: bool,
    concurrent_waiters: VecDeque<oneshot::Sender<()>>,
    exclusive_waiters: VecDeque<oneshot::Sender<()>>,
}

struct PoolInner {
    name: String,
    max_concurrent_users: usize,
    state: Mutex<PoolState>,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release(&self, mode: AccessMode) {
        let mut state = self.lock();
        state.users = state.users.saturating_sub(1);
        state.exclusive = false;
        debug!(
            resource = %self.name,
            ?mode,
            users = state.users,
            "released"
        );
        self.hand_off(&mut state);
    }

    /// Wake queued waiters after capacity was returned.
    fn hand_off(&self, state: &mut PoolState) {
        while !state.exclusive && state.users < self.max_concurrent_users {
            let Some(waiter) = state.concurrent_waiters.pop_front() else {
                break;
            };
            // A closed receiver means the waiter gave up; try the next one.
            if waiter.send(()).is_ok() {
                state.users += 1;
                debug!(resource = %self.name, users = state.users, "granted queued concurrent");
            }
        }

        while state.users == 0 {
            let Some(waiter) = state.exclusive_waiters.pop_front() else {
                break;
            };
            if waiter.send(()).is_ok() {
                state.users = 1;
                state.exclusive = true;
                debug!(resource = %self.name, "granted queued exclusive");
            }
        }
    }
}

/// A named counting semaphore.
///
/// Cloning yields another handle to the same pool.
#[derive(Clone)]
pub struct ResourcePool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for ResourcePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("name", &self.inner.name)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl ResourcePool {
    /// Create a pool allowing `max_concurrent_users` concurrent holders.
    pub fn new(name: impl Into<String>, max_concurrent_users: NonZeroUsize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                max_concurrent_users: max_concurrent_users.get(),
                state: Mutex::new(PoolState {
                    users: 0,
                    exclusive: false,
                    concurrent_waiters: VecDeque::new(),
                    exclusive_waiters: VecDeque::new(),
                }),
            }),
        }
    }

    /// Create a pool with a single slot.
    pub fn single(name: impl Into<String>) -> Self {
        Self::new(name, NonZeroUsize::MIN)
    }

    /// Pool name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Concurrent capacity.
    pub fn max_concurrent_users(&self) -> usize {
        self.inner.max_concurrent_users
    }

    /// Current state of the pool.
    pub fn snapshot(&self) -> PoolSnapshot {
        let state = self.inner.lock();
        PoolSnapshot {
            users: state.users,
            exclusive: state.exclusive,
            max_concurrent_users: self.inner.max_concurrent_users,
            queued_concurrent: state.concurrent_waiters.len(),
            queued_exclusive: state.exclusive_waiters.len(),
        }
    }

    /// Acquire a concurrent token without waiting.
    pub fn try_acquire_concurrent(&self) -> Option<AcquiredResource> {
        let mut state = self.inner.lock();
        if !state.exclusive
            && state.users < self.inner.max_concurrent_users
            && state.concurrent_waiters.is_empty()
        {
            state.users += 1;
            debug!(resource = %self.inner.name, users = state.users, "acquired concurrent");
            Some(self.token(AccessMode::Concurrent))
        } else {
            None
        }
    }

    /// Acquire an exclusive token without waiting.
    pub fn try_acquire_exclusive(&self) -> Option<AcquiredResource> {
        let mut state = self.inner.lock();
        if state.users == 0 && state.exclusive_waiters.is_empty() {
            state.users = 1;
            state.exclusive = true;
            debug!(resource = %self.inner.name, "acquired exclusive");
            Some(self.token(AccessMode::Exclusive))
        } else {
            None
        }
    }

    /// Acquire a concurrent token, suspending until one is available.
    pub async fn acquire_concurrent(&self) -> Result<AcquiredResource, ResourceError> {
        let rx = {
            let mut state = self.inner.lock();
            if !state.exclusive
                && state.users < self.inner.max_concurrent_users
                && state.concurrent_waiters.is_empty()
            {
                state.users += 1;
                debug!(resource = %self.inner.name, users = state.users, "acquired concurrent");
                return Ok(self.token(AccessMode::Concurrent));
            }
            let (tx, rx) = oneshot::channel();
            state.concurrent_waiters.push_back(tx);
            debug!(
                resource = %self.inner.name,
                queued = state.concurrent_waiters.len(),
                "queued concurrent"
            );
            rx
        };
        self.wait_for_grant(rx, AccessMode::Concurrent).await
    }

    /// Acquire an exclusive token, suspending until the pool is idle.
    pub async fn acquire_exclusive(&self) -> Result<AcquiredResource, ResourceError> {
        let rx = {
            let mut state = self.inner.lock();
            if state.users == 0 && state.exclusive_waiters.is_empty() {
                state.users = 1;
                state.exclusive = true;
                debug!(resource = %self.inner.name, "acquired exclusive");
                return Ok(self.token(AccessMode::Exclusive));
            }
            let (tx, rx) = oneshot::channel();
            state.exclusive_waiters.push_back(tx);
            debug!(
                resource = %self.inner.name,
                queued = state.exclusive_waiters.len(),
                "queued exclusive"
            );
            rx
        };
        self.wait_for_grant(rx, AccessMode::Exclusive).await
    }

    async fn wait_for_grant(
        &self,
        rx: oneshot::Receiver<()>,
        mode: AccessMode,
    ) -> Result<AcquiredResource, ResourceError> {
        let mut pending = PendingGrant {
            rx,
            pool: Arc::clone(&self.inner),
            mode,
            granted: false,
        };
        match (&mut pending.rx).await {
            Ok(()) => {
                pending.granted = true;
                Ok(self.token(mode))
            }
            Err(_) => Err(ResourceError::Closed(self.inner.name.clone())),
        }
    }

    fn token(&self, mode: AccessMode) -> AcquiredResource {
        AcquiredResource {
            pool: Arc::clone(&self.inner),
            mode,
            released: false,
        }
    }
}

/// A queued request. If the waiting future is dropped after the pool already
/// granted it, the capacity goes straight back to the pool.
struct PendingGrant {
    rx: oneshot::Receiver<()>,
    pool: Arc<PoolInner>,
    mode: AccessMode,
    granted: bool,
}

impl Drop for PendingGrant {
    fn drop(&mut self) {
        if self.granted {
            return;
        }
        self.rx.close();
        if self.rx.try_recv().is_ok() {
            debug!(resource = %self.pool.name, "abandoned grant returned");
            self.pool.release(self.mode);
        }
    }
}

/// Capability token for one slot of a pool.
///
/// The slot is returned when the token is released or dropped, exactly once.
pub struct AcquiredResource {
    pool: Arc<PoolInner>,
    mode: AccessMode,
    released: bool,
}

impl AcquiredResource {
    /// Name of the pool this token came from.
    pub fn pool_name(&self) -> &str {
        &self.pool.name
    }

    /// Mode the token was acquired in.
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Return the slot to the pool.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.pool.release(self.mode);
        }
    }
}

impl fmt::Debug for AcquiredResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquiredResource")
            .field("pool", &self.pool.name)
            .field("mode", &self.mode)
            .finish()
    }
}

impl Drop for AcquiredResource {
    fn drop(&mut self) {
        self.release_once();
    }
}
