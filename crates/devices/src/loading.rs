//! A list that is filled in the background and read once complete.

use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;

struct ListState<T> {
    items: Vec<T>,
    complete: bool,
    done: watch::Sender<bool>,
}

/// A collection being populated by an in-flight load.
///
/// Reads through [`LoadingList::items`] suspend until the list is marked
/// complete. [`LoadingList::reset`] reopens the list: it installs a new
/// completion signal and clears the items under the same lock, so a reader
/// either gets the old complete contents or waits for the next load.
pub struct LoadingList<T> {
    state: Mutex<ListState<T>>,
}

impl<T: Clone> LoadingList<T> {
    /// Create an open, empty list.
    pub fn new() -> Self {
        let (done, _) = watch::channel(false);
        Self {
            state: Mutex::new(ListState {
                items: Vec::new(),
                complete: false,
                done,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ListState<T>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add an item to an open list.
    pub fn push(&self, item: T) {
        self.lock().items.push(item);
    }

    /// Add several items to an open list.
    pub fn extend(&self, items: impl IntoIterator<Item = T>) {
        self.lock().items.extend(items);
    }

    /// Mark the list complete and wake every reader.
    pub fn set_completed(&self) {
        let mut state = self.lock();
        state.complete = true;
        state.done.send_replace(true);
    }

    /// Reopen the list for a new load.
    pub fn reset(&self) {
        let mut state = self.lock();
        let (done, _) = watch::channel(false);
        // Dropping the old sender wakes readers subscribed to it; they
        // re-check and subscribe to the new signal.
        drop(std::mem::replace(&mut state.done, done));
        state.complete = false;
        state.items.clear();
    }

    /// Check if the current load finished.
    pub fn is_complete(&self) -> bool {
        self.lock().complete
    }

    /// Current contents, without waiting.
    pub fn snapshot(&self) -> Vec<T> {
        self.lock().items.clone()
    }

    /// Suspend until the list is complete.
    pub async fn wait_complete(&self) {
        self.items_where(|_| false).await;
    }

    /// Contents once the list is complete.
    pub async fn items(&self) -> Vec<T> {
        self.items_where(|_| true).await
    }

    /// Matching contents once the list is complete.
    pub async fn items_where(&self, keep: impl Fn(&T) -> bool) -> Vec<T> {
        loop {
            let mut done = {
                let state = self.lock();
                if state.complete {
                    return state.items.iter().filter(|&item| keep(item)).cloned().collect();
                }
                state.done.subscribe()
            };
            // An error means the list was reset while waiting.
            let _ = done.wait_for(|complete| *complete).await;
        }
    }
}

impl<T: Clone> Default for LoadingList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for LoadingList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f.debug_struct("LoadingList")
            .field("len", &state.items.len())
            .field("complete", &state.complete)
            .finish()
    }
}
