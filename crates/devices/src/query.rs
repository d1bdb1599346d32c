//! Lazy queries over a [`LoadingList`].

use crate::loading::LoadingList;
use futures::stream::{self, BoxStream, StreamExt};
use std::fmt;
use std::sync::Arc;

type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// A filter over the eventual contents of a list.
///
/// Building a query never waits; only [`Query::collect`], [`Query::first`]
/// and [`Query::stream`] suspend until the list is complete. A query can be
/// evaluated again after the list is reloaded.
pub struct Query<T> {
    list: Arc<LoadingList<T>>,
    predicates: Vec<Predicate<T>>,
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            list: Arc::clone(&self.list),
            predicates: self.predicates.clone(),
        }
    }
}

impl<T> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("list", &self.list)
            .field("predicates", &self.predicates.len())
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Query<T> {
    /// Query every item of `list`.
    pub fn new(list: Arc<LoadingList<T>>) -> Self {
        Self {
            list,
            predicates: Vec::new(),
        }
    }

    /// Keep only items matching `predicate`.
    pub fn filter(mut self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.predicates.push(Arc::new(predicate));
        self
    }

    fn matches(&self, item: &T) -> bool {
        self.predicates.iter().all(|predicate| predicate(item))
    }

    /// Matching items, once the list is complete.
    pub async fn collect(&self) -> Vec<T> {
        self.list.items_where(|item| self.matches(item)).await
    }

    /// First matching item, once the list is complete.
    pub async fn first(&self) -> Option<T> {
        self.collect().await.into_iter().next()
    }

    /// Check if nothing matches, once the list is complete.
    pub async fn is_empty(&self) -> bool {
        self.first().await.is_none()
    }

    /// Matching items as a stream that starts yielding once the list is complete.
    pub fn stream(self) -> BoxStream<'static, T> {
        stream::once(async move { self.collect().await })
            .flat_map(stream::iter)
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_query_composes_before_load_finishes() {
        let list = Arc::new(LoadingList::new());
        let query = Query::new(Arc::clone(&list))
            .filter(|n: &u32| *n > 1)
            .filter(|n: &u32| n % 2 == 0);

        let pending = {
            let query = query.clone();
            tokio::spawn(async move { query.stream().collect::<Vec<_>>().await })
        };
        list.extend([1, 2, 3, 4]);
        list.set_completed();

        assert_eq!(pending.await.unwrap(), vec![2, 4]);
        assert_eq!(query.first().await, Some(2));
    }

    #[tokio::test]
    async fn test_query_reevaluates_after_reload() {
        let list = Arc::new(LoadingList::new());
        let query = Query::new(Arc::clone(&list)).filter(|s: &&str| s.starts_with('a'));
        list.extend(["apple", "banana"]);
        list.set_completed();
        assert_eq!(query.collect().await, vec!["apple"]);

        list.reset();
        list.extend(["avocado", "apricot"]);
        list.set_completed();
        assert_eq!(query.collect().await, vec!["avocado", "apricot"]);
        assert!(!query.is_empty().await);
    }
}
