use crate::builder::BatchMemoizedCallBuilder;
use crate::cache::{Cache, InFlight};
use crate::key::CacheKey;
use crate::pending::PendingResult;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use futures_util::future::{try_join_all, BoxFuture};

pub(crate) type ComposeKeyFn<P, S, K> = Arc<dyn Fn(&P, &S) -> K + Send + Sync>;
pub(crate) type BulkFetchFn<P, S, V, E> =
  Arc<dyn Fn(P, Vec<S>) -> BoxFuture<'static, Result<HashMap<S, V>, E>> + Send + Sync>;

/// A batch lookup over the cache of an existing `MemoizedCall`.
///
/// Given a prefix of key arguments and a list of sub-keys, cached sub-keys
/// are served from the cache and the rest are fetched with one bulk backend
/// call. Each fetched sub-key is written back as its own cache entry, so
/// later single-key calls hit.
pub struct BatchMemoizedCall<P, S, K, V, E> {
  pub(crate) name: String,
  pub(crate) cache: Arc<Cache<K, V, E>>,
  pub(crate) key_fn: ComposeKeyFn<P, S, K>,
  pub(crate) fetch: BulkFetchFn<P, S, V, E>,
  pub(crate) list_arg: usize,
}

impl<P, S, K, V, E> Clone for BatchMemoizedCall<P, S, K, V, E> {
  fn clone(&self) -> Self {
    Self {
      name: self.name.clone(),
      cache: self.cache.clone(),
      key_fn: self.key_fn.clone(),
      fetch: self.fetch.clone(),
      list_arg: self.list_arg,
    }
  }
}

impl<P, S, K: CacheKey, V, E> fmt::Debug for BatchMemoizedCall<P, S, K, V, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BatchMemoizedCall")
      .field("name", &self.name)
      .field("cache", &self.cache.name())
      .field("list_arg", &self.list_arg)
      .finish_non_exhaustive()
  }
}

impl<P, S, K, V, E> BatchMemoizedCall<P, S, K, V, E>
where
  P: Send + 'static,
  S: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
  K: CacheKey,
  V: Default + Send + Sync + 'static,
  E: Clone + Send + Sync + 'static,
{
  /// Starts building a batch call over `cache`. `key` composes the full
  /// cache key from the prefix arguments and one sub-key.
  pub fn builder<F>(name: impl Into<String>, cache: Arc<Cache<K, V, E>>, key: F) -> BatchMemoizedCallBuilder<P, S, K, V, E>
  where
    F: Fn(&P, &S) -> K + Send + Sync + 'static,
  {
    BatchMemoizedCallBuilder::new(name, cache, key)
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// The key position the sub-keys fill, as recorded at build time. The key
  /// composer is what places them.
  pub fn list_arg(&self) -> usize {
    self.list_arg
  }

  pub fn cache(&self) -> &Arc<Cache<K, V, E>> {
    &self.cache
  }

  /// Resolves every sub-key, fetching the uncached ones in one bulk call.
  ///
  /// Sub-keys the bulk call does not return resolve to `V::default()`. The
  /// combined result fails with the first error any sub-key produces.
  pub fn call<I>(&self, prefix: P, sub_keys: I) -> BoxFuture<'static, Result<HashMap<S, Arc<V>>, E>>
  where
    I: IntoIterator<Item = S>,
  {
    let mut seen = HashSet::new();
    let mut observers = Vec::new();
    let mut missing = Vec::new();

    for sub_key in sub_keys {
      if !seen.insert(sub_key.clone()) {
        continue;
      }
      match self.cache.get(&(self.key_fn)(&prefix, &sub_key)) {
        Ok(pending) => observers.push((sub_key, pending.observe())),
        Err(_) => missing.push(sub_key),
      }
    }

    if !missing.is_empty() {
      // One token for the whole batch: any invalidation during the bulk
      // read drops every write-back it would make.
      let token = self.cache.begin_read();

      let entries: Vec<(S, K, PendingResult<V, E>)> = missing
        .iter()
        .map(|sub_key| {
          let key = (self.key_fn)(&prefix, sub_key);
          let pending = PendingResult::new();
          observers.push((sub_key.clone(), pending.observe()));
          (sub_key.clone(), key, pending)
        })
        .collect();

      tracing::debug!(
        cache = %self.cache.name(),
        batch = %self.name,
        missing = ?missing,
        "batch cache miss, calling bulk backend"
      );
      let fetch = (self.fetch)(prefix, missing);

      for (_, key, pending) in &entries {
        self.cache.commit(token, key.clone(), pending.clone());
      }

      let in_flight = InFlight::new(
        self.cache.clone(),
        entries.iter().map(|(_, key, pending)| (key.clone(), pending.clone())).collect(),
      );
      self.cache.scheduler().spawn(async move {
        match fetch.await {
          Ok(mut found) => {
            for (sub_key, _, pending) in entries {
              let value = found.remove(&sub_key).unwrap_or_default();
              pending.resolve(Ok(value));
            }
          }
          Err(error) => in_flight.fail(error),
        }
      });
    }

    Box::pin(async move {
      let resolved = try_join_all(
        observers
          .into_iter()
          .map(|(sub_key, observer)| async move { observer.await.map(|value| (sub_key, value)) }),
      )
      .await?;
      Ok(resolved.into_iter().collect())
    })
  }
}
