use crate::builder::MemoizedCallBuilder;
use crate::cache::{Cache, InFlight};
use crate::key::CacheKey;
use crate::pending::PendingResult;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;

pub(crate) type KeyFn<A, K> = Arc<dyn Fn(&A) -> K + Send + Sync>;
pub(crate) type FetchFn<A, V, E> = Arc<dyn Fn(A) -> BoxFuture<'static, Result<V, E>> + Send + Sync>;
// Returns a description of the mismatch when a cached value is stale.
pub(crate) type MismatchFn<V> = Arc<dyn Fn(&V, &V) -> Option<String> + Send + Sync>;

/// A memoized asynchronous backend call.
///
/// Results are cached per key, where the key is derived from the call's
/// arguments by the key function given at registration. Concurrent calls
/// with the same key share one backend invocation. A failed invocation is
/// removed from the cache so the next call retries.
pub struct MemoizedCall<A, K, V, E> {
  pub(crate) cache: Arc<Cache<K, V, E>>,
  pub(crate) key_fn: KeyFn<A, K>,
  pub(crate) fetch: FetchFn<A, V, E>,
  pub(crate) consistency_check: Option<MismatchFn<V>>,
}

impl<A, K, V, E> Clone for MemoizedCall<A, K, V, E> {
  fn clone(&self) -> Self {
    Self {
      cache: self.cache.clone(),
      key_fn: self.key_fn.clone(),
      fetch: self.fetch.clone(),
      consistency_check: self.consistency_check.clone(),
    }
  }
}

impl<A, K: CacheKey, V, E> fmt::Debug for MemoizedCall<A, K, V, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MemoizedCall")
      .field("cache", &self.cache)
      .field("check_consistency", &self.consistency_check.is_some())
      .finish_non_exhaustive()
  }
}

impl<A, K, V, E> MemoizedCall<A, K, V, E>
where
  A: Clone + Send + 'static,
  K: CacheKey,
  V: Send + Sync + 'static,
  E: Clone + Send + Sync + 'static,
{
  /// Starts building a memoized call named `name` whose cache key is
  /// extracted from the arguments by `key`.
  pub fn builder<F>(name: impl Into<String>, key: F) -> MemoizedCallBuilder<A, K, V, E>
  where
    F: Fn(&A) -> K + Send + Sync + 'static,
  {
    MemoizedCallBuilder::new(name, key)
  }

  pub fn cache(&self) -> &Arc<Cache<K, V, E>> {
    &self.cache
  }

  /// Calls the backend, or joins the cached or in-flight result for the same
  /// key.
  ///
  /// The backend future runs detached on the cache's scheduler and is never
  /// cancelled; dropping the returned future only stops observing it.
  pub fn call(&self, args: A) -> BoxFuture<'static, Result<Arc<V>, E>> {
    let key = (self.key_fn)(&args);

    match self.cache.get(&key) {
      Ok(pending) => {
        let observer = pending.observe();
        match &self.consistency_check {
          None => Box::pin(observer),
          Some(consistency_check) => Box::pin(check_consistency(
            self.cache.clone(),
            key,
            observer,
            (self.fetch)(args),
            consistency_check.clone(),
          )),
        }
      }
      Err(_) => {
        // Take the token before the read starts so an invalidation racing
        // with it is detected at commit time.
        let token = self.cache.begin_read();
        let pending = PendingResult::new();
        let observer = pending.observe();

        tracing::debug!(cache = %self.cache.name(), ?key, "cache miss, calling backend");
        let fetch = (self.fetch)(args);
        self.cache.commit(token, key.clone(), pending.clone());

        let in_flight = InFlight::new(self.cache.clone(), vec![(key, pending.clone())]);
        self.cache.scheduler().spawn(async move {
          match fetch.await {
            Ok(value) => {
              pending.resolve(Ok(value));
            }
            Err(error) => in_flight.fail(error),
          }
        });

        Box::pin(observer)
      }
    }
  }

  pub fn invalidate(&self, key: &K) {
    self.cache.invalidate(key);
  }

  pub fn invalidate_all(&self) {
    self.cache.invalidate_all();
  }

  /// Seeds the cache with a value known from elsewhere, e.g. a write path.
  pub fn prefill(&self, key: K, value: V) {
    self.cache.prefill(key, PendingResult::resolved(value));
  }
}

// Serves the cached value, then recomputes it and reports a mismatch. The
// recomputed value is never written back.
async fn check_consistency<K, V, E, Fut>(
  cache: Arc<Cache<K, V, E>>,
  key: K,
  cached: impl Future<Output = Result<Arc<V>, E>>,
  recompute: Fut,
  consistency_check: MismatchFn<V>,
) -> Result<Arc<V>, E>
where
  K: CacheKey,
  Fut: Future<Output = Result<V, E>>,
{
  let cached = cached.await?;
  match recompute.await {
    Ok(actual) => {
      if let Some(mismatch) = consistency_check(&cached, &actual) {
        cache.record_stale_entry();
        tracing::error!(cache = %cache.name(), ?key, %mismatch, "stale cache entry");
      }
    }
    Err(_) => {
      tracing::warn!(cache = %cache.name(), ?key, "consistency check failed to recompute entry");
    }
  }
  Ok(cached)
}
