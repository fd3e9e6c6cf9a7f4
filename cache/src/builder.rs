use crate::batch::{BatchMemoizedCall, BulkFetchFn, ComposeKeyFn};
use crate::bounded_map::EvictionMode;
use crate::cache::Cache;
use crate::error::BuildError;
use crate::key::{Arity, CacheKey};
use crate::memoized::{FetchFn, KeyFn, MemoizedCall, MismatchFn};
use crate::scheduler::Scheduler;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use once_cell::sync::Lazy;

/// The environment variable that turns on consistency checks by default.
pub const DEBUG_CACHES_ENV: &str = "FIBRE_MEMO_DEBUG";

static DEBUG_CACHES: Lazy<bool> = Lazy::new(|| {
  std::env::var(DEBUG_CACHES_ENV).is_ok_and(|value| !matches!(value.as_str(), "" | "0" | "false"))
});

/// Whether consistency checks are enabled process-wide via `FIBRE_MEMO_DEBUG`.
///
/// Read once, on first use.
pub fn debug_caches() -> bool {
  *DEBUG_CACHES
}

pub const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Externally configurable settings for one memoized call.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CacheOptions {
  pub max_entries: usize,
  /// `true` for LRU eviction, `false` for insertion order.
  pub lru: bool,
  /// Recompute every hit and report stale entries. Development only.
  pub debug: bool,
}

impl Default for CacheOptions {
  fn default() -> Self {
    Self {
      max_entries: DEFAULT_MAX_ENTRIES,
      lru: true,
      debug: false,
    }
  }
}

impl CacheOptions {
  pub fn mode(&self) -> EvictionMode {
    if self.lru {
      EvictionMode::Lru
    } else {
      EvictionMode::InsertionOrder
    }
  }
}

/// A builder for `MemoizedCall`.
pub struct MemoizedCallBuilder<A, K, V, E> {
  name: String,
  num_args: usize,
  max_entries: usize,
  mode: EvictionMode,
  key_fn: KeyFn<A, K>,
  consistency_check: Option<MismatchFn<V>>,
  _error_marker: PhantomData<fn() -> E>,
}

impl<A, K, V, E> fmt::Debug for MemoizedCallBuilder<A, K, V, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MemoizedCallBuilder")
      .field("name", &self.name)
      .field("num_args", &self.num_args)
      .field("max_entries", &self.max_entries)
      .field("mode", &self.mode)
      .field("check_consistency", &self.consistency_check.is_some())
      .finish_non_exhaustive()
  }
}

impl<A, K, V, E> MemoizedCallBuilder<A, K, V, E> {
  pub(crate) fn new<F>(name: impl Into<String>, key: F) -> Self
  where
    F: Fn(&A) -> K + Send + Sync + 'static,
  {
    Self {
      name: name.into(),
      num_args: 1,
      max_entries: DEFAULT_MAX_ENTRIES,
      mode: EvictionMode::Lru,
      key_fn: Arc::new(key),
      consistency_check: None,
      _error_marker: PhantomData,
    }
  }

  /// Sets how many leading arguments form the cache key. Defaults to 1.
  pub fn num_args(mut self, num_args: usize) -> Self {
    self.num_args = num_args;
    self
  }

  /// Sets the maximum number of cached keys. Defaults to 1000.
  pub fn max_entries(mut self, max_entries: usize) -> Self {
    self.max_entries = max_entries;
    self
  }

  /// Sets the eviction mode. Defaults to LRU.
  pub fn mode(mut self, mode: EvictionMode) -> Self {
    self.mode = mode;
    self
  }

  /// Shorthand for `mode(EvictionMode::Lru)` or `mode(EvictionMode::InsertionOrder)`.
  pub fn lru(self, lru: bool) -> Self {
    self.mode(if lru {
      EvictionMode::Lru
    } else {
      EvictionMode::InsertionOrder
    })
  }

  /// Applies capacity and eviction mode from `options`.
  ///
  /// `options.debug` is not applied here, since consistency checks need
  /// comparable values; pass it to `check_consistency`.
  pub fn options(self, options: &CacheOptions) -> Self {
    self.max_entries(options.max_entries).mode(options.mode())
  }

  /// Enables or disables the consistency check on cache hits.
  ///
  /// When enabled, every hit is recomputed through the backend after the
  /// cached value is served and a differing result is logged as a stale
  /// entry. Meant for development; it doubles backend load.
  pub fn check_consistency(mut self, enabled: bool) -> Self
  where
    V: PartialEq + fmt::Debug + 'static,
  {
    self.consistency_check = if enabled {
      let consistency_check: MismatchFn<V> = Arc::new(describe_mismatch::<V>);
      Some(consistency_check)
    } else {
      None
    };
    self
  }

  /// Builds the memoized call around the backend function `fetch`.
  pub fn build<F, Fut>(self, scheduler: &Scheduler, fetch: F) -> Result<MemoizedCall<A, K, V, E>, BuildError>
  where
    A: Arity + 'static,
    K: CacheKey,
    V: 'static,
    E: 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
  {
    if K::ARITY != self.num_args {
      return Err(BuildError::KeyArity {
        name: self.name,
        expected: self.num_args,
        actual: K::ARITY,
      });
    }
    if A::ARITY < self.num_args {
      return Err(BuildError::NotEnoughArguments {
        name: self.name,
        num_args: self.num_args,
        available: A::ARITY,
      });
    }

    let cache = Cache::new(self.name, self.max_entries, self.mode, scheduler.clone())?;
    let fetch: FetchFn<A, V, E> =
      Arc::new(move |args: A| Box::pin(fetch(args)) as BoxFuture<'static, Result<V, E>>);

    Ok(MemoizedCall {
      cache: Arc::new(cache),
      key_fn: self.key_fn,
      fetch,
      consistency_check: self.consistency_check,
    })
  }
}

/// A builder for `BatchMemoizedCall`.
pub struct BatchMemoizedCallBuilder<P, S, K, V, E> {
  name: String,
  cache: Arc<Cache<K, V, E>>,
  key_fn: ComposeKeyFn<P, S, K>,
  num_args: usize,
  list_arg: Option<usize>,
}

impl<P, S, K: CacheKey, V, E> fmt::Debug for BatchMemoizedCallBuilder<P, S, K, V, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BatchMemoizedCallBuilder")
      .field("name", &self.name)
      .field("cache", &self.cache.name())
      .field("num_args", &self.num_args)
      .field("list_arg", &self.list_arg)
      .finish_non_exhaustive()
  }
}

impl<P, S, K: CacheKey, V, E> BatchMemoizedCallBuilder<P, S, K, V, E> {
  pub(crate) fn new<F>(name: impl Into<String>, cache: Arc<Cache<K, V, E>>, key: F) -> Self
  where
    F: Fn(&P, &S) -> K + Send + Sync + 'static,
  {
    let num_args = cache.num_args();
    Self {
      name: name.into(),
      cache,
      key_fn: Arc::new(key),
      num_args,
      list_arg: None,
    }
  }

  /// Sets how many arguments form the key, list argument included. Must
  /// match the shared cache. Defaults to the cache's arity.
  pub fn num_args(mut self, num_args: usize) -> Self {
    self.num_args = num_args;
    self
  }

  /// Records which key position the sub-keys fill. Defaults to the last key
  /// argument.
  ///
  /// Only checked to be within `num_args`. Where the sub-key actually lands
  /// in the key is decided by the key composer passed to `builder`.
  pub fn list_arg(mut self, position: usize) -> Self {
    self.list_arg = Some(position);
    self
  }

  /// Builds the batch call around the bulk backend function `fetch`.
  ///
  /// `fetch` receives the prefix arguments and exactly the sub-keys missing
  /// from the cache, and returns the values it found keyed by sub-key.
  pub fn build<F, Fut>(self, fetch: F) -> Result<BatchMemoizedCall<P, S, K, V, E>, BuildError>
  where
    P: 'static,
    S: Eq + Hash + 'static,
    V: 'static,
    E: 'static,
    F: Fn(P, Vec<S>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HashMap<S, V>, E>> + Send + 'static,
  {
    if self.num_args != K::ARITY {
      return Err(BuildError::KeyArity {
        name: self.name,
        expected: self.num_args,
        actual: K::ARITY,
      });
    }
    let list_arg = self.list_arg.unwrap_or(self.num_args.saturating_sub(1));
    if list_arg >= self.num_args {
      return Err(BuildError::ListArgOutOfRange {
        name: self.name,
        list_arg,
        num_args: self.num_args,
      });
    }

    let fetch: BulkFetchFn<P, S, V, E> = Arc::new(move |prefix: P, sub_keys: Vec<S>| {
      Box::pin(fetch(prefix, sub_keys)) as BoxFuture<'static, Result<HashMap<S, V>, E>>
    });

    Ok(BatchMemoizedCall {
      name: self.name,
      cache: self.cache,
      key_fn: self.key_fn,
      fetch,
      list_arg,
    })
  }
}

fn describe_mismatch<V: PartialEq + fmt::Debug>(cached: &V, actual: &V) -> Option<String> {
  (cached != actual).then(|| format!("cached: {:?}, actual: {:?}", cached, actual))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::runtime::TaskSpawner;

  use std::pin::Pin;

  struct NoopSpawner;

  impl TaskSpawner for NoopSpawner {
    fn spawn(&self, _future: Pin<Box<dyn Future<Output = ()> + Send>>) {}
  }

  async fn fetch_name(_args: (String, u64)) -> Result<String, ()> {
    Ok(String::new())
  }

  #[test]
  fn key_arity_must_match_num_args() {
    let scheduler = Scheduler::new(Arc::new(NoopSpawner));
    let err = MemoizedCall::builder("get_name", |(user, _): &(String, u64)| (user.clone(),))
      .num_args(2)
      .build(&scheduler, fetch_name)
      .unwrap_err();
    assert_eq!(
      err,
      BuildError::KeyArity {
        name: "get_name".to_string(),
        expected: 2,
        actual: 1
      }
    );
  }

  #[test]
  fn num_args_cannot_exceed_positional_arguments() {
    let scheduler = Scheduler::new(Arc::new(NoopSpawner));
    let err = MemoizedCall::builder("get_name", |(user, stream): &(String, u64)| {
      (user.clone(), *stream, 0u8)
    })
    .num_args(3)
    .build(&scheduler, fetch_name)
    .unwrap_err();
    assert!(matches!(
      err,
      BuildError::NotEnoughArguments {
        num_args: 3,
        available: 2,
        ..
      }
    ));
  }

  #[test]
  fn zero_capacity_is_rejected() {
    let scheduler = Scheduler::new(Arc::new(NoopSpawner));
    let err = MemoizedCall::builder("get_name", |(user, _): &(String, u64)| (user.clone(),))
      .max_entries(0)
      .build(&scheduler, fetch_name)
      .unwrap_err();
    assert!(matches!(err, BuildError::ZeroCapacity { .. }));
  }

  #[test]
  fn options_set_capacity_and_mode() {
    let scheduler = Scheduler::new(Arc::new(NoopSpawner));
    let options = CacheOptions {
      max_entries: 5,
      lru: false,
      debug: false,
    };
    let call = MemoizedCall::builder("get_name", |(user, _): &(String, u64)| (user.clone(),))
      .options(&options)
      .build(&scheduler, fetch_name)
      .unwrap();
    assert_eq!(call.cache().max_entries(), 5);
    assert_eq!(call.cache().mode(), EvictionMode::InsertionOrder);
  }

  #[test]
  fn list_arg_defaults_to_the_last_key_argument() {
    let scheduler = Scheduler::new(Arc::new(NoopSpawner));
    let single = MemoizedCall::builder("get_name", |(user, stream): &(String, u64)| (user.clone(), *stream))
      .num_args(2)
      .build(&scheduler, fetch_name)
      .unwrap();
    let compose = |user: &String, stream: &u64| (user.clone(), *stream);

    let default = BatchMemoizedCall::builder("get_names", single.cache().clone(), compose)
      .build(|_user: String, _streams: Vec<u64>| async { Ok::<_, ()>(HashMap::new()) })
      .unwrap();
    assert_eq!(default.list_arg(), 1);

    let explicit = BatchMemoizedCall::builder("get_names", single.cache().clone(), compose)
      .list_arg(0)
      .build(|_user: String, _streams: Vec<u64>| async { Ok::<_, ()>(HashMap::new()) })
      .unwrap();
    assert_eq!(explicit.list_arg(), 0);
  }

  #[test]
  fn list_arg_must_be_a_key_argument() {
    let scheduler = Scheduler::new(Arc::new(NoopSpawner));
    let single = MemoizedCall::builder("get_name", |(user, stream): &(String, u64)| (user.clone(), *stream))
      .num_args(2)
      .build(&scheduler, fetch_name)
      .unwrap();

    let err = BatchMemoizedCall::builder("get_names", single.cache().clone(), |user: &String, stream: &u64| {
      (user.clone(), *stream)
    })
    .list_arg(2)
    .build(|_user: String, _streams: Vec<u64>| async { Ok::<_, ()>(HashMap::new()) })
    .unwrap_err();

    assert_eq!(
      err,
      BuildError::ListArgOutOfRange {
        name: "get_names".to_string(),
        list_arg: 2,
        num_args: 2
      }
    );
  }
}
