use crate::bounded_map::{BoundedMap, EvictionMode};
use crate::error::{BuildError, CacheError};
use crate::key::CacheKey;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::pending::PendingResult;
use crate::scheduler::Scheduler;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// The sequence number observed when a read began.
///
/// A write-back is only installed if no invalidation happened since the
/// token was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadToken(u64);

impl ReadToken {
  pub fn sequence(&self) -> u64 {
    self.0
  }
}

struct CacheState<K, V, E> {
  entries: BoundedMap<K, PendingResult<V, E>>,
  sequence: u64,
}

/// A bounded map from key tuples to pending results, guarded by a sequence
/// counter.
///
/// Every invalidation bumps the sequence. Readers take a `ReadToken` before
/// starting a backend read and present it when writing the result back; a
/// write-back that raced with an invalidation is silently dropped so a slow
/// read can never reinstate data the invalidation meant to remove.
pub struct Cache<K, V, E> {
  name: String,
  scheduler: Scheduler,
  state: Mutex<CacheState<K, V, E>>,
  metrics: Metrics,
}

impl<K: CacheKey, V, E> fmt::Debug for Cache<K, V, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.state.lock();
    f.debug_struct("Cache")
      .field("name", &self.name)
      .field("len", &state.entries.len())
      .field("max_entries", &state.entries.max_entries())
      .field("mode", &state.entries.mode())
      .field("sequence", &state.sequence)
      .field("metrics", &self.metrics.snapshot())
      .finish()
  }
}

impl<K: CacheKey, V, E> Cache<K, V, E> {
  /// Creates an empty cache holding at most `max_entries` keys.
  pub fn new(
    name: impl Into<String>,
    max_entries: usize,
    mode: EvictionMode,
    scheduler: Scheduler,
  ) -> Result<Self, BuildError> {
    let name = name.into();
    if max_entries == 0 {
      return Err(BuildError::ZeroCapacity { name });
    }
    Ok(Self {
      name,
      scheduler,
      state: Mutex::new(CacheState {
        entries: BoundedMap::new(max_entries, mode),
        sequence: 0,
      }),
      metrics: Metrics::new(),
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// The number of key arguments, i.e. the arity of `K`.
  pub fn num_args(&self) -> usize {
    K::ARITY
  }

  pub fn scheduler(&self) -> &Scheduler {
    &self.scheduler
  }

  pub fn len(&self) -> usize {
    self.state.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn max_entries(&self) -> usize {
    self.state.lock().entries.max_entries()
  }

  pub fn mode(&self) -> EvictionMode {
    self.state.lock().entries.mode()
  }

  /// The current value of the sequence counter.
  pub fn sequence(&self) -> u64 {
    self.state.lock().sequence
  }

  /// Returns `true` if the key is present, without counting a lookup or
  /// touching LRU order.
  pub fn contains(&self, key: &K) -> bool {
    self.state.lock().entries.contains(key)
  }

  pub fn metrics(&self) -> MetricsSnapshot {
    self.metrics.snapshot()
  }

  /// Looks up the pending result stored for `key`.
  ///
  /// In LRU mode a hit refreshes the entry's recency, so lookups are held to
  /// the owning scheduler like every other mutation.
  pub fn get(&self, key: &K) -> Result<PendingResult<V, E>, CacheError> {
    self.scheduler.assert_current(&self.name);
    let mut state = self.state.lock();
    match state.entries.get(key) {
      Some(pending) => {
        Metrics::incr(&self.metrics.hits);
        Ok(pending.clone())
      }
      None => {
        Metrics::incr(&self.metrics.misses);
        Err(CacheError::NotFound)
      }
    }
  }

  /// Captures the sequence number before a backend read starts.
  pub fn begin_read(&self) -> ReadToken {
    ReadToken(self.state.lock().sequence)
  }

  /// Installs `value` under `key` if nothing was invalidated since `token`
  /// was taken. Returns whether the entry was installed.
  pub fn commit(&self, token: ReadToken, key: K, value: PendingResult<V, E>) -> bool {
    self.scheduler.assert_current(&self.name);
    let mut state = self.state.lock();
    if state.sequence != token.0 {
      Metrics::incr(&self.metrics.dropped_commits);
      tracing::debug!(
        cache = %self.name,
        ?key,
        token = token.0,
        sequence = state.sequence,
        "dropping write-back that raced with an invalidation"
      );
      return false;
    }
    self.insert(&mut state, key, value);
    Metrics::incr(&self.metrics.commits);
    true
  }

  /// Inserts `value` under `key` unconditionally.
  pub fn prefill(&self, key: K, value: PendingResult<V, E>) {
    self.scheduler.assert_current(&self.name);
    let mut state = self.state.lock();
    self.insert(&mut state, key, value);
    Metrics::incr(&self.metrics.prefills);
  }

  /// Removes `key` and bumps the sequence so that in-flight reads of the old
  /// state are not written back. Removing an absent key is not an error.
  pub fn invalidate(&self, key: &K) {
    self.scheduler.assert_current(&self.name);
    self.remove(key);
  }

  /// Removes every entry and bumps the sequence.
  pub fn invalidate_all(&self) {
    self.scheduler.assert_current(&self.name);
    let mut state = self.state.lock();
    state.sequence += 1;
    state.entries.clear();
    Metrics::incr(&self.metrics.clears);
    tracing::debug!(cache = %self.name, sequence = state.sequence, "invalidated all entries");
  }

  /// Invalidates a key whose type is only known at runtime.
  ///
  /// Fails with `CacheError::InvalidKey` unless `key` is exactly this
  /// cache's key tuple type.
  pub fn invalidate_dyn(&self, key: &dyn Any) -> Result<(), CacheError> {
    match key.downcast_ref::<K>() {
      Some(key) => {
        self.invalidate(key);
        Ok(())
      }
      None => Err(CacheError::InvalidKey {
        cache: self.name.clone(),
        expected: std::any::type_name::<K>(),
        arity: K::ARITY,
      }),
    }
  }

  pub(crate) fn record_backend_failure(&self) {
    Metrics::incr(&self.metrics.backend_failures);
  }

  /// Invalidates the entry of a failed backend computation.
  ///
  /// Never panics. It runs in the detached backend task, which a custom
  /// `TaskSpawner` may run off the owning scheduler.
  pub(crate) fn invalidate_failed(&self, key: &K) {
    if !self.scheduler.is_current() {
      tracing::warn!(cache = %self.name, ?key, "invalidating a failed entry off the owning scheduler");
    }
    self.remove(key);
  }

  pub(crate) fn record_stale_entry(&self) {
    Metrics::incr(&self.metrics.stale_entries);
  }

  fn remove(&self, key: &K) {
    let mut state = self.state.lock();
    state.sequence += 1;
    state.entries.remove(key);
    Metrics::incr(&self.metrics.invalidations);
    tracing::debug!(cache = %self.name, ?key, sequence = state.sequence, "invalidated");
  }

  fn insert(&self, state: &mut CacheState<K, V, E>, key: K, value: PendingResult<V, E>) {
    if let Some(evicted) = state.entries.set(key, value) {
      Metrics::incr(&self.metrics.evictions);
      tracing::trace!(cache = %self.name, key = ?evicted, "evicted");
    }
  }
}

/// Entries whose backend computation is running in a detached task.
///
/// Held by the task for its whole lifetime. If the task is dropped before it
/// resolved an entry (its backend panicked, or the runtime shut down), the
/// entry is invalidated and abandoned so later calls retry and current
/// observers do not wait forever.
pub(crate) struct InFlight<K: CacheKey, V, E> {
  cache: Arc<Cache<K, V, E>>,
  entries: Vec<(K, PendingResult<V, E>)>,
}

impl<K: CacheKey, V, E> InFlight<K, V, E> {
  pub(crate) fn new(cache: Arc<Cache<K, V, E>>, entries: Vec<(K, PendingResult<V, E>)>) -> Self {
    Self { cache, entries }
  }

  /// Invalidates every entry, then fails its observers with `error`.
  pub(crate) fn fail(mut self, error: E)
  where
    E: Clone,
  {
    self.cache.record_backend_failure();
    for (key, pending) in self.entries.drain(..) {
      self.cache.invalidate_failed(&key);
      pending.resolve(Err(error.clone()));
    }
  }
}

impl<K: CacheKey, V, E> Drop for InFlight<K, V, E> {
  fn drop(&mut self) {
    let abandoned: Vec<_> = self.entries.drain(..).filter(|(_, pending)| !pending.is_resolved()).collect();
    if abandoned.is_empty() {
      return;
    }
    self.cache.record_backend_failure();
    for (key, pending) in abandoned {
      tracing::error!(cache = %self.cache.name, ?key, "backend computation dropped before resolving");
      self.cache.invalidate_failed(&key);
      pending.abandon();
    }
  }
}
