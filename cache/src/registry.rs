use crate::cache::Cache;
use crate::error::CacheError;
use crate::key::CacheKey;
use crate::metrics::MetricsSnapshot;

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

/// A type-erased view of a cache, used to manage caches by name.
pub trait CacheHandle: Send + Sync {
  fn name(&self) -> &str;
  fn len(&self) -> usize;
  fn metrics(&self) -> MetricsSnapshot;
  /// Invalidates one key. The key must be the cache's exact key tuple type.
  fn invalidate_key(&self, key: &dyn Any) -> Result<(), CacheError>;
  fn invalidate_all(&self);
}

impl<K, V, E> CacheHandle for Cache<K, V, E>
where
  K: CacheKey,
  V: Send + Sync + 'static,
  E: Send + 'static,
{
  fn name(&self) -> &str {
    Cache::name(self)
  }

  fn len(&self) -> usize {
    Cache::len(self)
  }

  fn metrics(&self) -> MetricsSnapshot {
    Cache::metrics(self)
  }

  fn invalidate_key(&self, key: &dyn Any) -> Result<(), CacheError> {
    self.invalidate_dyn(key)
  }

  fn invalidate_all(&self) {
    Cache::invalidate_all(self)
  }
}

static GLOBAL_REGISTRY: Lazy<CacheRegistry> = Lazy::new(CacheRegistry::new);

/// Caches indexed by name.
///
/// The registry only holds weak references; a dropped cache disappears from
/// it on the next lookup. Registering a second cache under an existing name
/// replaces the first.
#[derive(Default)]
pub struct CacheRegistry {
  caches: Mutex<BTreeMap<String, Weak<dyn CacheHandle>>>,
}

impl std::fmt::Debug for CacheRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CacheRegistry")
      .field("names", &self.names())
      .finish()
  }
}

impl CacheRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// The process-wide registry.
  pub fn global() -> &'static CacheRegistry {
    &GLOBAL_REGISTRY
  }

  pub fn register(&self, cache: Arc<dyn CacheHandle>) {
    let name = cache.name().to_string();
    let previous = self.caches.lock().insert(name.clone(), Arc::downgrade(&cache));
    if previous.is_some_and(|weak| weak.strong_count() > 0) {
      tracing::debug!(cache = %name, "replacing registered cache");
    }
  }

  pub fn get(&self, name: &str) -> Option<Arc<dyn CacheHandle>> {
    let mut caches = self.caches.lock();
    let cache = caches.get(name)?.upgrade();
    if cache.is_none() {
      caches.remove(name);
    }
    cache
  }

  /// Names of all live caches, sorted.
  pub fn names(&self) -> Vec<String> {
    self.live().into_iter().map(|cache| cache.name().to_string()).collect()
  }

  /// Metrics of all live caches, sorted by name.
  pub fn metrics(&self) -> Vec<(String, MetricsSnapshot)> {
    self
      .live()
      .into_iter()
      .map(|cache| (cache.name().to_string(), cache.metrics()))
      .collect()
  }

  /// Invalidates `key` in the cache registered as `name`.
  pub fn invalidate(&self, name: &str, key: &dyn Any) -> Result<(), CacheError> {
    self
      .get(name)
      .ok_or_else(|| CacheError::UnknownCache(name.to_string()))?
      .invalidate_key(key)
  }

  /// Clears the cache registered as `name`.
  pub fn invalidate_all(&self, name: &str) -> Result<(), CacheError> {
    self
      .get(name)
      .ok_or_else(|| CacheError::UnknownCache(name.to_string()))?
      .invalidate_all();
    Ok(())
  }

  fn live(&self) -> Vec<Arc<dyn CacheHandle>> {
    let mut caches = self.caches.lock();
    caches.retain(|_, weak| weak.strong_count() > 0);
    caches.values().filter_map(Weak::upgrade).collect()
  }
}
