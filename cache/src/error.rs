use thiserror::Error;

/// Errors that can occur when registering a memoized call.
///
/// These are configuration errors: they are raised once, at build time, and
/// retrying will not help.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
  /// The cache was configured with a capacity of zero entries.
  #[error("cache `{name}`: max_entries cannot be zero")]
  ZeroCapacity { name: String },
  /// The key type does not have the configured number of key arguments.
  #[error("cache `{name}`: configured num_args is {expected}, but the key tuple has {actual} elements")]
  KeyArity {
    name: String,
    expected: usize,
    actual: usize,
  },
  /// The wrapped function has fewer fixed positional arguments than `num_args`.
  #[error("cache `{name}`: not enough explicit positional arguments to key off of (need {num_args}, have {available})")]
  NotEnoughArguments {
    name: String,
    num_args: usize,
    available: usize,
  },
  /// The list argument of a batch call is not one of the key arguments.
  #[error("batch cache `{name}`: list argument position {list_arg} is outside the {num_args} key arguments")]
  ListArgOutOfRange {
    name: String,
    list_arg: usize,
    num_args: usize,
  },
}

/// Errors returned by cache lookups and invalidations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
  /// The key is not present in the cache.
  #[error("key not found in cache")]
  NotFound,
  /// A type-erased key did not match the cache's key tuple type.
  #[error("cache `{cache}`: key must be a {arity}-tuple of type `{expected}`")]
  InvalidKey {
    cache: String,
    expected: &'static str,
    arity: usize,
  },
  /// No live cache is registered under the given name.
  #[error("no cache registered under the name `{0}`")]
  UnknownCache(String),
}

/// Errors creating a `Scheduler` for an async runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
  /// Not called from within a runtime.
  #[error("no Tokio runtime is running on this thread")]
  NoRuntime,
  /// Caches are bound to one thread, so the runtime must drive every task on
  /// the thread that owns them.
  #[error("caches need a current-thread runtime, found a {0} runtime")]
  UnsupportedRuntime(String),
}
