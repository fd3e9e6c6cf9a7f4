//! Asynchronous memoization caches for storage layers.
//!
//! Wraps slow asynchronous backend reads (typically database queries) in
//! per-method caches that are safe to share between many concurrent callers
//! on one cooperative scheduler.
//!
//! # Features
//! - **Coalescing**: Concurrent calls with the same key share one backend
//!   invocation through a [`PendingResult`] with any number of observers.
//! - **Race-safe write-back**: Every invalidation bumps a sequence counter;
//!   a read that raced with an invalidation is returned to its caller but
//!   never cached.
//! - **Failure eviction**: Failed backend calls are removed from the cache,
//!   so the next call retries instead of replaying the error.
//! - **Batch lookups**: [`BatchMemoizedCall`] serves cached keys and fetches
//!   the rest with one bulk call, caching each result individually.
//! - **Bounded**: LRU or insertion-order eviction by entry count.
//! - **Observability**: Per-cache metrics and a by-name [`CacheRegistry`].
//!
//! # Example
//!
//! ```no_run
//! use fibre_memo::{MemoizedCall, Scheduler};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let scheduler = Scheduler::tokio();
//! let get_display_name = MemoizedCall::builder("get_display_name", |(user_id,): &(String,)| {
//!   (user_id.clone(),)
//! })
//! .max_entries(10_000)
//! .build(&scheduler, |(user_id,): (String,)| async move {
//!   Ok::<_, String>(format!("display name of {}", user_id))
//! })?;
//!
//! let name = get_display_name.call(("@alice:example.org".to_string(),)).await?;
//! get_display_name.invalidate(&("@alice:example.org".to_string(),));
//! # let _ = name;
//! # Ok(())
//! # }
//! ```

// Public modules that form the API
pub mod builder;
pub mod error;
pub mod registry;
pub mod runtime;

// Internal, crate-only modules
mod batch;
mod bounded_map;
mod cache;
mod key;
mod memoized;
mod metrics;
mod pending;
mod scheduler;

// Re-export the primary user-facing types for convenience
pub use batch::BatchMemoizedCall;
pub use bounded_map::EvictionMode;
pub use builder::{debug_caches, BatchMemoizedCallBuilder, CacheOptions, MemoizedCallBuilder};
pub use cache::{Cache, ReadToken};
pub use error::{BuildError, CacheError, SchedulerError};
pub use key::{Arity, CacheKey};
pub use memoized::MemoizedCall;
pub use metrics::MetricsSnapshot;
pub use pending::{Observer, PendingResult};
pub use registry::{CacheHandle, CacheRegistry};
pub use scheduler::Scheduler;
#[cfg(feature = "tokio")]
pub use runtime::TokioSpawner;
pub use runtime::TaskSpawner;
