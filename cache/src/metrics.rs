use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::CachePadded;

/// Per-cache counters. All fields are atomic to allow for lock-free updates.
#[derive(Debug)]
pub(crate) struct Metrics {
  // --- Lookups ---
  pub(crate) hits: CachePadded<AtomicU64>,
  pub(crate) misses: CachePadded<AtomicU64>,

  // --- Writes ---
  pub(crate) commits: CachePadded<AtomicU64>,
  pub(crate) dropped_commits: CachePadded<AtomicU64>,
  pub(crate) prefills: CachePadded<AtomicU64>,

  // --- Removals ---
  pub(crate) invalidations: CachePadded<AtomicU64>,
  pub(crate) clears: CachePadded<AtomicU64>,
  pub(crate) evictions: CachePadded<AtomicU64>,

  // --- Backend ---
  pub(crate) backend_failures: CachePadded<AtomicU64>,
  pub(crate) stale_entries: CachePadded<AtomicU64>,

  created_at: Instant,
}

impl Default for Metrics {
  fn default() -> Self {
    Self {
      hits: CachePadded::new(AtomicU64::new(0)),
      misses: CachePadded::new(AtomicU64::new(0)),
      commits: CachePadded::new(AtomicU64::new(0)),
      dropped_commits: CachePadded::new(AtomicU64::new(0)),
      prefills: CachePadded::new(AtomicU64::new(0)),
      invalidations: CachePadded::new(AtomicU64::new(0)),
      clears: CachePadded::new(AtomicU64::new(0)),
      evictions: CachePadded::new(AtomicU64::new(0)),
      backend_failures: CachePadded::new(AtomicU64::new(0)),
      stale_entries: CachePadded::new(AtomicU64::new(0)),
      created_at: Instant::now(),
    }
  }
}

impl Metrics {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  #[inline]
  pub(crate) fn incr(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
  }

  /// Creates a point-in-time snapshot of the current metrics.
  pub(crate) fn snapshot(&self) -> MetricsSnapshot {
    let hits = self.hits.load(Ordering::Relaxed);
    let misses = self.misses.load(Ordering::Relaxed);
    let total_lookups = hits + misses;

    MetricsSnapshot {
      hits,
      misses,
      hit_ratio: if total_lookups == 0 {
        0.0
      } else {
        hits as f64 / total_lookups as f64
      },
      commits: self.commits.load(Ordering::Relaxed),
      dropped_commits: self.dropped_commits.load(Ordering::Relaxed),
      prefills: self.prefills.load(Ordering::Relaxed),
      invalidations: self.invalidations.load(Ordering::Relaxed),
      clears: self.clears.load(Ordering::Relaxed),
      evictions: self.evictions.load(Ordering::Relaxed),
      backend_failures: self.backend_failures.load(Ordering::Relaxed),
      stale_entries: self.stale_entries.load(Ordering::Relaxed),
      uptime_secs: self.created_at.elapsed().as_secs(),
    }
  }
}

/// A point-in-time, public-facing snapshot of a cache's metrics.
#[derive(Clone, PartialEq)]
pub struct MetricsSnapshot {
  /// Lookups that found an entry (resolved or still in flight).
  pub hits: u64,
  /// Lookups that found nothing.
  pub misses: u64,
  /// The cache hit ratio (hits / (hits + misses)).
  pub hit_ratio: f64,
  /// Write-backs that were installed.
  pub commits: u64,
  /// Write-backs dropped because an invalidation raced with the read.
  pub dropped_commits: u64,
  /// Entries inserted directly via `prefill`.
  pub prefills: u64,
  /// Single-key invalidations.
  pub invalidations: u64,
  /// Whole-cache invalidations.
  pub clears: u64,
  /// Entries evicted to stay within `max_entries`.
  pub evictions: u64,
  /// Backend computations (single or bulk) that returned an error.
  pub backend_failures: u64,
  /// Cached values found to differ from a fresh recomputation.
  pub stale_entries: u64,
  /// The number of seconds the cache has been running.
  pub uptime_secs: u64,
}

impl fmt::Debug for MetricsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MetricsSnapshot")
      .field("hits", &self.hits)
      .field("misses", &self.misses)
      .field("hit_ratio", &format!("{:.2}%", self.hit_ratio * 100.0))
      .field("commits", &self.commits)
      .field("dropped_commits", &self.dropped_commits)
      .field("prefills", &self.prefills)
      .field("invalidations", &self.invalidations)
      .field("clears", &self.clears)
      .field("evictions", &self.evictions)
      .field("backend_failures", &self.backend_failures)
      .field("stale_entries", &self.stale_entries)
      .field("uptime_secs", &self.uptime_secs)
      .finish()
  }
}
