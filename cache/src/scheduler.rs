#[cfg(feature = "tokio")]
use crate::error::SchedulerError;
use crate::runtime::TaskSpawner;

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

static NEXT_SCHEDULER_ID: AtomicU64 = AtomicU64::new(1);

struct SchedulerInner {
  id: u64,
  owner: ThreadId,
  spawner: Arc<dyn TaskSpawner>,
}

/// A handle to the single cooperative scheduler that owns a set of caches.
///
/// The scheduler is bound to the thread that created it. Caches built with
/// it may only be used from that thread, and backend computations are
/// spawned onto it through its `TaskSpawner`. With a current-thread Tokio
/// runtime both hold for every task the runtime drives.
#[derive(Clone)]
pub struct Scheduler {
  inner: Arc<SchedulerInner>,
}

impl fmt::Debug for Scheduler {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Scheduler")
      .field("id", &self.inner.id)
      .field("owner", &self.inner.owner)
      .finish_non_exhaustive()
  }
}

impl Scheduler {
  /// Creates a scheduler owned by the calling thread.
  pub fn new(spawner: Arc<dyn TaskSpawner>) -> Self {
    Self {
      inner: Arc::new(SchedulerInner {
        id: NEXT_SCHEDULER_ID.fetch_add(1, Ordering::Relaxed),
        owner: thread::current().id(),
        spawner,
      }),
    }
  }

  /// Creates a scheduler for the current Tokio runtime, owned by the calling
  /// thread.
  ///
  /// Panics outside of a Tokio runtime, or inside a multi-threaded one; see
  /// `try_tokio`.
  #[cfg(feature = "tokio")]
  pub fn tokio() -> Self {
    match Self::try_tokio() {
      Ok(scheduler) => scheduler,
      Err(e) => panic!("{}", e),
    }
  }

  /// Creates a scheduler for the current Tokio runtime, owned by the calling
  /// thread.
  ///
  /// Only a current-thread runtime keeps every spawned backend task on the
  /// owning thread, so any other flavor is rejected.
  #[cfg(feature = "tokio")]
  pub fn try_tokio() -> Result<Self, SchedulerError> {
    use tokio::runtime::{Handle, RuntimeFlavor};

    let handle = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;
    let flavor = handle.runtime_flavor();
    if flavor != RuntimeFlavor::CurrentThread {
      return Err(SchedulerError::UnsupportedRuntime(format!("{:?}", flavor)));
    }
    Ok(Self::new(Arc::new(crate::runtime::TokioSpawner::with_handle(handle))))
  }

  pub fn id(&self) -> u64 {
    self.inner.id
  }

  /// The thread this scheduler is bound to.
  pub fn owner(&self) -> ThreadId {
    self.inner.owner
  }

  /// Returns `true` when called from the owning thread.
  pub fn is_current(&self) -> bool {
    thread::current().id() == self.inner.owner
  }

  /// Panics unless called from the owning thread.
  ///
  /// Caches do no locking of their own across await points and rely on a
  /// single cooperative scheduler; touching one from elsewhere is a bug in
  /// the caller, not a recoverable condition.
  pub(crate) fn assert_current(&self, cache: &str) {
    if !self.is_current() {
      panic!(
        "cache `{}` can only be used from its owning scheduler (scheduler {} on {:?}, called from {:?})",
        cache,
        self.inner.id,
        self.inner.owner,
        thread::current().id()
      );
    }
  }

  /// Spawns a detached task onto the scheduler.
  pub fn spawn<F>(&self, future: F)
  where
    F: Future<Output = ()> + Send + 'static,
  {
    self.inner.spawner.spawn(Box::pin(future));
  }
}
