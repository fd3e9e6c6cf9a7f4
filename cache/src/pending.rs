use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use generational_arena::{Arena, Index};

/// The internal state of a pending computation.
enum State<V, E> {
  Pending,
  Resolved(Arc<V>),
  Failed(E),
  // The producer went away without resolving, e.g. its task panicked.
  Abandoned,
}

/// The internal, mutex-protected core of a `PendingResult`.
struct Inner<V, E> {
  state: State<V, E>,
  // One slot per queued observer, drained exactly once on resolution.
  waiters: Arena<Waker>,
}

/// A shareable, single-assignment result of an asynchronous computation.
///
/// Exactly one producer resolves it with a value or an error. Any number of
/// observers may attach before or after that happens; each one completes
/// once with the same outcome. Values are shared as `Arc<V>`, errors are
/// cloned per observer.
pub struct PendingResult<V, E> {
  inner: Arc<Mutex<Inner<V, E>>>,
}

impl<V, E> Clone for PendingResult<V, E> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl<V, E> fmt::Debug for PendingResult<V, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let inner = self.inner.lock();
    let state = match inner.state {
      State::Pending => "pending",
      State::Resolved(_) => "resolved",
      State::Failed(_) => "failed",
      State::Abandoned => "abandoned",
    };
    f.debug_struct("PendingResult")
      .field("state", &state)
      .field("waiting", &inner.waiters.len())
      .finish()
  }
}

impl<V, E> Default for PendingResult<V, E> {
  fn default() -> Self {
    Self::new()
  }
}

impl<V, E> PendingResult<V, E> {
  /// Creates a new, unresolved result.
  pub fn new() -> Self {
    Self::with_state(State::Pending)
  }

  /// Creates a result that is already resolved with `value`.
  pub fn resolved(value: V) -> Self {
    Self::with_state(State::Resolved(Arc::new(value)))
  }

  /// Creates a result that has already failed with `error`.
  pub fn failed(error: E) -> Self {
    Self::with_state(State::Failed(error))
  }

  fn with_state(state: State<V, E>) -> Self {
    Self {
      inner: Arc::new(Mutex::new(Inner {
        state,
        waiters: Arena::new(),
      })),
    }
  }

  /// Resolves the result and wakes every queued observer.
  ///
  /// Returns `false`, leaving the first outcome in place, if the result was
  /// already resolved.
  pub fn resolve(&self, outcome: Result<V, E>) -> bool {
    let state = match outcome {
      Ok(value) => State::Resolved(Arc::new(value)),
      Err(error) => State::Failed(error),
    };
    if !self.settle(state) {
      tracing::warn!("ignoring second resolution of an already resolved result");
      return false;
    }
    true
  }

  /// Marks the computation as abandoned if it never resolved. Observers
  /// then panic instead of waiting forever, the way a `Shared` future does
  /// when its inner future panicked.
  ///
  /// Returns `false` if the result was already resolved.
  pub fn abandon(&self) -> bool {
    self.settle(State::Abandoned)
  }

  fn settle(&self, state: State<V, E>) -> bool {
    let waiters: Vec<Waker> = {
      let mut inner = self.inner.lock();
      if !matches!(inner.state, State::Pending) {
        return false;
      }
      inner.state = state;
      let waiters = inner.waiters.iter().map(|(_, waker)| waker.clone()).collect();
      inner.waiters.clear();
      waiters
    };

    // Wake outside the lock; a woken observer locks again to read the state.
    for waker in waiters {
      waker.wake();
    }
    true
  }

  /// Whether the result has settled, successfully, with an error, or by
  /// being abandoned.
  pub fn is_resolved(&self) -> bool {
    !matches!(self.inner.lock().state, State::Pending)
  }

  /// The number of observers currently queued for the outcome.
  pub fn waiting(&self) -> usize {
    self.inner.lock().waiters.len()
  }

  /// Returns `true` if both handles refer to the same computation.
  pub fn ptr_eq(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.inner, &other.inner)
  }

  /// Attaches a new observer.
  pub fn observe(&self) -> Observer<V, E> {
    Observer {
      pending: self.clone(),
      slot: None,
    }
  }
}

/// A future that completes with the outcome of a `PendingResult`.
///
/// Dropping an observer detaches it; the underlying computation carries on
/// for everyone else.
pub struct Observer<V, E> {
  pending: PendingResult<V, E>,
  slot: Option<Index>,
}

impl<V, E> fmt::Debug for Observer<V, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Observer")
      .field("pending", &self.pending)
      .field("queued", &self.slot.is_some())
      .finish()
  }
}

impl<V, E: Clone> Future for Observer<V, E> {
  type Output = Result<Arc<V>, E>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let this = self.get_mut();
    let mut guard = this.pending.inner.lock();
    let inner = &mut *guard;

    match &inner.state {
      State::Resolved(value) => {
        this.slot = None;
        Poll::Ready(Ok(value.clone()))
      }
      State::Failed(error) => {
        this.slot = None;
        Poll::Ready(Err(error.clone()))
      }
      State::Abandoned => {
        this.slot = None;
        panic!("the computation behind this result was abandoned before it resolved");
      }
      State::Pending => {
        match this.slot.and_then(|slot| inner.waiters.get_mut(slot)) {
          Some(waker) => {
            if !waker.will_wake(cx.waker()) {
              *waker = cx.waker().clone();
            }
          }
          None => this.slot = Some(inner.waiters.insert(cx.waker().clone())),
        }
        Poll::Pending
      }
    }
  }
}

impl<V, E> Drop for Observer<V, E> {
  fn drop(&mut self) {
    if let Some(slot) = self.slot.take() {
      self.pending.inner.lock().waiters.remove(slot);
    }
  }
}
