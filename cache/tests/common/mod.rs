#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbError(pub String);

/// A fake database.
///
/// Reads take their snapshot of the data as soon as they start (like a
/// SELECT that has begun executing) and then wait on a gate, so tests can
/// hold reads in flight while they write and invalidate.
#[derive(Clone)]
pub struct FakeDb {
  rows: Arc<Mutex<HashMap<String, String>>>,
  reads: Arc<AtomicUsize>,
  bulk_requests: Arc<Mutex<Vec<Vec<String>>>>,
  failing: Arc<AtomicBool>,
  gate: Arc<Semaphore>,
}

impl FakeDb {
  /// A database whose reads complete as soon as they are polled.
  pub fn open() -> Self {
    Self::with_permits(1)
  }

  /// A database whose reads wait until `release` is called.
  pub fn gated() -> Self {
    Self::with_permits(0)
  }

  fn with_permits(permits: usize) -> Self {
    Self {
      rows: Arc::new(Mutex::new(HashMap::new())),
      reads: Arc::new(AtomicUsize::new(0)),
      bulk_requests: Arc::new(Mutex::new(Vec::new())),
      failing: Arc::new(AtomicBool::new(false)),
      gate: Arc::new(Semaphore::new(permits)),
    }
  }

  pub fn release(&self) {
    self.gate.add_permits(1);
  }

  pub fn set(&self, key: &str, value: &str) {
    self.rows.lock().insert(key.to_string(), value.to_string());
  }

  pub fn set_failing(&self, failing: bool) {
    self.failing.store(failing, Ordering::SeqCst);
  }

  /// Single-key reads started so far.
  pub fn reads(&self) -> usize {
    self.reads.load(Ordering::SeqCst)
  }

  /// The key lists passed to each bulk read, in order.
  pub fn bulk_requests(&self) -> Vec<Vec<String>> {
    self.bulk_requests.lock().clone()
  }

  /// Starts a read. The row is snapshotted now; the returned future waits
  /// on the gate before completing.
  pub fn read(&self, key: String) -> impl Future<Output = Result<String, DbError>> + Send + 'static {
    self.reads.fetch_add(1, Ordering::SeqCst);
    let snapshot = self.rows.lock().get(&key).cloned();
    let failing = self.failing.load(Ordering::SeqCst);
    let gate = self.gate.clone();

    async move {
      wait(&gate).await;
      if failing {
        return Err(DbError(format!("read of {} failed", key)));
      }
      Ok(snapshot.unwrap_or_default())
    }
  }

  /// Starts a bulk read that returns only the keys that exist.
  pub fn read_many(&self, keys: Vec<String>) -> impl Future<Output = Result<HashMap<String, String>, DbError>> + Send + 'static {
    self.bulk_requests.lock().push(keys.clone());
    let snapshot: HashMap<String, String> = {
      let rows = self.rows.lock();
      keys
        .iter()
        .filter_map(|key| rows.get(key).map(|value| (key.clone(), value.clone())))
        .collect()
    };
    let failing = self.failing.load(Ordering::SeqCst);
    let gate = self.gate.clone();

    async move {
      wait(&gate).await;
      if failing {
        return Err(DbError("bulk read failed".to_string()));
      }
      Ok(snapshot)
    }
  }
}

async fn wait(gate: &Semaphore) {
  // The semaphore is never closed, so acquiring only ever waits.
  if let Ok(permit) = gate.acquire().await {
    drop(permit);
  }
}
