mod common;

use common::{DbError, FakeDb};
use fibre_memo::{BatchMemoizedCall, MemoizedCall, Scheduler};

use std::collections::HashMap;

use pretty_assertions::assert_eq;

type Key = (String, String);
type GetMembership = MemoizedCall<Key, Key, String, DbError>;
type GetMemberships = BatchMemoizedCall<String, String, Key, String, DbError>;

fn row(room: &str, user: &str) -> String {
  format!("{}/{}", room, user)
}

fn build(db: &FakeDb) -> (GetMembership, GetMemberships) {
  let scheduler = Scheduler::tokio();

  let single = MemoizedCall::builder("get_membership", |(room, user): &Key| (room.clone(), user.clone()))
    .num_args(2)
    .build(&scheduler, {
      let db = db.clone();
      move |(room, user): Key| db.read(row(&room, &user))
    })
    .unwrap();

  let batch = BatchMemoizedCall::builder("get_memberships", single.cache().clone(), |room: &String, user: &String| {
    (room.clone(), user.clone())
  })
  .list_arg(1)
  .build({
    let db = db.clone();
    move |room: String, users: Vec<String>| {
      let rows = db.read_many(users.iter().map(|user| row(&room, user)).collect());
      async move {
        let rows = rows.await?;
        let found: HashMap<String, String> = users
          .into_iter()
          .filter_map(|user| rows.get(&row(&room, &user)).map(|value| (user, value.clone())))
          .collect();
        Ok::<_, DbError>(found)
      }
    }
  })
  .unwrap();

  (single, batch)
}

fn users(names: &[&str]) -> Vec<String> {
  names.iter().map(|name| name.to_string()).collect()
}

fn unwrap_values(result: Result<HashMap<String, std::sync::Arc<String>>, DbError>) -> HashMap<String, String> {
  result
    .unwrap()
    .into_iter()
    .map(|(user, value)| (user, (*value).clone()))
    .collect()
}

#[tokio::test]
async fn test_batch_fetches_only_missing_keys() {
  let db = FakeDb::open();
  db.set("!r/k1", "join");
  db.set("!r/k2", "invite");
  db.set("!r/k3", "leave");
  let (single, batch) = build(&db);

  single.call(("!r".to_string(), "k1".to_string())).await.unwrap();
  assert_eq!(db.reads(), 1);

  let result = batch.call("!r".to_string(), users(&["k1", "k2", "k3"])).await;

  let expected: HashMap<String, String> = [("k1", "join"), ("k2", "invite"), ("k3", "leave")]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
  assert_eq!(unwrap_values(result), expected);
  assert_eq!(db.bulk_requests(), vec![vec![row("!r", "k2"), row("!r", "k3")]]);

  // Bulk results were cached per key.
  assert_eq!(*single.call(("!r".to_string(), "k2".to_string())).await.unwrap(), "invite");
  assert_eq!(db.reads(), 1);
  assert_eq!(db.bulk_requests().len(), 1);
}

#[tokio::test]
async fn test_fully_cached_batch_skips_backend() {
  let db = FakeDb::open();
  let (single, batch) = build(&db);
  single.prefill(("!r".to_string(), "k1".to_string()), "join".to_string());
  single.prefill(("!r".to_string(), "k2".to_string()), "leave".to_string());

  let result = unwrap_values(batch.call("!r".to_string(), users(&["k1", "k2"])).await);

  assert_eq!(result.len(), 2);
  assert!(db.bulk_requests().is_empty());
}

#[tokio::test]
async fn test_absent_sub_keys_resolve_to_default() {
  let db = FakeDb::open();
  db.set("!r/k1", "join");
  let (single, batch) = build(&db);

  let result = unwrap_values(batch.call("!r".to_string(), users(&["k1", "ghost"])).await);

  assert_eq!(result.get("k1").map(String::as_str), Some("join"));
  assert_eq!(result.get("ghost").map(String::as_str), Some(""));

  // The absent value is cached like any other.
  assert_eq!(*single.call(("!r".to_string(), "ghost".to_string())).await.unwrap(), "");
  assert_eq!(db.reads(), 0);
}

#[tokio::test]
async fn test_duplicate_sub_keys_are_fetched_once() {
  let db = FakeDb::open();
  db.set("!r/k1", "join");
  let (_single, batch) = build(&db);

  let result = unwrap_values(batch.call("!r".to_string(), users(&["k1", "k1", "k1"])).await);

  assert_eq!(result.len(), 1);
  assert_eq!(db.bulk_requests(), vec![vec![row("!r", "k1")]]);
}

#[tokio::test]
async fn test_bulk_failure_fails_batch_and_invalidates_missing_keys() {
  let db = FakeDb::gated();
  db.set("!r/k2", "invite");
  let (single, batch) = build(&db);
  single.prefill(("!r".to_string(), "k1".to_string()), "join".to_string());
  db.set_failing(true);

  let failing = batch.call("!r".to_string(), users(&["k1", "k2", "k3"]));
  // A concurrent single-key caller joins the in-flight bulk entry.
  let joined = single.call(("!r".to_string(), "k2".to_string()));
  db.release();

  assert_eq!(failing.await.unwrap_err(), DbError("bulk read failed".to_string()));
  assert_eq!(joined.await.unwrap_err(), DbError("bulk read failed".to_string()));
  assert_eq!(db.reads(), 0, "the single caller was coalesced into the bulk read");

  let cache = single.cache();
  assert!(cache.contains(&("!r".to_string(), "k1".to_string())), "cached keys are untouched");
  assert!(!cache.contains(&("!r".to_string(), "k2".to_string())));
  assert!(!cache.contains(&("!r".to_string(), "k3".to_string())));
  assert_eq!(cache.metrics().backend_failures, 1);

  // Nothing failed is replayed; the next batch fetches again.
  db.set_failing(false);
  let result = unwrap_values(batch.call("!r".to_string(), users(&["k1", "k2", "k3"])).await);
  assert_eq!(result.get("k2").map(String::as_str), Some("invite"));
  assert_eq!(db.bulk_requests().len(), 2);
}

#[tokio::test]
async fn test_invalidation_during_bulk_read_is_respected() {
  let db = FakeDb::gated();
  db.set("!r/k1", "invite");
  db.set("!r/k2", "invite");
  let (single, batch) = build(&db);

  let in_flight = batch.call("!r".to_string(), users(&["k1", "k2"]));
  db.set("!r/k1", "join");
  single.invalidate(&("!r".to_string(), "k1".to_string()));
  db.release();

  let result = unwrap_values(in_flight.await);
  assert_eq!(result.get("k1").map(String::as_str), Some("invite"));

  // k1 is re-read; k2 is still served from the bulk result.
  assert_eq!(*single.call(("!r".to_string(), "k1".to_string())).await.unwrap(), "join");
  assert_eq!(*single.call(("!r".to_string(), "k2".to_string())).await.unwrap(), "invite");
  assert_eq!(db.reads(), 1);
}
