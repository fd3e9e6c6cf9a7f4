use fibre_memo::{CacheError, CacheHandle, CacheRegistry, Scheduler};
use fibre_rooms::{MemoryBackend, PublicRoom, RoomNameAndAliases, RoomStore, RoomStoreConfig, StoreError};

use std::sync::Arc;

use pretty_assertions::assert_eq;

fn setup() -> (Arc<MemoryBackend>, RoomStore) {
  let backend = Arc::new(MemoryBackend::new());
  let store = RoomStore::new(backend.clone(), &Scheduler::tokio(), &RoomStoreConfig::default()).unwrap();
  (backend, store)
}

fn ids(ids: &[&str]) -> Vec<String> {
  ids.iter().map(|id| id.to_string()).collect()
}

#[tokio::test]
async fn test_get_room_is_cached_and_invalidated_by_store_room() {
  let (backend, store) = setup();

  assert_eq!(store.get_room("!a:hs").await.unwrap(), None);
  assert_eq!(store.get_room("!a:hs").await.unwrap(), None);
  assert_eq!(backend.room_selects(), 1, "the absent room is cached too");

  store.store_room("!a:hs", "@alice:hs", true).await.unwrap();

  let room = store.get_room("!a:hs").await.unwrap().unwrap();
  assert_eq!(room.creator, "@alice:hs");
  assert!(room.is_public);
  store.get_room("!a:hs").await.unwrap();
  assert_eq!(backend.room_selects(), 2);
}

#[tokio::test]
async fn test_store_room_failure_is_reported_generically() {
  let (backend, store) = setup();
  store.store_room("!a:hs", "@alice:hs", false).await.unwrap();

  let duplicate = store.store_room("!a:hs", "@bob:hs", false).await;
  assert_eq!(duplicate, Err(StoreError::Internal("Problem creating room.".to_string())));

  backend.set_failing(true);
  let unavailable = store.store_room("!b:hs", "@bob:hs", false).await;
  assert_eq!(unavailable, Err(StoreError::Internal("Problem creating room.".to_string())));
}

#[tokio::test]
async fn test_public_room_ids() {
  let (_backend, store) = setup();
  store.store_room("!a:hs", "@alice:hs", true).await.unwrap();
  store.store_room("!b:hs", "@alice:hs", false).await.unwrap();
  store.store_room("!c:hs", "@bob:hs", true).await.unwrap();

  assert_eq!(store.get_public_room_ids().await.unwrap(), ids(&["!a:hs", "!c:hs"]));
}

#[tokio::test]
async fn test_room_directory_lists_aliased_rooms() {
  let (backend, store) = setup();
  store.store_room("!a:hs", "@alice:hs", true).await.unwrap();
  store.store_room("!b:hs", "@alice:hs", true).await.unwrap();
  store.store_room("!c:hs", "@bob:hs", false).await.unwrap();

  store.set_room_name("!a:hs", "Lobby").await.unwrap();
  store.add_room_aliases("!a:hs", ids(&["#lobby:hs"])).await.unwrap();
  store.add_room_aliases("!c:hs", ids(&["#secret:hs"])).await.unwrap();
  backend.set_room_topic("!a:hs", "Say hello");
  backend.set_history_visibility("!a:hs", "world_readable");
  backend.set_guest_access("!a:hs", "can_join");
  backend.set_history_visibility("!c:hs", "shared");
  backend.set_guest_access("!c:hs", "forbidden");

  // "!b:hs" is public but has no alias, so it is not listed.
  assert_eq!(
    store.get_rooms(true).await.unwrap(),
    vec![PublicRoom {
      room_id: "!a:hs".to_string(),
      name: Some("Lobby".to_string()),
      topic: Some("Say hello".to_string()),
      world_readable: true,
      guest_can_join: true,
      aliases: ids(&["#lobby:hs"]),
    }]
  );

  let private = store.get_rooms(false).await.unwrap();
  assert_eq!(private.len(), 1);
  assert_eq!(private[0].room_id, "!c:hs");
  assert!(!private[0].world_readable);
  assert!(!private[0].guest_can_join);
  assert_eq!(private[0].name, None);

  backend.set_failing(true);
  assert!(store.get_rooms(true).await.is_err());
}

#[tokio::test]
async fn test_name_and_aliases_follow_writes() {
  let (backend, store) = setup();

  assert_eq!(store.get_room_name_and_aliases("!a:hs").await.unwrap(), RoomNameAndAliases::default());

  store.set_room_name("!a:hs", "Lobby").await.unwrap();
  assert_eq!(
    store.get_room_name_and_aliases("!a:hs").await.unwrap(),
    RoomNameAndAliases {
      name: Some("Lobby".to_string()),
      aliases: vec![],
    }
  );

  store.add_room_aliases("!a:hs", ids(&["#lobby:hs"])).await.unwrap();
  let current = store.get_room_name_and_aliases("!a:hs").await.unwrap();
  assert_eq!(current.aliases, ids(&["#lobby:hs"]));

  store.get_room_name_and_aliases("!a:hs").await.unwrap();
  assert_eq!(backend.name_requests().len(), 3, "one read per invalidation");
}

#[tokio::test]
async fn test_batch_lookup_fetches_missing_rooms_once() {
  let (backend, store) = setup();
  store.set_room_name("!a:hs", "Lobby").await.unwrap();
  store.set_room_name("!b:hs", "Off-topic").await.unwrap();
  store.get_room_name_and_aliases("!a:hs").await.unwrap();

  let found = store
    .get_room_names_and_aliases(ids(&["!a:hs", "!b:hs", "!unnamed:hs"]))
    .await
    .unwrap();

  assert_eq!(found.len(), 3);
  assert_eq!(found["!b:hs"].name.as_deref(), Some("Off-topic"));
  assert_eq!(found["!unnamed:hs"], RoomNameAndAliases::default());
  assert_eq!(
    backend.name_requests(),
    vec![ids(&["!a:hs"]), ids(&["!b:hs", "!unnamed:hs"])]
  );

  // Single lookups now hit what the batch fetched.
  store.get_room_name_and_aliases("!b:hs").await.unwrap();
  store.get_room_name_and_aliases("!unnamed:hs").await.unwrap();
  assert_eq!(backend.name_requests().len(), 2);
}

#[tokio::test]
async fn test_backend_failure_is_not_cached() {
  let (backend, store) = setup();
  store.set_room_name("!a:hs", "Lobby").await.unwrap();

  backend.set_failing(true);
  assert_eq!(
    store.get_room_name_and_aliases("!a:hs").await,
    Err(StoreError::Internal("backend unavailable".to_string()))
  );
  assert!(store
    .get_room_names_and_aliases(ids(&["!a:hs", "!b:hs"]))
    .await
    .is_err());

  backend.set_failing(false);
  let found = store.get_room_name_and_aliases("!a:hs").await.unwrap();
  assert_eq!(found.name.as_deref(), Some("Lobby"));
}

#[tokio::test]
async fn test_caches_are_managed_through_the_registry() {
  let (backend, store) = setup();
  let registry = CacheRegistry::new();
  store.register_caches(&registry);

  assert_eq!(registry.names(), ids(&["get_room", "get_room_name_and_aliases"]));

  store.get_room("!a:hs").await.unwrap();
  store.get_room("!a:hs").await.unwrap();
  let metrics = registry.get("get_room").unwrap().metrics();
  assert_eq!(metrics.hits, 1);
  assert_eq!(metrics.misses, 1);

  registry.invalidate("get_room", &("!a:hs".to_string(),)).unwrap();
  store.get_room("!a:hs").await.unwrap();
  assert_eq!(backend.room_selects(), 2);

  let wrong_key = registry.invalidate("get_room", &"!a:hs".to_string());
  assert!(matches!(wrong_key, Err(CacheError::InvalidKey { arity: 1, .. })));
  assert_eq!(
    registry.invalidate("get_rooms", &("!a:hs".to_string(),)),
    Err(CacheError::UnknownCache("get_rooms".to_string()))
  );
}

#[tokio::test]
async fn test_config_limits_cache_size() {
  let backend = Arc::new(MemoryBackend::new());
  let config = RoomStoreConfig::from_yaml_str("get_room:\n  max_entries: 1\n").unwrap();
  let store = RoomStore::new(backend.clone(), &Scheduler::tokio(), &config).unwrap();

  store.get_room("!a:hs").await.unwrap();
  store.get_room("!b:hs").await.unwrap();
  store.get_room("!a:hs").await.unwrap();
  assert_eq!(backend.room_selects(), 3);
}
