use crate::backend::RoomBackend;
use crate::config::RoomStoreConfig;
use crate::error::StoreError;
use crate::model::{PublicRoom, Room, RoomNameAndAliases};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use fibre_memo::{debug_caches, BatchMemoizedCall, BuildError, CacheOptions, CacheRegistry, MemoizedCall, Scheduler};

type RoomKey = (String,);
type GetRoom = MemoizedCall<RoomKey, RoomKey, Option<Room>, StoreError>;
type GetNameAndAliases = MemoizedCall<RoomKey, RoomKey, RoomNameAndAliases, StoreError>;
type GetNamesAndAliases = BatchMemoizedCall<(), String, RoomKey, RoomNameAndAliases, StoreError>;

fn check_consistency(options: &CacheOptions) -> bool {
  options.debug || debug_caches()
}

/// Room accessors backed by a `RoomBackend`, with memoized reads.
///
/// Each store owns its caches. Writes made through the store invalidate the
/// entries they affect.
pub struct RoomStore {
  backend: Arc<dyn RoomBackend>,
  get_room: GetRoom,
  get_room_name_and_aliases: GetNameAndAliases,
  get_room_names_and_aliases: GetNamesAndAliases,
}

impl fmt::Debug for RoomStore {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RoomStore")
      .field("get_room", &self.get_room)
      .field("get_room_name_and_aliases", &self.get_room_name_and_aliases)
      .field("get_room_names_and_aliases", &self.get_room_names_and_aliases)
      .finish_non_exhaustive()
  }
}

impl RoomStore {
  pub fn new(backend: Arc<dyn RoomBackend>, scheduler: &Scheduler, config: &RoomStoreConfig) -> Result<Self, BuildError> {
    let get_room = GetRoom::builder("get_room", |(room_id,): &RoomKey| (room_id.clone(),))
      .options(&config.get_room)
      .check_consistency(check_consistency(&config.get_room))
      .build(scheduler, {
        let backend = backend.clone();
        move |(room_id,): RoomKey| backend.select_room(room_id)
      })?;

    let get_room_name_and_aliases =
      GetNameAndAliases::builder("get_room_name_and_aliases", |(room_id,): &RoomKey| (room_id.clone(),))
        .options(&config.get_room_name_and_aliases)
        .check_consistency(check_consistency(&config.get_room_name_and_aliases))
        .build(scheduler, {
          let backend = backend.clone();
          move |(room_id,): RoomKey| {
            let lookup = backend.select_name_and_aliases(vec![room_id.clone()]);
            async move {
              let mut found = lookup.await?;
              Ok::<_, StoreError>(found.remove(&room_id).unwrap_or_default())
            }
          }
        })?;

    let get_room_names_and_aliases = GetNamesAndAliases::builder(
      "get_room_names_and_aliases",
      get_room_name_and_aliases.cache().clone(),
      |_: &(), room_id: &String| (room_id.clone(),),
    )
    .build({
      let backend = backend.clone();
      move |_: (), room_ids: Vec<String>| backend.select_name_and_aliases(room_ids)
    })?;

    Ok(Self {
      backend,
      get_room,
      get_room_name_and_aliases,
      get_room_names_and_aliases,
    })
  }

  /// Adds this store's caches to `registry` under their method names.
  pub fn register_caches(&self, registry: &CacheRegistry) {
    registry.register(self.get_room.cache().clone());
    registry.register(self.get_room_name_and_aliases.cache().clone());
  }

  /// Stores a new room.
  ///
  /// Backend failures are logged and reported as a generic internal error.
  pub async fn store_room(&self, room_id: &str, creator: &str, is_public: bool) -> Result<(), StoreError> {
    let room = Room {
      room_id: room_id.to_string(),
      creator: creator.to_string(),
      is_public,
    };
    if let Err(e) = self.backend.insert_room(room).await {
      tracing::error!(room_id, error = %e, "store_room failed");
      return Err(StoreError::Internal("Problem creating room.".to_string()));
    }
    self.get_room.invalidate(&(room_id.to_string(),));
    Ok(())
  }

  /// Returns the room, or `None` if no such room was stored.
  pub async fn get_room(&self, room_id: &str) -> Result<Option<Room>, StoreError> {
    let room = self.get_room.call((room_id.to_string(),)).await?;
    Ok((*room).clone())
  }

  /// Returns the ids of all public rooms. Not cached.
  pub async fn get_public_room_ids(&self) -> Result<Vec<String>, StoreError> {
    self.backend.select_public_room_ids().await
  }

  /// Lists the rooms with the given visibility for the room directory. Only
  /// rooms with at least one alias are listed. Not cached.
  pub async fn get_rooms(&self, is_public: bool) -> Result<Vec<PublicRoom>, StoreError> {
    let rows = self.backend.select_rooms(is_public).await?;
    Ok(
      rows
        .into_iter()
        .filter(|row| !row.aliases.is_empty())
        .map(PublicRoom::from)
        .collect(),
    )
  }

  pub async fn get_room_name_and_aliases(&self, room_id: &str) -> Result<RoomNameAndAliases, StoreError> {
    let found = self.get_room_name_and_aliases.call((room_id.to_string(),)).await?;
    Ok((*found).clone())
  }

  /// Looks up several rooms, fetching the ones not cached with a single
  /// backend request.
  pub async fn get_room_names_and_aliases<I>(&self, room_ids: I) -> Result<HashMap<String, RoomNameAndAliases>, StoreError>
  where
    I: IntoIterator<Item = String>,
  {
    let found = self.get_room_names_and_aliases.call((), room_ids).await?;
    Ok(
      found
        .into_iter()
        .map(|(room_id, value)| (room_id, (*value).clone()))
        .collect(),
    )
  }

  pub async fn set_room_name(&self, room_id: &str, name: &str) -> Result<(), StoreError> {
    self
      .backend
      .set_room_name(room_id.to_string(), name.to_string())
      .await?;
    self.get_room_name_and_aliases.invalidate(&(room_id.to_string(),));
    tracing::debug!(room_id, name, "room name updated");
    Ok(())
  }

  pub async fn add_room_aliases(&self, room_id: &str, aliases: Vec<String>) -> Result<(), StoreError> {
    self.backend.add_room_aliases(room_id.to_string(), aliases).await?;
    self.get_room_name_and_aliases.invalidate(&(room_id.to_string(),));
    tracing::debug!(room_id, "room aliases added");
    Ok(())
  }
}
