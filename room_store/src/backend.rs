use crate::error::StoreError;
use crate::model::{Room, RoomNameAndAliases, RoomRow};

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use futures_util::future::{self, BoxFuture};
use parking_lot::Mutex;

/// The storage operations a `RoomStore` reads and writes through.
///
/// Every operation returns a `'static` future so it can run detached from
/// the caller that started it.
pub trait RoomBackend: Send + Sync + 'static {
  fn insert_room(&self, room: Room) -> BoxFuture<'static, Result<(), StoreError>>;

  fn select_room(&self, room_id: String) -> BoxFuture<'static, Result<Option<Room>, StoreError>>;

  fn select_public_room_ids(&self) -> BoxFuture<'static, Result<Vec<String>, StoreError>>;

  /// Rooms with the given visibility, joined with their current name, topic,
  /// history visibility, guest access and aliases.
  fn select_rooms(&self, is_public: bool) -> BoxFuture<'static, Result<Vec<RoomRow>, StoreError>>;

  /// Looks up several rooms at once. Rooms with neither a name nor aliases
  /// may be left out of the result.
  fn select_name_and_aliases(
    &self,
    room_ids: Vec<String>,
  ) -> BoxFuture<'static, Result<HashMap<String, RoomNameAndAliases>, StoreError>>;

  fn set_room_name(&self, room_id: String, name: String) -> BoxFuture<'static, Result<(), StoreError>>;

  fn add_room_aliases(&self, room_id: String, aliases: Vec<String>) -> BoxFuture<'static, Result<(), StoreError>>;
}

#[derive(Default)]
struct Tables {
  rooms: BTreeMap<String, Room>,
  names: HashMap<String, String>,
  aliases: HashMap<String, Vec<String>>,
  topics: HashMap<String, String>,
  history_visibility: HashMap<String, String>,
  guest_access: HashMap<String, String>,
}

/// An in-memory `RoomBackend`.
///
/// Counts the reads it serves and can be switched into a failing state.
#[derive(Default)]
pub struct MemoryBackend {
  tables: Mutex<Tables>,
  failing: AtomicBool,
  room_selects: AtomicUsize,
  name_requests: Mutex<Vec<Vec<String>>>,
}

impl MemoryBackend {
  pub fn new() -> Self {
    Self::default()
  }

  /// While set, every operation fails with `StoreError::Internal`.
  pub fn set_failing(&self, failing: bool) {
    self.failing.store(failing, Ordering::SeqCst);
  }

  /// Number of `select_room` calls served.
  pub fn room_selects(&self) -> usize {
    self.room_selects.load(Ordering::SeqCst)
  }

  /// The room ids passed to each `select_name_and_aliases` call, in order.
  pub fn name_requests(&self) -> Vec<Vec<String>> {
    self.name_requests.lock().clone()
  }

  pub fn set_room_topic(&self, room_id: &str, topic: &str) {
    self.tables.lock().topics.insert(room_id.to_string(), topic.to_string());
  }

  pub fn set_history_visibility(&self, room_id: &str, visibility: &str) {
    self
      .tables
      .lock()
      .history_visibility
      .insert(room_id.to_string(), visibility.to_string());
  }

  pub fn set_guest_access(&self, room_id: &str, access: &str) {
    self.tables.lock().guest_access.insert(room_id.to_string(), access.to_string());
  }

  fn check_available(&self) -> Result<(), StoreError> {
    if self.failing.load(Ordering::SeqCst) {
      return Err(StoreError::Internal("backend unavailable".to_string()));
    }
    Ok(())
  }
}

impl RoomBackend for MemoryBackend {
  fn insert_room(&self, room: Room) -> BoxFuture<'static, Result<(), StoreError>> {
    let result = self.check_available().and_then(|()| {
      let mut tables = self.tables.lock();
      if tables.rooms.contains_key(&room.room_id) {
        return Err(StoreError::Internal(format!("duplicate room id {}", room.room_id)));
      }
      tables.rooms.insert(room.room_id.clone(), room);
      Ok(())
    });
    Box::pin(future::ready(result))
  }

  fn select_room(&self, room_id: String) -> BoxFuture<'static, Result<Option<Room>, StoreError>> {
    self.room_selects.fetch_add(1, Ordering::SeqCst);
    let result = self
      .check_available()
      .map(|()| self.tables.lock().rooms.get(&room_id).cloned());
    Box::pin(future::ready(result))
  }

  fn select_public_room_ids(&self) -> BoxFuture<'static, Result<Vec<String>, StoreError>> {
    let result = self.check_available().map(|()| {
      self
        .tables
        .lock()
        .rooms
        .values()
        .filter(|room| room.is_public)
        .map(|room| room.room_id.clone())
        .collect()
    });
    Box::pin(future::ready(result))
  }

  fn select_rooms(&self, is_public: bool) -> BoxFuture<'static, Result<Vec<RoomRow>, StoreError>> {
    let result = self.check_available().map(|()| {
      let tables = self.tables.lock();
      tables
        .rooms
        .values()
        .filter(|room| room.is_public == is_public)
        .map(|room| {
          let room_id = &room.room_id;
          RoomRow {
            room_id: room_id.clone(),
            name: tables.names.get(room_id).cloned(),
            topic: tables.topics.get(room_id).cloned(),
            history_visibility: tables.history_visibility.get(room_id).cloned(),
            guest_access: tables.guest_access.get(room_id).cloned(),
            aliases: tables.aliases.get(room_id).cloned().unwrap_or_default(),
          }
        })
        .collect()
    });
    Box::pin(future::ready(result))
  }

  fn select_name_and_aliases(
    &self,
    room_ids: Vec<String>,
  ) -> BoxFuture<'static, Result<HashMap<String, RoomNameAndAliases>, StoreError>> {
    self.name_requests.lock().push(room_ids.clone());
    let result = self.check_available().map(|()| {
      let tables = self.tables.lock();
      room_ids
        .into_iter()
        .filter_map(|room_id| {
          let name = tables.names.get(&room_id).cloned();
          let aliases = tables.aliases.get(&room_id).cloned().unwrap_or_default();
          if name.is_none() && aliases.is_empty() {
            return None;
          }
          Some((room_id, RoomNameAndAliases { name, aliases }))
        })
        .collect()
    });
    Box::pin(future::ready(result))
  }

  fn set_room_name(&self, room_id: String, name: String) -> BoxFuture<'static, Result<(), StoreError>> {
    let result = self.check_available().map(|()| {
      self.tables.lock().names.insert(room_id, name);
    });
    Box::pin(future::ready(result))
  }

  fn add_room_aliases(&self, room_id: String, aliases: Vec<String>) -> BoxFuture<'static, Result<(), StoreError>> {
    let result = self.check_available().map(|()| {
      self.tables.lock().aliases.entry(room_id).or_default().extend(aliases);
    });
    Box::pin(future::ready(result))
  }
}
