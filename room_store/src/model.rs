use serde::{Deserialize, Serialize};

/// A row of the rooms table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
  pub room_id: String,
  pub creator: String,
  pub is_public: bool,
}

/// The current name and published aliases of a room.
///
/// Rooms without a name event or aliases are represented by the default
/// value, not by an absence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomNameAndAliases {
  pub name: Option<String>,
  pub aliases: Vec<String>,
}

/// A room as read for the room directory, with its current state joined in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRow {
  pub room_id: String,
  pub name: Option<String>,
  pub topic: Option<String>,
  pub history_visibility: Option<String>,
  pub guest_access: Option<String>,
  pub aliases: Vec<String>,
}

/// A room directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicRoom {
  pub room_id: String,
  pub name: Option<String>,
  pub topic: Option<String>,
  pub world_readable: bool,
  pub guest_can_join: bool,
  pub aliases: Vec<String>,
}

impl From<RoomRow> for PublicRoom {
  fn from(row: RoomRow) -> Self {
    Self {
      world_readable: row.history_visibility.as_deref() == Some("world_readable"),
      guest_can_join: row.guest_access.as_deref() == Some("can_join"),
      room_id: row.room_id,
      name: row.name,
      topic: row.topic,
      aliases: row.aliases,
    }
  }
}
