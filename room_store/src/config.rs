use crate::error::ConfigError;

use std::fs;
use std::path::Path;

use fibre_memo::CacheOptions;
use serde::{Deserialize, Serialize};

/// Cache settings for a `RoomStore`, one section per memoized accessor.
///
/// A section that is present but incomplete takes the framework defaults for
/// its missing fields.
///
/// ```yaml
/// get_room:
///   max_entries: 5000
/// get_room_name_and_aliases:
///   max_entries: 1000
///   lru: false
///   debug: true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RoomStoreConfig {
  pub get_room: CacheOptions,
  pub get_room_name_and_aliases: CacheOptions,
}

impl Default for RoomStoreConfig {
  fn default() -> Self {
    Self {
      get_room: CacheOptions::default(),
      // Name lookups are evicted in insertion order.
      get_room_name_and_aliases: CacheOptions {
        lru: false,
        ..CacheOptions::default()
      },
    }
  }
}

impl RoomStoreConfig {
  pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
    serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))
  }

  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let yaml = fs::read_to_string(path)?;
    Self::from_yaml_str(&yaml)
  }
}
