use thiserror::Error;

/// Errors returned by the room store and its backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
  #[error("{0}")]
  Internal(String),
}

/// Errors loading a `RoomStoreConfig`.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("Failed to read configuration file: {0}")]
  Read(#[from] std::io::Error),

  #[error("Failed to parse configuration: {0}")]
  Parse(String),
}
