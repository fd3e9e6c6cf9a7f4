//! Room storage accessors for a Matrix homeserver.
//!
//! Reads that are hot on the request path (`get_room`, room names and
//! aliases) are memoized with `fibre_memo`; the write paths invalidate the
//! entries they change.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use fibre_memo::Scheduler;
//! use fibre_rooms::{MemoryBackend, RoomStore, RoomStoreConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RoomStore::new(Arc::new(MemoryBackend::new()), &Scheduler::tokio(), &RoomStoreConfig::default())?;
//! store.store_room("!abc:example.org", "@alice:example.org", true).await?;
//! let room = store.get_room("!abc:example.org").await?;
//! # let _ = room;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod model;
mod store;

pub use backend::{MemoryBackend, RoomBackend};
pub use config::RoomStoreConfig;
pub use error::{ConfigError, StoreError};
pub use model::{PublicRoom, Room, RoomNameAndAliases, RoomRow};
pub use store::RoomStore;
