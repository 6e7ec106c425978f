//! `halcyon-archive` — Archive (C3): embedded full-text + exact-match
//! store for turns evicted from [`halcyon_session::SessionBuffer`] and
//! retired world-model items.

pub mod db;
pub mod error;
pub mod manager;
pub mod types;

pub use error::{ArchiveError, Result};
pub use manager::Archive;
pub use types::{ArchiveRecord, Role, Turn, WorldModelHistoryEntry};
