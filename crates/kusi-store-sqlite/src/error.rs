//! Error type for `kusi-store-sqlite`.

use kusi_core::EntityId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// Validation failures raised before any write.
  #[error("core error: {0}")]
  Core(#[from] kusi_core::Error),

  /// Any failure reported by SQLite; a creation in progress is rolled back.
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("entity not found: {0}")]
  NotFound(EntityId),

  /// The parent named by a create payload does not exist.
  #[error("parent entity not found: {0}")]
  ParentNotFound(EntityId),

  /// `get_parent` on an entity created without a parent.
  #[error("entity {0} has no parent")]
  NoParent(EntityId),
}

impl Error {
  /// True for the not-found family of errors.
  pub fn is_not_found(&self) -> bool {
    matches!(
      self,
      Self::NotFound(_) | Self::ParentNotFound(_) | Self::NoParent(_)
    )
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
