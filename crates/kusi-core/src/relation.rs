//! Relations: directed, tagged, ordered edges between entities.
//!
//! The same table carries arbitrary associations (`kind` = any tag) and the
//! materialised ancestor closure (`kind` = [`ANCESTOR_KIND`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EntityId, Error, Result};

/// Edge kind reserved for the ancestor closure.
pub const ANCESTOR_KIND: &str = "ancestor";

/// Relation columns exposed to relation-scoped queries.
pub const RELATION_COLUMNS: &[&str] = &["kind", "position", "tags"];

pub fn is_relation_column(name: &str) -> bool {
  RELATION_COLUMNS.contains(&name)
}

/// A persisted edge from `caller` to `called`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
  pub caller:     EntityId,
  pub called:     EntityId,
  pub kind:       String,
  /// Distance for ancestor edges (1 = parent); free ordering otherwise.
  pub position:   Option<i64>,
  pub tags:       Vec<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Relation {
  pub fn is_ancestor(&self) -> bool { self.kind == ANCESTOR_KIND }
}

/// Input to [`crate::store::EntityStore::relate`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewRelation {
  pub caller:   EntityId,
  pub called:   EntityId,
  pub kind:     String,
  #[serde(default)]
  pub position: Option<i64>,
  #[serde(default)]
  pub tags:     Vec<String>,
}

impl NewRelation {
  pub fn new(
    caller: impl Into<EntityId>,
    called: impl Into<EntityId>,
    kind: impl Into<String>,
  ) -> Self {
    Self {
      caller:   caller.into(),
      called:   called.into(),
      kind:     kind.into(),
      position: None,
      tags:     Vec::new(),
    }
  }

  /// Ancestor edges are written only by the hierarchy materializer, and
  /// every tag must survive the comma-joined storage unchanged.
  pub fn validate(&self) -> Result<()> {
    if self.kind == ANCESTOR_KIND {
      return Err(Error::AncestorKindReserved);
    }
    if let Some(tag) = self
      .tags
      .iter()
      .find(|tag| tag.is_empty() || tag.contains(','))
    {
      return Err(Error::InvalidTag(tag.clone()));
    }
    Ok(())
  }
}

/// Tags are stored as one comma-separated column.
pub fn join_tags(tags: &[String]) -> Option<String> {
  if tags.is_empty() {
    None
  } else {
    Some(tags.join(","))
  }
}

pub fn split_tags(raw: &str) -> Vec<String> {
  if raw.is_empty() {
    Vec::new()
  } else {
    raw.split(',').map(str::to_owned).collect()
  }
}
