//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings with microsecond precision, so
//! lexical order matches chronological order. Relation tags are stored as one
//! comma-separated column.

use chrono::{DateTime, SecondsFormat, Utc};
use kusi_core::{
  entity::Entity,
  model::DataValue,
  relation::{Relation, split_tags},
};
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::{Number, Value};

use crate::{Error, Result};

// ─── DateTime<Utc> ────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

// ─── Column values ────────────────────────────────────────────────────────────

pub fn encode_data_value(value: &DataValue) -> SqlValue {
  match value {
    DataValue::Null => SqlValue::Null,
    DataValue::Text(s) => SqlValue::Text(s.clone()),
    DataValue::Integer(i) => SqlValue::Integer(*i),
  }
}

/// Convert a raw column into JSON. Blobs are not produced by this schema and
/// are read as lossy UTF-8.
pub fn column_to_json(value: ValueRef<'_>) -> Value {
  match value {
    ValueRef::Null => Value::Null,
    ValueRef::Integer(i) => Value::from(i),
    ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
    ValueRef::Text(t) | ValueRef::Blob(t) => {
      Value::String(String::from_utf8_lossy(t).into_owned())
    }
  }
}

/// Read every column of `row` as `(alias, value)` pairs.
pub fn read_columns(
  row: &rusqlite::Row<'_>,
  names: &[String],
) -> rusqlite::Result<Vec<(String, Value)>> {
  names
    .iter()
    .enumerate()
    .map(|(i, name)| Ok((name.clone(), column_to_json(row.get_ref(i)?))))
    .collect()
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Columns read for a typed [`Entity`], in [`RawEntity::from_row`] order.
pub const ENTITY_SELECT: &str = "id, parent, model, active, created_by, \
                                 updated_by, publicated_at, unpublicated_at, \
                                 created_at, updated_at, deleted_at";

/// Raw values read directly from an `entities` row.
pub struct RawEntity {
  pub id:              String,
  pub parent:          Option<String>,
  pub model:           String,
  pub active:          bool,
  pub created_by:      Option<String>,
  pub updated_by:      Option<String>,
  pub publicated_at:   Option<String>,
  pub unpublicated_at: Option<String>,
  pub created_at:      String,
  pub updated_at:      String,
  pub deleted_at:      Option<String>,
}

impl RawEntity {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:              row.get(0)?,
      parent:          row.get(1)?,
      model:           row.get(2)?,
      active:          row.get(3)?,
      created_by:      row.get(4)?,
      updated_by:      row.get(5)?,
      publicated_at:   row.get(6)?,
      unpublicated_at: row.get(7)?,
      created_at:      row.get(8)?,
      updated_at:      row.get(9)?,
      deleted_at:      row.get(10)?,
    })
  }

  pub fn into_entity(self) -> Result<Entity> {
    Ok(Entity {
      id:              self.id.into(),
      parent:          self.parent.filter(|p| !p.is_empty()).map(Into::into),
      model:           self.model,
      active:          self.active,
      created_by:      self.created_by,
      updated_by:      self.updated_by,
      publicated_at:   decode_opt_dt(self.publicated_at)?,
      unpublicated_at: decode_opt_dt(self.unpublicated_at)?,
      created_at:      decode_dt(&self.created_at)?,
      updated_at:      decode_dt(&self.updated_at)?,
      deleted_at:      decode_opt_dt(self.deleted_at)?,
    })
  }
}

/// Columns read for a typed [`Relation`], in [`RawRelation::from_row`] order.
pub const RELATION_SELECT: &str = "entity_caller_id, entity_called_id, kind, \
                                   position, tags, created_at, updated_at";

/// Raw values read directly from a `relations` row.
pub struct RawRelation {
  pub caller:     String,
  pub called:     String,
  pub kind:       String,
  pub position:   Option<i64>,
  pub tags:       Option<String>,
  pub created_at: String,
  pub updated_at: String,
}

impl RawRelation {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      caller:     row.get(0)?,
      called:     row.get(1)?,
      kind:       row.get(2)?,
      position:   row.get(3)?,
      tags:       row.get(4)?,
      created_at: row.get(5)?,
      updated_at: row.get(6)?,
    })
  }

  pub fn into_relation(self) -> Result<Relation> {
    Ok(Relation {
      caller:     self.caller.into(),
      called:     self.called.into(),
      kind:       self.kind,
      position:   self.position,
      tags:       self.tags.as_deref().map(split_tags).unwrap_or_default(),
      created_at: decode_dt(&self.created_at)?,
      updated_at: decode_dt(&self.updated_at)?,
    })
  }
}

/// One `contents` row as read by single-entity fetches.
#[derive(Debug, Clone)]
pub struct ContentRow {
  pub field: String,
  pub lang:  String,
  pub value: String,
}

impl ContentRow {
  pub fn to_json(&self) -> Value {
    serde_json::json!({
      "field": self.field,
      "lang":  self.lang,
      "value": self.value,
    })
  }
}
