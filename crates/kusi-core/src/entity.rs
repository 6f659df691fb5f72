//! Entities, the universal row, and the input shapes used to create one.
//!
//! Every object in the store is an entity. What kind of object it is lives in
//! the `model` tag; localised text lives in [`Contents`], and variant-specific
//! typed attributes live in the extension table selected by the model (see
//! [`crate::model`]).

use std::{collections::HashSet, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{Error, Result, model::DEFAULT_MODEL};

/// A reshaped result row: entity columns at the top level, with `contents`,
/// `data` and `relation` nested beneath.
pub type NestedEntity = Map<String, Value>;

/// Columns of the `entities` table that callers may select or sort by.
/// `deleted_at` is absent on purpose: read paths never return deleted rows.
pub const ENTITY_COLUMNS: &[&str] = &[
  "id",
  "parent",
  "model",
  "active",
  "created_by",
  "updated_by",
  "publicated_at",
  "unpublicated_at",
  "created_at",
  "updated_at",
];

pub fn is_entity_column(name: &str) -> bool { ENTITY_COLUMNS.contains(&name) }

// ─── Identifier ──────────────────────────────────────────────────────────────

/// Opaque entity identifier. Generated identifiers are UUID v4 strings, but
/// callers may supply any non-empty text (e.g. `"home"`).
#[derive(
  Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
  pub fn generate() -> Self { Self(Uuid::new_v4().to_string()) }

  pub fn as_str(&self) -> &str { &self.0 }

  pub fn is_empty(&self) -> bool { self.0.trim().is_empty() }
}

impl fmt::Display for EntityId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl AsRef<str> for EntityId {
  fn as_ref(&self) -> &str { &self.0 }
}

impl From<String> for EntityId {
  fn from(s: String) -> Self { Self(s) }
}

impl From<&str> for EntityId {
  fn from(s: &str) -> Self { Self(s.to_owned()) }
}

// ─── Entity ──────────────────────────────────────────────────────────────────

/// A persisted entity row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
  pub id:              EntityId,
  /// The parent declared at creation; only used to seed the ancestor chain.
  pub parent:          Option<EntityId>,
  pub model:           String,
  pub active:          bool,
  pub created_by:      Option<String>,
  pub updated_by:      Option<String>,
  pub publicated_at:   Option<DateTime<Utc>>,
  pub unpublicated_at: Option<DateTime<Utc>>,
  pub created_at:      DateTime<Utc>,
  pub updated_at:      DateTime<Utc>,
  pub deleted_at:      Option<DateTime<Utc>>,
}

// ─── Contents ────────────────────────────────────────────────────────────────

/// One localised attribute supplied at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentEntry {
  pub field: String,
  /// `None` means the configured default language.
  #[serde(default)]
  pub lang:  Option<String>,
  #[serde(deserialize_with = "text_value")]
  pub value: String,
}

impl ContentEntry {
  pub fn lang_or<'a>(&'a self, default_lang: &'a str) -> &'a str {
    self.lang.as_deref().unwrap_or(default_lang)
  }
}

/// The `contents` part of a create payload.
///
/// Accepts both shapes callers send: a list of `{field, lang?, value}` rows,
/// or an object whose keys are field names (default language). In the object
/// form, integer-like keys carry an explicit row instead of a field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Contents(Vec<ContentEntry>);

impl Contents {
  pub fn new() -> Self { Self::default() }

  /// Add a value in the default language.
  pub fn field(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
    self.0.push(ContentEntry {
      field: field.into(),
      lang:  None,
      value: value.into(),
    });
    self
  }

  /// Add a value in an explicit language.
  pub fn localized(
    mut self,
    lang: impl Into<String>,
    field: impl Into<String>,
    value: impl Into<String>,
  ) -> Self {
    self.0.push(ContentEntry {
      field: field.into(),
      lang:  Some(lang.into()),
      value: value.into(),
    });
    self
  }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }

  pub fn len(&self) -> usize { self.0.len() }

  pub fn iter(&self) -> impl Iterator<Item = &ContentEntry> { self.0.iter() }

  /// Reject two entries resolving to the same `(field, lang)` pair.
  pub fn check_unique(&self, default_lang: &str) -> Result<()> {
    let mut seen = HashSet::new();
    for entry in &self.0 {
      let lang = entry.lang_or(default_lang);
      if !seen.insert((entry.field.as_str(), lang)) {
        return Err(Error::DuplicateContent {
          field: entry.field.clone(),
          lang:  lang.to_owned(),
        });
      }
    }
    Ok(())
  }

  pub fn from_json(raw: Value) -> Result<Self> {
    match raw {
      Value::Null => Ok(Self::default()),
      Value::Array(items) => items
        .into_iter()
        .map(|item| Ok(serde_json::from_value(item)?))
        .collect::<Result<Vec<_>>>()
        .map(Self),
      Value::Object(map) => {
        let mut entries = Vec::with_capacity(map.len());
        for (key, value) in map {
          if key.parse::<u64>().is_ok() {
            entries.push(serde_json::from_value(value)?);
            continue;
          }
          let text = scalar_text(&value).ok_or_else(|| {
            Error::InvalidContents(format!(
              "value for field {key:?} must be a string, number or boolean"
            ))
          })?;
          entries.push(ContentEntry {
            field: key,
            lang:  None,
            value: text,
          });
        }
        Ok(Self(entries))
      }
      other => Err(Error::InvalidContents(format!(
        "expected a list or an object, got {other}"
      ))),
    }
  }
}

impl<'de> Deserialize<'de> for Contents {
  fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
    let raw = Value::deserialize(d)?;
    Contents::from_json(raw).map_err(de::Error::custom)
  }
}

fn scalar_text(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    _ => None,
  }
}

fn text_value<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
  let raw = Value::deserialize(d)?;
  scalar_text(&raw).ok_or_else(|| {
    de::Error::custom("content value must be a string, number or boolean")
  })
}

// ─── NewEntity ───────────────────────────────────────────────────────────────

/// Input to [`crate::store::EntityStore::create`].
/// Timestamps are always set by the store; they are not accepted from callers.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewEntity {
  /// Generated when absent.
  pub id:              Option<EntityId>,
  pub parent:          Option<EntityId>,
  /// Defaults to [`DEFAULT_MODEL`].
  pub model:           Option<String>,
  /// Defaults to `true`.
  pub active:          Option<bool>,
  pub created_by:      Option<String>,
  pub updated_by:      Option<String>,
  pub publicated_at:   Option<DateTime<Utc>>,
  pub unpublicated_at: Option<DateTime<Utc>>,
  pub contents:        Option<Contents>,
  /// Extension values keyed by column name; undeclared keys are ignored.
  pub data:            Option<Map<String, Value>>,
}

impl NewEntity {
  /// Convenience constructor with every optional field left empty.
  pub fn new(model: impl Into<String>) -> Self {
    Self {
      model: Some(model.into()),
      ..Self::default()
    }
  }

  pub fn with_parent(mut self, parent: impl Into<EntityId>) -> Self {
    self.parent = Some(parent.into());
    self
  }

  pub fn with_contents(mut self, contents: Contents) -> Self {
    self.contents = Some(contents);
    self
  }

  pub fn with_data(mut self, data: Map<String, Value>) -> Self {
    self.data = Some(data);
    self
  }

  pub fn model_name(&self) -> &str {
    self
      .model
      .as_deref()
      .filter(|m| !m.is_empty())
      .unwrap_or(DEFAULT_MODEL)
  }

  /// The declared parent, ignoring an empty reference.
  pub fn parent_id(&self) -> Option<&EntityId> {
    self.parent.as_ref().filter(|p| !p.is_empty())
  }
}
