//! Schema registry: the static mapping from a model-variant name to the typed
//! columns of its extension table.
//!
//! Variants are a closed sum type resolved through explicit lookups. An
//! unknown model name is never an error here: it simply has no extension
//! fields, so an entity may carry any tag.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Model assigned to entities created without one.
pub const DEFAULT_MODEL: &str = "entity";

/// Column type of an extension field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
  Text,
  Integer,
}

impl FieldType {
  pub fn sql_type(self) -> &'static str {
    match self {
      Self::Text => "TEXT",
      Self::Integer => "INTEGER",
    }
  }
}

/// A declared extension column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataField {
  pub name: &'static str,
  pub ty:   FieldType,
}

const fn text(name: &'static str) -> DataField {
  DataField { name, ty: FieldType::Text }
}

const fn integer(name: &'static str) -> DataField {
  DataField { name, ty: FieldType::Integer }
}

/// A value ready to be written into an extension column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataValue {
  Null,
  Text(String),
  Integer(i64),
}

// ─── Variants ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelVariant {
  Entity,
  Home,
  Section,
  Page,
  Media,
  Medium,
  User,
}

const MEDIUM_FIELDS: &[DataField] = &[text("format"), integer("size")];
const USER_FIELDS: &[DataField] =
  &[text("name"), text("email"), text("profile")];

impl ModelVariant {
  pub const ALL: &'static [ModelVariant] = &[
    Self::Entity,
    Self::Home,
    Self::Section,
    Self::Page,
    Self::Media,
    Self::Medium,
    Self::User,
  ];

  /// The tag stored in `entities.model`.
  pub fn name(self) -> &'static str {
    match self {
      Self::Entity => "entity",
      Self::Home => "home",
      Self::Section => "section",
      Self::Page => "page",
      Self::Media => "media",
      Self::Medium => "medium",
      Self::User => "user",
    }
  }

  /// Declared extension columns, in table order. Empty for most variants.
  pub fn fields(self) -> &'static [DataField] {
    match self {
      Self::Medium => MEDIUM_FIELDS,
      Self::User => USER_FIELDS,
      _ => &[],
    }
  }

  /// The extension table, present only when the variant declares fields.
  pub fn table(self) -> Option<&'static str> {
    match self {
      Self::Medium => Some("media"),
      Self::User => Some("users"),
      _ => None,
    }
  }

  pub fn has_extension_fields(self) -> bool { !self.fields().is_empty() }

  pub fn field(self, name: &str) -> Option<DataField> {
    self.fields().iter().copied().find(|f| f.name == name)
  }

  /// Pick the declared fields out of a create payload and convert them to
  /// their column types. Keys that are not declared are ignored.
  pub fn extract_data(
    self,
    data: &serde_json::Map<String, Value>,
  ) -> Result<Vec<(DataField, DataValue)>> {
    self
      .fields()
      .iter()
      .filter_map(|field| data.get(field.name).map(|v| (*field, v)))
      .map(|(field, raw)| {
        field
          .ty
          .coerce(raw)
          .map(|value| (field, value))
          .map_err(|reason| Error::InvalidDataValue {
            model: self.name().to_owned(),
            field: field.name.to_owned(),
            reason,
          })
      })
      .collect()
  }
}

impl FieldType {
  fn coerce(self, raw: &Value) -> std::result::Result<DataValue, String> {
    match (self, raw) {
      (_, Value::Null) => Ok(DataValue::Null),
      (Self::Text, Value::String(s)) => Ok(DataValue::Text(s.clone())),
      (Self::Text, Value::Number(n)) => Ok(DataValue::Text(n.to_string())),
      (Self::Text, Value::Bool(b)) => Ok(DataValue::Text(b.to_string())),
      (Self::Integer, Value::Number(n)) => n
        .as_i64()
        .map(DataValue::Integer)
        .ok_or_else(|| format!("{n} is not an integer")),
      (Self::Integer, Value::String(s)) => s
        .trim()
        .parse()
        .map(DataValue::Integer)
        .map_err(|_| format!("{s:?} is not an integer")),
      (Self::Integer, Value::Bool(b)) => Ok(DataValue::Integer(i64::from(*b))),
      (_, other) => Err(format!("unsupported value {other}")),
    }
  }
}

// ─── Registry lookups ────────────────────────────────────────────────────────

/// Resolve a model name. `None` for names the registry does not know.
pub fn lookup(name: &str) -> Option<ModelVariant> {
  ModelVariant::ALL.iter().copied().find(|v| v.name() == name)
}

/// Extension fields of a model name; empty for unknown names.
pub fn fields(name: &str) -> &'static [DataField] {
  lookup(name).map(ModelVariant::fields).unwrap_or(&[])
}

pub fn has_extension_fields(name: &str) -> bool { !fields(name).is_empty() }

/// Every variant that owns an extension table, in declaration order.
pub fn with_extension_fields() -> impl Iterator<Item = ModelVariant> {
  ModelVariant::ALL
    .iter()
    .copied()
    .filter(|v| v.has_extension_fields())
}

/// Resolve the group of a data field specifier such as `media.format` or
/// `medium.format`. Table names win over variant names, so `media` selects
/// the `medium` extension table rather than the field-less `media` variant.
pub fn for_data_group(group: &str) -> Option<ModelVariant> {
  with_extension_fields()
    .find(|v| v.table() == Some(group))
    .or_else(|| lookup(group))
}
