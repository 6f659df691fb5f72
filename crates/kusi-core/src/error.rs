//! Error types for `kusi-core`.
//!
//! Everything here is raised before a storage backend touches the database:
//! malformed field or order specifiers, values that do not fit a variant's
//! extension columns, and create payloads that would violate a data-model
//! invariant.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("malformed field specifier: {0:?} (expected `<group>.<field>`)")]
  MalformedField(String),

  #[error(
    "malformed order specifier: {0:?} (expected `<group>.<field>[.asc|desc]`)"
  )]
  MalformedOrder(String),

  #[error("unknown entity field: {0:?}")]
  UnknownEntityField(String),

  #[error("unknown relation field: {0:?}")]
  UnknownRelationField(String),

  #[error("relation fields can only be selected in a relation-scoped query")]
  RelationFieldsWithoutScope,

  #[error("language selector {0:?} is only valid for single-entity fetches")]
  LangSentinel(String),

  #[error("invalid value for {model}.{field}: {reason}")]
  InvalidDataValue {
    model:  String,
    field:  String,
    reason: String,
  },

  #[error("query needs {tables} joined tables; SQLite allows {limit}")]
  TooManyJoins { tables: usize, limit: usize },

  #[error("duplicate content for field {field:?} in language {lang:?}")]
  DuplicateContent { field: String, lang: String },

  #[error("relation kind \"ancestor\" is reserved for the hierarchy")]
  AncestorKindReserved,

  #[error("invalid relation tag {0:?}: tags must be non-empty and free of commas")]
  InvalidTag(String),

  #[error("invalid contents: {0}")]
  InvalidContents(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
