//! SQL schema for the Kusi SQLite store.
//!
//! Executed once at connection startup. Extension tables are generated from
//! the schema registry, one per variant that declares fields.

use kusi_core::model;

/// Base DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS entities (
    id              TEXT PRIMARY KEY,
    parent          TEXT,              -- declared parent; seeds the ancestor chain
    model           TEXT NOT NULL DEFAULT 'entity',
    active          INTEGER NOT NULL DEFAULT 1,
    created_by      TEXT,
    updated_by      TEXT,
    publicated_at   TEXT,
    unpublicated_at TEXT,
    created_at      TEXT NOT NULL,     -- RFC 3339 UTC
    updated_at      TEXT NOT NULL,
    deleted_at      TEXT               -- soft delete; every read filters on NULL
);

CREATE TABLE IF NOT EXISTS contents (
    entity_id TEXT NOT NULL REFERENCES entities(id),
    field     TEXT NOT NULL,
    lang      TEXT NOT NULL DEFAULT '', -- '' is the language-agnostic default
    value     TEXT NOT NULL DEFAULT '',
    UNIQUE (entity_id, field, lang)
);

-- kind = 'ancestor' rows are the materialised ancestor closure and are
-- written only at entity creation.
CREATE TABLE IF NOT EXISTS relations (
    entity_caller_id TEXT NOT NULL REFERENCES entities(id),
    entity_called_id TEXT NOT NULL REFERENCES entities(id),
    kind             TEXT NOT NULL,
    position         INTEGER,
    tags             TEXT,             -- comma-separated
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL,
    UNIQUE (entity_caller_id, entity_called_id, kind)
);

CREATE UNIQUE INDEX IF NOT EXISTS relations_ancestor_position_idx
    ON relations(entity_caller_id, position) WHERE kind = 'ancestor';
CREATE INDEX IF NOT EXISTS relations_called_idx   ON relations(entity_called_id, kind);
CREATE INDEX IF NOT EXISTS contents_field_idx     ON contents(field, lang);
CREATE INDEX IF NOT EXISTS entities_model_idx     ON entities(model);
";

/// Full DDL: the base tables plus one extension table per variant.
pub fn ddl() -> String {
  let mut ddl = String::from(SCHEMA);
  for variant in model::with_extension_fields() {
    let Some(table) = variant.table() else {
      continue;
    };
    let columns: String = variant
      .fields()
      .iter()
      .map(|f| format!(",\n    {} {}", f.name, f.ty.sql_type()))
      .collect();
    ddl.push_str(&format!(
      "
CREATE TABLE IF NOT EXISTS {table} (
    entity_id TEXT PRIMARY KEY REFERENCES entities(id){columns}
);
"
    ));
  }
  ddl.push_str("\nPRAGMA user_version = 1;\n");
  ddl
}
