//! The SQLite implementation of [`EntityStore`].

use std::{collections::HashMap, path::Path, sync::Arc};

use chrono::Utc;
use kusi_core::{
  EntityId, Settings,
  entity::{ENTITY_COLUMNS, Entity, NestedEntity, NewEntity},
  fields::{DataSource, FieldName, FieldSet, Lang, OrderSpec},
  hierarchy::{AncestorLink, inherit_chain},
  model::{self, DEFAULT_MODEL, DataField, DataValue, ModelVariant},
  nest::{assign, nest_row},
  relation::{ANCESTOR_KIND, NewRelation, Relation, join_tags},
  store::{EntityStore, ListQuery, Scope},
};
use rusqlite::{OptionalExtension as _, types::Value as SqlValue};
use serde_json::{Map, Value};

use crate::{
  Error, Result,
  compose::{MERGE_KEY, QueryPlan},
  encode::{
    ContentRow, ENTITY_SELECT, RELATION_SELECT, RawEntity, RawRelation,
    encode_data_value, encode_dt, read_columns,
  },
  schema,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Kusi entity store backed by a single SQLite file.
///
/// Cloning is cheap: the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
  settings:        Arc<Settings>,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>, settings: Settings) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self {
      conn,
      settings: Arc::new(settings),
    };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory(settings: Settings) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self {
      conn,
      settings: Arc::new(settings),
    };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    let ddl = schema::ddl();
    self
      .conn
      .call(move |conn| {
        conn.execute_batch(&ddl)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

fn entity_exists(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<bool> {
  Ok(
    conn
      .query_row(
        "SELECT 1 FROM entities WHERE id = ?1 AND deleted_at IS NULL",
        [id],
        |_| Ok(()),
      )
      .optional()?
      .is_some(),
  )
}

/// The [`MERGE_KEY`] column of a raw list row.
fn merge_id(columns: &[(String, Value)]) -> Option<&str> {
  columns
    .iter()
    .find(|(name, _)| name == MERGE_KEY)
    .and_then(|(_, value)| value.as_str())
}

/// Content rows in `lang` for the given entities, as `(field, value)` pairs
/// grouped by entity id.
fn contents_by_entity(
  conn: &rusqlite::Connection,
  lang: &str,
  ids: &[&str],
) -> rusqlite::Result<HashMap<String, Vec<(String, String)>>> {
  let mut grouped: HashMap<String, Vec<(String, String)>> = HashMap::new();
  if ids.is_empty() {
    return Ok(grouped);
  }
  let ids = Value::from(ids.to_vec()).to_string();
  let mut stmt = conn.prepare(
    "SELECT entity_id, field, value FROM contents
     WHERE lang = ?1 AND entity_id IN (SELECT value FROM json_each(?2))
     ORDER BY rowid",
  )?;
  let rows = stmt.query_map(rusqlite::params![lang, ids], |row| {
    Ok((row.get::<_, String>(0)?, row.get(1)?, row.get(2)?))
  })?;
  for row in rows {
    let (id, field, value) = row?;
    grouped.entry(id).or_default().push((field, value));
  }
  Ok(grouped)
}

// ─── Creation ────────────────────────────────────────────────────────────────

/// An extension-table insert, prepared before the transaction starts.
struct ExtensionRow {
  sql:    String,
  values: Vec<SqlValue>,
}

impl ExtensionRow {
  fn new(table: &str, entity_id: &EntityId, data: &[(DataField, DataValue)]) -> Self {
    let mut columns = vec!["entity_id"];
    let mut values = vec![SqlValue::Text(entity_id.to_string())];
    for (field, value) in data {
      columns.push(field.name);
      values.push(encode_data_value(value));
    }
    let placeholders: Vec<String> =
      (1..=columns.len()).map(|i| format!("?{i}")).collect();
    Self {
      sql: format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        columns.join(", "),
        placeholders.join(", ")
      ),
      values,
    }
  }
}

enum Created {
  Committed { depth: usize },
  MissingParent,
}

// ─── Single-entity fetch ─────────────────────────────────────────────────────

enum ContentFilter {
  All,
  Only(Vec<String>),
}

/// Everything `get_one` needs, resolved from the caller's field set.
struct OneRequest {
  columns:  Vec<String>,
  /// Bookkeeping columns added to the request and removed from the result.
  strip:    Vec<&'static str>,
  contents: Option<ContentFilter>,
  data:     Vec<(DataSource, FieldName)>,
  lang:     Lang,
}

impl OneRequest {
  fn new(fields: &FieldSet, lang: Lang) -> Self {
    let mut columns: Vec<String> = Vec::new();
    for field in fields.entity() {
      match field {
        FieldName::Wildcard => {
          columns = ENTITY_COLUMNS.iter().map(|c| (*c).to_owned()).collect();
          break;
        }
        FieldName::Named(name) if !columns.contains(name) => {
          columns.push(name.clone());
        }
        FieldName::Named(_) => {}
      }
    }

    let mut strip = Vec::new();
    for bookkeeping in ["model", "id"] {
      if !fields.selects_entity_field(bookkeeping) {
        columns.push(bookkeeping.to_owned());
        strip.push(bookkeeping);
      }
    }

    let content_names: Vec<&FieldName> = fields.content().collect();
    let contents = if content_names.is_empty() {
      None
    } else if content_names.iter().any(|f| f.is_wildcard()) {
      Some(ContentFilter::All)
    } else {
      let mut names: Vec<String> = Vec::new();
      for name in content_names.iter().filter_map(|f| f.as_named()) {
        if !names.iter().any(|n| n == name) {
          names.push(name.to_owned());
        }
      }
      Some(ContentFilter::Only(names))
    };

    Self {
      columns,
      strip,
      contents,
      data: fields
        .data()
        .map(|(source, field)| (source.clone(), field.clone()))
        .collect(),
      lang,
    }
  }

  /// The extension table and columns to read for an entity of `model`, if
  /// any data field applies to it.
  fn data_columns(&self, model: &str) -> Option<(&'static str, Vec<&'static str>)> {
    let variant: ModelVariant =
      model::lookup(model).filter(|v| v.has_extension_fields())?;
    let table = variant.table()?;

    let requested: Vec<&FieldName> = self
      .data
      .iter()
      .filter(|(source, _)| match source {
        DataSource::All => true,
        DataSource::Variant(group) => model::for_data_group(group) == Some(variant),
      })
      .map(|(_, field)| field)
      .collect();

    let columns: Vec<&'static str> = if requested.iter().any(|f| f.is_wildcard()) {
      variant.fields().iter().map(|f| f.name).collect()
    } else {
      variant
        .fields()
        .iter()
        .filter(|f| requested.iter().any(|r| r.as_named() == Some(f.name)))
        .map(|f| f.name)
        .collect()
    };
    (!columns.is_empty()).then_some((table, columns))
  }
}

/// Raw pieces of a single-entity fetch, shaped outside the connection thread.
struct FetchedOne {
  entity:   NestedEntity,
  data:     Option<Map<String, Value>>,
  contents: Option<Vec<ContentRow>>,
}

fn fetch_one(
  conn: &rusqlite::Connection,
  id: &str,
  req: &OneRequest,
) -> rusqlite::Result<Option<FetchedOne>> {
  let sql = format!(
    "SELECT {} FROM entities WHERE id = ?1 AND deleted_at IS NULL",
    req.columns.join(", ")
  );
  let mut stmt = conn.prepare(&sql)?;
  let names: Vec<String> =
    stmt.column_names().into_iter().map(str::to_owned).collect();
  let Some(columns) = stmt
    .query_row([id], |row| read_columns(row, &names))
    .optional()?
  else {
    return Ok(None);
  };
  let entity = nest_row(columns);

  let model = entity
    .get("model")
    .and_then(Value::as_str)
    .unwrap_or(DEFAULT_MODEL);
  let data = match req.data_columns(model) {
    Some((table, columns)) => {
      let sql = format!(
        "SELECT {} FROM {table} WHERE entity_id = ?1",
        columns.join(", ")
      );
      let mut stmt = conn.prepare(&sql)?;
      let names: Vec<String> =
        stmt.column_names().into_iter().map(str::to_owned).collect();
      stmt
        .query_row([id], |row| read_columns(row, &names))
        .optional()?
        .map(|columns| {
          columns
            .into_iter()
            .filter(|(_, value)| !value.is_null())
            .collect()
        })
    }
    None => None,
  };

  let contents = match &req.contents {
    Some(filter) => Some(fetch_contents(conn, id, filter, &req.lang)?),
    None => None,
  };

  Ok(Some(FetchedOne {
    entity,
    data,
    contents,
  }))
}

fn fetch_contents(
  conn: &rusqlite::Connection,
  id: &str,
  filter: &ContentFilter,
  lang: &Lang,
) -> rusqlite::Result<Vec<ContentRow>> {
  let mut sql =
    String::from("SELECT field, lang, value FROM contents WHERE entity_id = ?");
  let mut params = vec![SqlValue::Text(id.to_owned())];
  if let ContentFilter::Only(names) = filter {
    let placeholders = vec!["?"; names.len()].join(", ");
    sql.push_str(&format!(" AND field IN ({placeholders})"));
    params.extend(names.iter().cloned().map(SqlValue::Text));
  }
  if let Lang::Code(code) = lang {
    sql.push_str(" AND lang = ?");
    params.push(SqlValue::Text(code.clone()));
  }
  sql.push_str(" ORDER BY rowid");

  let mut stmt = conn.prepare(&sql)?;
  stmt
    .query_map(rusqlite::params_from_iter(params.iter()), |row| {
      Ok(ContentRow {
        field: row.get(0)?,
        lang:  row.get(1)?,
        value: row.get(2)?,
      })
    })?
    .collect()
}

impl FetchedOne {
  fn shape(self, req: &OneRequest) -> NestedEntity {
    let mut entity = self.entity;

    if let Some(data) = self.data.filter(|d| !d.is_empty()) {
      entity.insert("data".into(), Value::Object(data));
    }

    if let Some(rows) = self.contents {
      match &req.lang {
        Lang::Code(_) => {
          let by_field: Map<String, Value> = rows
            .into_iter()
            .map(|row| (row.field, Value::String(row.value)))
            .collect();
          entity.insert("contents".into(), Value::Object(by_field));
        }
        Lang::Raw => {
          let raw = rows.iter().map(ContentRow::to_json).collect();
          entity.insert("contents".into(), Value::Array(raw));
        }
        Lang::Grouped => {
          let raw: Vec<Value> = rows.iter().map(ContentRow::to_json).collect();
          let mut grouped = Map::new();
          for row in rows {
            let by_field = grouped
              .entry(row.lang)
              .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(by_field) = by_field {
              by_field.insert(row.field, Value::String(row.value));
            }
          }
          entity.insert("contents".into(), Value::Object(grouped));
          entity.insert("raw_contents".into(), Value::Array(raw));
        }
      }
    }

    for key in &req.strip {
      entity.remove(*key);
    }
    entity
  }
}

// ─── EntityStore impl ────────────────────────────────────────────────────────

impl EntityStore for SqliteStore {
  type Error = Error;

  // ── Writes ────────────────────────────────────────────────────────────────

  async fn create(&self, input: NewEntity) -> Result<Entity> {
    let default_lang = self.settings.default_lang.clone();
    let model = input.model_name().to_owned();
    let parent = input.parent_id().cloned();
    let NewEntity {
      id,
      active,
      created_by,
      updated_by,
      publicated_at,
      unpublicated_at,
      contents,
      data,
      ..
    } = input;

    // Everything that can be rejected is rejected before the first write.
    let contents = contents.unwrap_or_default();
    contents.check_unique(&default_lang)?;

    let id = id.filter(|id| !id.is_empty()).unwrap_or_else(EntityId::generate);
    let variant = model::lookup(&model).filter(|v| v.has_extension_fields());
    let data = data.filter(|d| !d.is_empty());
    let extension = match (variant, &data) {
      (Some(variant), data) => {
        let values = match data {
          Some(data) => variant.extract_data(data)?,
          None => Vec::new(),
        };
        variant
          .table()
          .map(|table| ExtensionRow::new(table, &id, &values))
      }
      (None, Some(_)) => {
        tracing::warn!(
          model = %model,
          "model declares no extension fields; data ignored"
        );
        None
      }
      (None, None) => None,
    };

    let now = Utc::now();
    let entity = Entity {
      id,
      parent,
      model,
      active: active.unwrap_or(true),
      created_by,
      updated_by,
      publicated_at,
      unpublicated_at,
      created_at: now,
      updated_at: now,
      deleted_at: None,
    };

    let content_rows: Vec<(String, String, String)> = contents
      .iter()
      .map(|c| {
        (
          c.field.clone(),
          c.lang_or(&default_lang).to_owned(),
          c.value.clone(),
        )
      })
      .collect();
    let content_count = content_rows.len();

    let id_str = entity.id.to_string();
    let parent_str = entity.parent.as_ref().map(EntityId::to_string);
    let model_str = entity.model.clone();
    let active_val = entity.active;
    let created_by = entity.created_by.clone();
    let updated_by = entity.updated_by.clone();
    let publicated_str = entity.publicated_at.map(encode_dt);
    let unpublicated_str = entity.unpublicated_at.map(encode_dt);
    let at_str = encode_dt(now);

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let mut chain: Vec<AncestorLink> = Vec::new();
        if let Some(parent) = &parent_str {
          if !entity_exists(&tx, parent)? {
            return Ok(Created::MissingParent);
          }
          let parent_chain = {
            let mut stmt = tx.prepare(
              "SELECT entity_called_id, position FROM relations
               WHERE entity_caller_id = ?1 AND kind = ?2
               ORDER BY position",
            )?;
            stmt
              .query_map(rusqlite::params![parent, ANCESTOR_KIND], |row| {
                Ok(AncestorLink {
                  ancestor: EntityId::from(row.get::<_, String>(0)?),
                  position: row.get(1)?,
                })
              })?
              .collect::<rusqlite::Result<Vec<_>>>()?
          };
          chain = inherit_chain(&EntityId::from(parent.as_str()), &parent_chain);
        }

        tx.execute(
          "INSERT INTO entities (
             id, parent, model, active, created_by, updated_by,
             publicated_at, unpublicated_at, created_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
          rusqlite::params![
            id_str,
            parent_str,
            model_str,
            active_val,
            created_by,
            updated_by,
            publicated_str,
            unpublicated_str,
            at_str,
          ],
        )?;

        for (field, lang, value) in &content_rows {
          tx.execute(
            "INSERT INTO contents (entity_id, field, lang, value)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![id_str, field, lang, value],
          )?;
        }

        if let Some(row) = &extension {
          tx.execute(&row.sql, rusqlite::params_from_iter(row.values.iter()))?;
        }

        for link in &chain {
          tx.execute(
            "INSERT INTO relations (
               entity_caller_id, entity_called_id, kind, position,
               created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            rusqlite::params![
              id_str,
              link.ancestor.as_str(),
              ANCESTOR_KIND,
              link.position,
              at_str,
            ],
          )?;
        }

        tx.commit()?;
        Ok(Created::Committed { depth: chain.len() })
      })
      .await?;

    match outcome {
      Created::MissingParent => {
        Err(Error::ParentNotFound(entity.parent.unwrap_or(entity.id)))
      }
      Created::Committed { depth } => {
        tracing::info!(
          id = %entity.id,
          model = %entity.model,
          contents = content_count,
          depth,
          "created entity"
        );
        Ok(entity)
      }
    }
  }

  async fn relate(&self, input: NewRelation) -> Result<Relation> {
    input.validate()?;

    let now = Utc::now();
    let relation = Relation {
      caller:     input.caller,
      called:     input.called,
      kind:       input.kind,
      position:   input.position,
      tags:       input.tags,
      created_at: now,
      updated_at: now,
    };

    let caller = relation.caller.to_string();
    let called = relation.called.to_string();
    let kind = relation.kind.clone();
    let position = relation.position;
    let tags = join_tags(&relation.tags);
    let at_str = encode_dt(now);

    let missing: Option<String> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        for id in [&caller, &called] {
          if !entity_exists(&tx, id)? {
            return Ok(Some(id.clone()));
          }
        }
        tx.execute(
          "INSERT INTO relations (
             entity_caller_id, entity_called_id, kind, position, tags,
             created_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
          rusqlite::params![caller, called, kind, position, tags, at_str],
        )?;
        tx.commit()?;
        Ok(None)
      })
      .await?;

    if let Some(id) = missing {
      return Err(Error::NotFound(id.into()));
    }
    Ok(relation)
  }

  async fn delete(&self, id: EntityId) -> Result<()> {
    let id_str = id.to_string();
    let at_str = encode_dt(Utc::now());

    let affected = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE entities SET deleted_at = ?1, updated_at = ?1
           WHERE id = ?2 AND deleted_at IS NULL",
          rusqlite::params![at_str, id_str],
        )?)
      })
      .await?;

    if affected == 0 {
      return Err(Error::NotFound(id));
    }
    tracing::info!(id = %id, "soft-deleted entity");
    Ok(())
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  async fn find(&self, id: EntityId) -> Result<Option<Entity>> {
    let id_str = id.to_string();

    let raw: Option<RawEntity> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {ENTITY_SELECT} FROM entities
                 WHERE id = ?1 AND deleted_at IS NULL"
              ),
              [id_str],
              RawEntity::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawEntity::into_entity).transpose()
  }

  async fn relations(
    &self,
    id: EntityId,
    kind: Option<String>,
  ) -> Result<Vec<Relation>> {
    let id_str = id.to_string();

    let raws: Vec<RawRelation> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {RELATION_SELECT} FROM relations
           WHERE entity_caller_id = ?1 AND (?2 IS NULL OR kind = ?2)
           ORDER BY kind, position, rowid"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![id_str, kind], RawRelation::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawRelation::into_relation).collect()
  }

  async fn get_one(
    &self,
    id: EntityId,
    fields: FieldSet,
    lang: Option<Lang>,
  ) -> Result<NestedEntity> {
    let req = OneRequest::new(&fields, self.settings.resolve_lang(lang));
    let id_str = id.to_string();

    let (fetched, req) = self
      .conn
      .call(move |conn| {
        let fetched = fetch_one(conn, &id_str, &req)?;
        Ok((fetched, req))
      })
      .await?;

    match fetched {
      Some(fetched) => Ok(fetched.shape(&req)),
      None => Err(Error::NotFound(id)),
    }
  }

  async fn get(&self, query: ListQuery) -> Result<Vec<NestedEntity>> {
    let lang = match self.settings.resolve_lang(query.lang) {
      Lang::Code(code) => code,
      other => {
        return Err(kusi_core::Error::LangSentinel(other.to_string()).into());
      }
    };
    let plan = QueryPlan::new(query.scope, query.fields, query.order)?;

    let composed = plan.render(&lang)?;
    tracing::debug!(
      sql = %composed.sql,
      params = composed.params.len(),
      merge_contents = composed.merge_contents,
      "composed entity query"
    );

    let (rows, contents) = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&composed.sql)?;
        let names: Vec<String> =
          stmt.column_names().into_iter().map(str::to_owned).collect();
        let rows = stmt
          .query_map(rusqlite::params_from_iter(composed.params.iter()), |row| {
            read_columns(row, &names)
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        let contents = if composed.merge_contents {
          let ids: Vec<&str> = rows
            .iter()
            .filter_map(|columns| merge_id(columns))
            .collect();
          contents_by_entity(conn, &lang, &ids)?
        } else {
          HashMap::new()
        };
        Ok((rows, contents))
      })
      .await?;

    let entities = rows
      .into_iter()
      .map(|columns| {
        let mut nested = nest_row(columns);
        if let Some(Value::String(id)) = nested.remove(MERGE_KEY) {
          for (field, value) in contents.get(&id).into_iter().flatten() {
            assign(
              &mut nested,
              &format!("contents.{field}"),
              Value::String(value.clone()),
            );
          }
        }
        nested
      })
      .collect();
    Ok(entities)
  }

  async fn get_children(
    &self,
    id: EntityId,
    fields: FieldSet,
    lang: Option<Lang>,
    order: Option<OrderSpec>,
  ) -> Result<Vec<NestedEntity>> {
    self
      .get(ListQuery {
        scope: Scope::ChildrenOf(id),
        fields,
        lang,
        order: order.unwrap_or_else(OrderSpec::newest_first),
      })
      .await
  }

  async fn get_ancestors(
    &self,
    id: EntityId,
    fields: FieldSet,
    lang: Option<Lang>,
    order: Option<OrderSpec>,
  ) -> Result<Vec<NestedEntity>> {
    self
      .get(ListQuery {
        scope: Scope::AncestorsOf(id),
        fields,
        lang,
        order: order.unwrap_or_else(OrderSpec::nearest_first),
      })
      .await
  }

  async fn get_parent(
    &self,
    id: EntityId,
    fields: FieldSet,
    lang: Option<Lang>,
  ) -> Result<NestedEntity> {
    let id_str = id.to_string();

    let parent: Option<Option<String>> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT parent FROM entities WHERE id = ?1 AND deleted_at IS NULL",
              [id_str],
              |row| row.get(0),
            )
            .optional()?,
        )
      })
      .await?;

    match parent {
      None => Err(Error::NotFound(id)),
      Some(Some(parent)) if !parent.is_empty() => {
        self.get_one(parent.into(), fields, lang).await
      }
      Some(_) => Err(Error::NoParent(id)),
    }
  }
}
