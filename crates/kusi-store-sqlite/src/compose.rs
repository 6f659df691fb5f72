//! Query composition for list reads.
//!
//! A [`QueryPlan`] turns a scope, a field set and an order spec into one
//! SELECT over `entities`:
//!
//! - entity fields are selected directly;
//! - relation fields come from the scope's relation join, aliased `ar`;
//! - every named content field gets its own aliased LEFT JOIN on `contents`,
//!   so each attribute is independently nullable and sortable;
//! - `contents.*` is not joined: the store reads those rows with a second
//!   statement and merges them by entity id (see [`Composed::merge_contents`]);
//! - data fields LEFT JOIN each extension table at most once.
//!
//! Columns are aliased with their dotted output path (`contents.title`) so
//! rows can be reshaped with [`kusi_core::nest::nest_row`].

use std::collections::HashMap;

use kusi_core::{
  entity::ENTITY_COLUMNS,
  fields::{DataSource, FieldName, FieldSet, FieldSpec, Group, OrderKey, OrderSpec},
  model::{self, ModelVariant},
  relation::{ANCESTOR_KIND, RELATION_COLUMNS},
  store::Scope,
};
use rusqlite::types::Value as SqlValue;

/// SQLite refuses joins over more than 64 tables, `entities` included.
pub const MAX_JOIN_TABLES: usize = 64;

/// Alias of the entity id selected for merging wildcard content. Removed from
/// the row once the merge is done.
pub const MERGE_KEY: &str = "_merge_id";

/// A rendered statement with positional parameters in textual order.
#[derive(Debug, Clone)]
pub struct Composed {
  pub sql:            String,
  pub params:         Vec<SqlValue>,
  /// Every content row in the query language must be merged into the
  /// result, keyed by the [`MERGE_KEY`] column.
  pub merge_contents: bool,
}

#[derive(Debug, Clone)]
pub struct QueryPlan {
  scope:  Scope,
  fields: FieldSet,
  order:  OrderSpec,
}

impl QueryPlan {
  pub fn new(
    scope: Scope,
    mut fields: FieldSet,
    order: OrderSpec,
  ) -> kusi_core::Result<Self> {
    if scope.joins_relation() {
      if fields.is_defaulted() {
        fields.push(FieldSpec::wildcard(Group::Relation));
      }
    } else if fields.relation().next().is_some() {
      return Err(kusi_core::Error::RelationFieldsWithoutScope);
    }
    Ok(Self {
      scope,
      fields,
      order,
    })
  }

  /// Render the statement for the content language `lang`.
  pub fn render(&self, lang: &str) -> kusi_core::Result<Composed> {
    let mut q = Builder::default();
    q.scope(&self.scope);

    let merge_contents = self.fields.content().any(FieldName::is_wildcard);
    for spec in self.fields.specs() {
      match (&spec.group, &spec.field) {
        (Group::Entity, FieldName::Wildcard) => {
          ENTITY_COLUMNS.iter().for_each(|c| q.entity_column(c));
        }
        (Group::Entity, FieldName::Named(c)) => q.entity_column(c),
        (Group::Relation, FieldName::Wildcard) => {
          RELATION_COLUMNS.iter().for_each(|c| q.relation_column(c));
        }
        (Group::Relation, FieldName::Named(c)) => q.relation_column(c),
        (Group::Content, FieldName::Wildcard) => {}
        (Group::Content, FieldName::Named(field)) => q.content_field(field, lang),
        (Group::Data(source), field) => q.data_field(source, field),
      }
    }

    if merge_contents {
      q.push_select("entities.id".into(), MERGE_KEY);
      // Sort keys on content still need a join when only the wildcard
      // selects them.
      for key in self.order.keys() {
        if key.group == Group::Content {
          q.content_field(&key.field, lang);
        }
      }
    }

    for key in self.order.keys() {
      if let Some(expr) = q.order_expr(key, self.scope.joins_relation()) {
        q.order.push(format!("{expr} {}", key.direction.sql()));
      }
    }

    let mut composed = q.finish()?;
    composed.merge_contents = merge_contents;
    Ok(composed)
  }
}

// ─── Builder ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Builder {
  select:        Vec<String>,
  joins:         Vec<String>,
  join_params:   Vec<SqlValue>,
  filters:       Vec<String>,
  filter_params: Vec<SqlValue>,
  order:         Vec<String>,
  /// Content field → join alias.
  content_joins: HashMap<String, String>,
  /// Extension tables already joined, in join order.
  data_joins:    Vec<ModelVariant>,
}

impl Builder {
  fn scope(&mut self, scope: &Scope) {
    self.filters.push("entities.deleted_at IS NULL".into());
    match scope {
      Scope::All => {}
      Scope::Model(name) => {
        self.filters.push("entities.model = ?".into());
        self.filter_params.push(SqlValue::Text(name.clone()));
      }
      Scope::ChildrenOf(id) => {
        self.joins.push(
          "JOIN relations AS ar ON ar.entity_caller_id = entities.id \
           AND ar.entity_called_id = ? AND ar.kind = ? AND ar.position = 1"
            .into(),
        );
        self.join_params.push(SqlValue::Text(id.to_string()));
        self.join_params.push(SqlValue::Text(ANCESTOR_KIND.into()));
      }
      Scope::AncestorsOf(id) => {
        self.relation_join(id.as_str(), ANCESTOR_KIND);
      }
      Scope::RelatedFrom { id, kind } => {
        self.relation_join(id.as_str(), kind);
      }
    }
  }

  /// Join the edges leaving `caller`, one result row per called entity.
  fn relation_join(&mut self, caller: &str, kind: &str) {
    self.joins.push(
      "JOIN relations AS ar ON ar.entity_called_id = entities.id \
       AND ar.entity_caller_id = ? AND ar.kind = ?"
        .into(),
    );
    self.join_params.push(SqlValue::Text(caller.into()));
    self.join_params.push(SqlValue::Text(kind.into()));
  }

  fn push_select(&mut self, expr: String, alias: &str) {
    let column = format!("{expr} AS {}", quote_ident(alias));
    if !self.select.contains(&column) {
      self.select.push(column);
    }
  }

  fn entity_column(&mut self, column: &str) {
    self.push_select(format!("entities.{column}"), column);
  }

  fn relation_column(&mut self, column: &str) {
    self.push_select(format!("ar.{column}"), &format!("relation.{column}"));
  }

  fn content_field(&mut self, field: &str, lang: &str) {
    let alias = match self.content_joins.get(field) {
      Some(alias) => alias.clone(),
      None => {
        let alias = format!("c{}", self.content_joins.len());
        self.joins.push(format!(
          "LEFT JOIN contents AS {alias} ON {alias}.entity_id = entities.id \
           AND {alias}.lang = ? AND {alias}.field = ?"
        ));
        self.join_params.push(SqlValue::Text(lang.into()));
        self.join_params.push(SqlValue::Text(field.into()));
        self.content_joins.insert(field.to_owned(), alias.clone());
        alias
      }
    };
    self.push_select(format!("{alias}.value"), &format!("contents.{field}"));
  }

  fn data_field(&mut self, source: &DataSource, field: &FieldName) {
    let variants: Vec<ModelVariant> = match source {
      DataSource::All => model::with_extension_fields().collect(),
      DataSource::Variant(group) => {
        match model::for_data_group(group).filter(|v| v.has_extension_fields())
        {
          Some(variant) => vec![variant],
          None => {
            tracing::warn!(group = %group, "no extension table for data group; dropped");
            Vec::new()
          }
        }
      }
    };

    for variant in variants {
      let Some(table) = variant.table() else {
        continue;
      };
      let columns: Vec<&str> = match field {
        FieldName::Wildcard => variant.fields().iter().map(|f| f.name).collect(),
        FieldName::Named(name) => variant.field(name).map(|f| f.name).into_iter().collect(),
      };
      if columns.is_empty() {
        continue;
      }
      if !self.data_joins.contains(&variant) {
        self.joins.push(format!(
          "LEFT JOIN {table} ON {table}.entity_id = entities.id"
        ));
        self.data_joins.push(variant);
      }
      for column in columns {
        self.push_select(format!("{table}.{column}"), &format!("data.{column}"));
      }
    }
  }

  /// The SQL expression a sort key resolves to, if its source is available.
  fn order_expr(&self, key: &OrderKey, has_relation: bool) -> Option<String> {
    match &key.group {
      Group::Entity => Some(format!("entities.{}", key.field)),
      Group::Relation => has_relation.then(|| format!("ar.{}", key.field)),
      Group::Content => self
        .content_joins
        .get(&key.field)
        .map(|alias| format!("{alias}.value")),
      Group::Data(_) => {
        let columns: Vec<String> = self
          .data_joins
          .iter()
          .filter(|v| v.field(&key.field).is_some())
          .filter_map(|v| v.table())
          .map(|table| format!("{table}.{}", key.field))
          .collect();
        match columns.len() {
          0 => None,
          1 => columns.into_iter().next(),
          _ => Some(format!("COALESCE({})", columns.join(", "))),
        }
      }
    }
  }

  fn finish(mut self) -> kusi_core::Result<Composed> {
    let tables = self.joins.len() + 1;
    if tables > MAX_JOIN_TABLES {
      return Err(kusi_core::Error::TooManyJoins {
        tables,
        limit: MAX_JOIN_TABLES,
      });
    }

    if self.select.is_empty() {
      self.entity_column("id");
    }
    self.order.push("entities.rowid ASC".into());

    let mut sql = format!("SELECT {} FROM entities", self.select.join(", "));
    for join in &self.joins {
      sql.push(' ');
      sql.push_str(join);
    }
    sql.push_str(" WHERE ");
    sql.push_str(&self.filters.join(" AND "));
    sql.push_str(" ORDER BY ");
    sql.push_str(&self.order.join(", "));

    let mut params = self.join_params;
    params.extend(self.filter_params);
    Ok(Composed {
      sql,
      params,
      merge_contents: false,
    })
  }
}

/// Double-quote an SQL identifier.
fn quote_ident(name: &str) -> String {
  format!("\"{}\"", name.replace('"', "\"\""))
}
