//! The `EntityStore` trait and supporting query types.
//!
//! The trait is implemented by storage backends (e.g. `kusi-store-sqlite`).
//! Callers (the CLI, or any application layer) depend on this abstraction,
//! not on a concrete backend.

use std::future::Future;

use crate::{
  EntityId,
  entity::{Entity, NestedEntity, NewEntity},
  fields::{FieldSet, Lang, OrderSpec},
  relation::{NewRelation, Relation},
};

// ─── Query types ─────────────────────────────────────────────────────────────

/// The base predicate of a list query.
///
/// The relation-backed scopes join the relation row that links each result
/// to `id`, so `relations.*` fields can be selected from it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Scope {
  /// Every non-deleted entity.
  #[default]
  All,
  /// Entities of one model.
  Model(String),
  /// Entities whose immediate parent is `id`.
  ChildrenOf(EntityId),
  /// Every ancestor of `id`.
  AncestorsOf(EntityId),
  /// Entities `id` points at with relations of `kind`.
  RelatedFrom { id: EntityId, kind: String },
}

impl Scope {
  pub fn joins_relation(&self) -> bool {
    matches!(
      self,
      Self::ChildrenOf(_) | Self::AncestorsOf(_) | Self::RelatedFrom { .. }
    )
  }
}

/// Parameters for [`EntityStore::get`].
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
  pub scope:  Scope,
  pub fields: FieldSet,
  /// A language code; `None` means the store's default language.
  pub lang:   Option<Lang>,
  pub order:  OrderSpec,
}

impl ListQuery {
  pub fn new(scope: Scope) -> Self {
    Self {
      scope,
      ..Self::default()
    }
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over an entity store backend.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait EntityStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Writes ────────────────────────────────────────────────────────────

  /// Create an entity together with its contents, extension row and
  /// ancestor chain, atomically.
  fn create(
    &self,
    input: NewEntity,
  ) -> impl Future<Output = Result<Entity, Self::Error>> + Send + '_;

  /// Attach a non-ancestor relation between two existing entities.
  fn relate(
    &self,
    input: NewRelation,
  ) -> impl Future<Output = Result<Relation, Self::Error>> + Send + '_;

  /// Soft-delete an entity. Deleted entities disappear from every read.
  fn delete(
    &self,
    id: EntityId,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Reads ─────────────────────────────────────────────────────────────

  /// The typed entity row, or `None` if absent or deleted.
  fn find(
    &self,
    id: EntityId,
  ) -> impl Future<Output = Result<Option<Entity>, Self::Error>> + Send + '_;

  /// Outgoing relations of `id`, optionally restricted to one kind.
  fn relations(
    &self,
    id: EntityId,
    kind: Option<String>,
  ) -> impl Future<Output = Result<Vec<Relation>, Self::Error>> + Send + '_;

  /// Fetch one entity with its content and extension data.
  ///
  /// Unlike [`EntityStore::get`], `lang` may also be [`Lang::Raw`] or
  /// [`Lang::Grouped`].
  fn get_one(
    &self,
    id: EntityId,
    fields: FieldSet,
    lang: Option<Lang>,
  ) -> impl Future<Output = Result<NestedEntity, Self::Error>> + Send + '_;

  /// List entities matching `query`, reshaped into nested entities.
  fn get(
    &self,
    query: ListQuery,
  ) -> impl Future<Output = Result<Vec<NestedEntity>, Self::Error>> + Send + '_;

  /// Entities whose immediate parent is `id`; newest first by default.
  fn get_children(
    &self,
    id: EntityId,
    fields: FieldSet,
    lang: Option<Lang>,
    order: Option<OrderSpec>,
  ) -> impl Future<Output = Result<Vec<NestedEntity>, Self::Error>> + Send + '_;

  /// Every ancestor of `id`; nearest first by default.
  fn get_ancestors(
    &self,
    id: EntityId,
    fields: FieldSet,
    lang: Option<Lang>,
    order: Option<OrderSpec>,
  ) -> impl Future<Output = Result<Vec<NestedEntity>, Self::Error>> + Send + '_;

  /// The parent of `id`, fetched like [`EntityStore::get_one`].
  fn get_parent(
    &self,
    id: EntityId,
    fields: FieldSet,
    lang: Option<Lang>,
  ) -> impl Future<Output = Result<NestedEntity, Self::Error>> + Send + '_;
}
