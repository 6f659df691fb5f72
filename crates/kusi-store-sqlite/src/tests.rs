//! Integration tests for `SqliteStore` against an in-memory database.

use kusi_core::{
  Settings,
  entity::{Contents, Entity, NestedEntity, NewEntity},
  fields::{FieldSet, Lang, OrderSpec},
  hierarchy::{AncestorLink, is_contiguous},
  relation::NewRelation,
  store::{EntityStore, ListQuery, Scope},
};
use serde_json::{Value, json};

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory(Settings::default())
    .await
    .expect("in-memory store")
}

async fn create(
  s: &SqliteStore,
  id: &str,
  model: &str,
  parent: Option<&str>,
) -> Entity {
  let mut input = NewEntity::new(model);
  input.id = Some(id.into());
  if let Some(parent) = parent {
    input = input.with_parent(parent);
  }
  s.create(input).await.unwrap()
}

/// home → section → page
async fn hierarchy(s: &SqliteStore) {
  create(s, "home", "home", None).await;
  create(s, "section", "section", Some("home")).await;
  create(s, "page", "page", Some("section")).await;
}

fn fields(specs: &[&str]) -> FieldSet { FieldSet::parse(specs).unwrap() }

fn ids(rows: &[NestedEntity]) -> Vec<&str> {
  rows.iter().filter_map(|r| r["id"].as_str()).collect()
}

fn data(value: Value) -> serde_json::Map<String, Value> {
  match value {
    Value::Object(map) => map,
    _ => panic!("expected an object"),
  }
}

// ─── Creation ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_fills_defaults() {
  let s = store().await;
  let entity = s.create(NewEntity::default()).await.unwrap();

  assert_eq!(entity.model, "entity");
  assert!(entity.active);
  assert!(entity.parent.is_none());
  assert!(!entity.id.is_empty());

  let found = s.find(entity.id.clone()).await.unwrap().unwrap();
  assert_eq!(found.id, entity.id);
  assert_eq!(found.created_at, entity.created_at);
}

#[tokio::test]
async fn create_with_missing_parent_writes_nothing() {
  let s = store().await;
  let mut input = NewEntity::new("page")
    .with_parent("nowhere")
    .with_contents(Contents::new().field("title", "Orphan"));
  input.id = Some("orphan".into());

  let err = s.create(input).await.unwrap_err();
  assert!(matches!(err, Error::ParentNotFound(ref id) if id.as_str() == "nowhere"));
  assert!(s.find("orphan".into()).await.unwrap().is_none());
}

#[tokio::test]
async fn create_with_taken_id_is_rejected() {
  let s = store().await;
  create(&s, "home", "home", None).await;

  let mut input = NewEntity::new("page")
    .with_contents(Contents::new().field("title", "Second"));
  input.id = Some("home".into());
  let err = s.create(input).await.unwrap_err();
  assert!(matches!(err, Error::Database(_)));

  let home = s
    .get_one("home".into(), fields(&["e.model", "contents.*"]), None)
    .await
    .unwrap();
  assert_eq!(home["model"], "home");
  assert_eq!(home["contents"], json!({}));
}

#[tokio::test]
async fn duplicate_content_pairs_are_rejected() {
  let s = store().await;
  let input = NewEntity::new("page").with_contents(
    Contents::new()
      .field("title", "One")
      .localized("", "title", "Two"),
  );
  let err = s.create(input).await.unwrap_err();
  assert!(matches!(
    err,
    Error::Core(kusi_core::Error::DuplicateContent { .. })
  ));
  assert!(s.get(ListQuery::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn data_for_a_variant_without_fields_is_ignored() {
  let s = store().await;
  let mut input = NewEntity::new("page").with_data(data(json!({ "format": "jpg" })));
  input.id = Some("page".into());
  let entity = s.create(input).await.unwrap();
  assert_eq!(entity.model, "page");

  let one = s
    .get_one("page".into(), fields(&["e.id", "data.*"]), None)
    .await
    .unwrap();
  assert_eq!(one["id"], "page");
  assert!(!one.contains_key("data"));
}

#[tokio::test]
async fn failed_extension_insert_rolls_back_the_entity() {
  let s = store().await;
  s.conn
    .call(|conn| {
      conn.execute_batch(
        "CREATE TRIGGER refuse_media BEFORE INSERT ON media
         BEGIN SELECT RAISE(ABORT, 'media refused'); END;",
      )?;
      Ok(())
    })
    .await
    .unwrap();

  let mut input = NewEntity::new("medium")
    .with_contents(Contents::new().field("title", "Logo"))
    .with_data(data(json!({ "format": "png" })));
  input.id = Some("logo".into());
  let err = s.create(input).await.unwrap_err();
  assert!(matches!(err, Error::Database(_)));

  assert!(s.find("logo".into()).await.unwrap().is_none());
  let leftovers: i64 = s
    .conn
    .call(|conn| {
      Ok(conn.query_row(
        "SELECT (SELECT COUNT(*) FROM entities) + (SELECT COUNT(*) FROM contents)",
        [],
        |row| row.get(0),
      )?)
    })
    .await
    .unwrap();
  assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn badly_typed_data_is_rejected() {
  let s = store().await;
  let input = NewEntity::new("medium").with_data(data(json!({ "size": "big" })));
  let err = s.create(input).await.unwrap_err();
  assert!(matches!(
    err,
    Error::Core(kusi_core::Error::InvalidDataValue { .. })
  ));
}

#[tokio::test]
async fn extension_row_exists_without_data() {
  let s = store().await;
  create(&s, "img", "medium", None).await;

  // Null columns are omitted, so an all-null row reports no data.
  let one = s
    .get_one("img".into(), fields(&["data.*"]), None)
    .await
    .unwrap();
  assert!(!one.contains_key("data"));
}

// ─── getOne ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn content_round_trips_in_the_default_language() {
  let s = store().await;
  let mut input = NewEntity::new("page")
    .with_contents(Contents::new().field("title", "Page title"));
  input.id = Some("page".into());
  s.create(input).await.unwrap();

  let one = s
    .get_one("page".into(), fields(&["contents.title"]), None)
    .await
    .unwrap();
  assert_eq!(one, data(json!({ "contents": { "title": "Page title" } })));
}

#[tokio::test]
async fn grouped_content_keys_by_language() {
  let s = store().await;
  let contents: Contents = serde_json::from_value(json!([
    { "lang": "es", "field": "summary", "value": "El otro titulo" },
    { "lang": "en", "field": "summary", "value": "The other title" },
  ]))
  .unwrap();
  let entity = s
    .create(NewEntity::new("page").with_contents(contents))
    .await
    .unwrap();

  let one = s
    .get_one(entity.id.clone(), FieldSet::everything(), Some(Lang::Grouped))
    .await
    .unwrap();
  assert_eq!(one["contents"]["es"]["summary"], "El otro titulo");
  assert_eq!(one["contents"]["en"]["summary"], "The other title");
  assert_eq!(one["raw_contents"].as_array().unwrap().len(), 2);
  assert_eq!(one["id"], entity.id.as_str());
}

#[tokio::test]
async fn raw_content_lists_every_row() {
  let s = store().await;
  let contents = Contents::new()
    .localized("es", "title", "Hola")
    .localized("en", "title", "Hello");
  let entity = s
    .create(NewEntity::new("page").with_contents(contents))
    .await
    .unwrap();

  let one = s
    .get_one(entity.id, fields(&["contents.title"]), Some(Lang::Raw))
    .await
    .unwrap();
  assert_eq!(
    one["contents"],
    json!([
      { "field": "title", "lang": "es", "value": "Hola" },
      { "field": "title", "lang": "en", "value": "Hello" },
    ])
  );
}

#[tokio::test]
async fn extension_data_is_read_for_its_variant_only() {
  let s = store().await;
  let mut medium = NewEntity::new("medium")
    .with_data(data(json!({ "format": "jpg", "size": 0, "ignored": true })));
  medium.id = Some("img".into());
  s.create(medium).await.unwrap();
  create(&s, "page", "page", None).await;

  let img = s
    .get_one("img".into(), fields(&["data.*"]), None)
    .await
    .unwrap();
  assert_eq!(img, data(json!({ "data": { "format": "jpg", "size": 0 } })));

  let media_group = s
    .get_one("img".into(), fields(&["media.format"]), None)
    .await
    .unwrap();
  assert_eq!(media_group["data"], json!({ "format": "jpg" }));

  let page = s
    .get_one("page".into(), FieldSet::everything(), None)
    .await
    .unwrap();
  assert!(!page.contains_key("data"));
  assert_eq!(page["model"], "page");
}

#[tokio::test]
async fn get_one_of_unknown_or_deleted_entity_is_not_found() {
  let s = store().await;
  let err = s
    .get_one("ghost".into(), FieldSet::everything(), None)
    .await
    .unwrap_err();
  assert!(err.is_not_found());

  create(&s, "gone", "page", None).await;
  s.delete("gone".into()).await.unwrap();
  let err = s
    .get_one("gone".into(), FieldSet::everything(), None)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::NotFound(_)));
}

// ─── Hierarchy ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn ancestors_are_nearest_first_with_contiguous_positions() {
  let s = store().await;
  hierarchy(&s).await;

  let ancestors = s
    .get_ancestors("page".into(), FieldSet::default(), None, None)
    .await
    .unwrap();
  assert_eq!(ids(&ancestors), vec!["section", "home"]);
  assert_eq!(ancestors[0]["relation"]["position"], 1);
  assert_eq!(ancestors[1]["relation"]["position"], 2);
  assert_eq!(ancestors[0]["relation"]["kind"], "ancestor");

  let ancestors = s
    .get_ancestors("section".into(), FieldSet::default(), None, None)
    .await
    .unwrap();
  assert_eq!(ids(&ancestors), vec!["home"]);
  assert_eq!(ancestors[0]["relation"]["position"], 1);

  let roots = s
    .get_ancestors("home".into(), FieldSet::default(), None, None)
    .await
    .unwrap();
  assert!(roots.is_empty());
}

#[tokio::test]
async fn stored_chain_mirrors_the_parent_chain() {
  let s = store().await;
  hierarchy(&s).await;

  let chain = s
    .relations("page".into(), Some("ancestor".into()))
    .await
    .unwrap();
  let links: Vec<(&str, Option<i64>)> = chain
    .iter()
    .map(|r| (r.called.as_str(), r.position))
    .collect();
  assert_eq!(links, vec![("section", Some(1)), ("home", Some(2))]);
  assert!(chain.iter().all(|r| r.is_ancestor()));

  let stored: Vec<AncestorLink> = chain
    .into_iter()
    .map(|r| AncestorLink {
      ancestor: r.called,
      position: r.position.unwrap_or_default(),
    })
    .collect();
  assert!(is_contiguous(&stored));
}

#[tokio::test]
async fn children_ignore_other_relations() {
  let s = store().await;
  hierarchy(&s).await;
  s.relate(NewRelation::new("home", "page", "featured"))
    .await
    .unwrap();
  s.relate(NewRelation::new("page", "home", "link"))
    .await
    .unwrap();

  let children = s
    .get_children("home".into(), FieldSet::default(), None, None)
    .await
    .unwrap();
  assert_eq!(ids(&children), vec!["section"]);
}

#[tokio::test]
async fn children_order_by_selected_content() {
  let s = store().await;
  create(&s, "home", "home", None).await;
  for (id, title) in [("b", "Beta"), ("a", "Alpha"), ("c", "Gamma")] {
    let mut input = NewEntity::new("page")
      .with_parent("home")
      .with_contents(Contents::new().field("title", title));
    input.id = Some(id.into());
    s.create(input).await.unwrap();
  }

  let children = s
    .get_children(
      "home".into(),
      fields(&["e.id", "contents.title"]),
      None,
      Some(OrderSpec::parse(["contents.title.asc"]).unwrap()),
    )
    .await
    .unwrap();
  assert_eq!(ids(&children), vec!["a", "b", "c"]);
  assert_eq!(children[0]["contents"]["title"], "Alpha");
}

#[tokio::test]
async fn parent_is_fetched_like_get_one() {
  let s = store().await;
  hierarchy(&s).await;

  let parent = s
    .get_parent("page".into(), fields(&["e.id"]), None)
    .await
    .unwrap();
  assert_eq!(parent, data(json!({ "id": "section" })));

  let err = s
    .get_parent("home".into(), FieldSet::everything(), None)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::NoParent(_)));

  let err = s
    .get_parent("ghost".into(), FieldSet::everything(), None)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::NotFound(_)));
}

// ─── get ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_query_returns_everything_and_is_repeatable() {
  let s = store().await;
  hierarchy(&s).await;
  let mut medium = NewEntity::new("medium")
    .with_contents(Contents::new().field("title", "Logo"))
    .with_data(data(json!({ "format": "png", "size": 512 })));
  medium.id = Some("logo".into());
  s.create(medium).await.unwrap();

  let first = s.get(ListQuery::default()).await.unwrap();
  let second = s.get(ListQuery::default()).await.unwrap();
  assert_eq!(first, second);
  assert_eq!(ids(&first), vec!["home", "section", "page", "logo"]);

  let logo = &first[3];
  assert_eq!(logo["contents"]["title"], "Logo");
  assert_eq!(logo["data"]["size"], 512);
  assert!(!first[0].contains_key("data"));
  assert!(!first[0].contains_key("relation"));
}

#[tokio::test]
async fn list_content_follows_the_requested_language() {
  let s = SqliteStore::open_in_memory(Settings::with_default_lang("en"))
    .await
    .unwrap();
  let contents = Contents::new()
    .field("title", "Hello")
    .localized("es", "title", "Hola");
  s.create(NewEntity::new("page").with_contents(contents))
    .await
    .unwrap();

  let default = s.get(ListQuery::default()).await.unwrap();
  assert_eq!(default[0]["contents"]["title"], "Hello");

  let spanish = s
    .get(ListQuery {
      lang: Some(Lang::Code("es".into())),
      ..ListQuery::default()
    })
    .await
    .unwrap();
  assert_eq!(spanish[0]["contents"]["title"], "Hola");
}

#[tokio::test]
async fn every_content_field_is_listed_past_the_join_limit() {
  let s = store().await;
  for (id, lead) in [("first", "a"), ("second", "b")] {
    let contents = (0..70).fold(Contents::new(), |contents, i| {
      contents.field(format!("field{i}"), format!("{lead}{i}"))
    });
    let mut input = NewEntity::new("page").with_contents(contents);
    input.id = Some(id.into());
    s.create(input).await.unwrap();
  }

  let rows = s.get(ListQuery::default()).await.unwrap();
  assert_eq!(ids(&rows), vec!["first", "second"]);
  let contents = rows[1]["contents"].as_object().unwrap();
  assert_eq!(contents.len(), 70);
  assert_eq!(contents["field69"], "b69");
  assert!(!rows[0].contains_key("_merge_id"));

  let sorted = s
    .get(ListQuery {
      order: OrderSpec::parse(["contents.field0.desc"]).unwrap(),
      ..ListQuery::default()
    })
    .await
    .unwrap();
  assert_eq!(ids(&sorted), vec!["second", "first"]);
  assert_eq!(sorted[1]["contents"]["field42"], "a42");
}

#[tokio::test]
async fn too_many_named_content_fields_are_rejected() {
  let s = store().await;
  create(&s, "page", "page", None).await;
  let specs: Vec<String> = (0..64).map(|i| format!("contents.field{i}")).collect();
  let err = s
    .get(ListQuery {
      fields: FieldSet::parse(&specs).unwrap(),
      ..ListQuery::default()
    })
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    Error::Core(kusi_core::Error::TooManyJoins { tables: 65, limit: 64 })
  ));
}

#[tokio::test]
async fn list_rejects_language_sentinels() {
  let s = store().await;
  let err = s
    .get(ListQuery {
      lang: Some(Lang::Grouped),
      ..ListQuery::default()
    })
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Core(kusi_core::Error::LangSentinel(_))));
}

#[tokio::test]
async fn relation_fields_outside_a_relation_scope_are_rejected() {
  let s = store().await;
  let err = s
    .get(ListQuery {
      fields: fields(&["relations.kind"]),
      ..ListQuery::default()
    })
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    Error::Core(kusi_core::Error::RelationFieldsWithoutScope)
  ));
}

#[tokio::test]
async fn model_scope_filters_by_variant() {
  let s = store().await;
  hierarchy(&s).await;
  create(&s, "other", "page", None).await;

  let pages = s
    .get(ListQuery {
      fields: fields(&["e.id"]),
      ..ListQuery::new(Scope::Model("page".into()))
    })
    .await
    .unwrap();
  assert_eq!(ids(&pages), vec!["page", "other"]);
}

// ─── Relations ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn related_entities_carry_their_edge() {
  let s = store().await;
  create(&s, "page", "page", None).await;
  create(&s, "img", "medium", None).await;

  let mut edge = NewRelation::new("page", "img", "medium");
  edge.position = Some(1);
  edge.tags = vec!["hero".into(), "wide".into()];
  s.relate(edge).await.unwrap();

  let related = s
    .get(ListQuery::new(Scope::RelatedFrom {
      id:   "page".into(),
      kind: "medium".into(),
    }))
    .await
    .unwrap();
  assert_eq!(ids(&related), vec!["img"]);
  assert_eq!(related[0]["relation"]["tags"], json!(["hero", "wide"]));
  assert_eq!(related[0]["relation"]["position"], 1);

  let stored = s.relations("page".into(), None).await.unwrap();
  assert_eq!(stored.len(), 1);
  assert_eq!(stored[0].tags, vec!["hero", "wide"]);
}

#[tokio::test]
async fn ancestor_edges_cannot_be_written_directly() {
  let s = store().await;
  hierarchy(&s).await;
  let err = s
    .relate(NewRelation::new("home", "page", "ancestor"))
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    Error::Core(kusi_core::Error::AncestorKindReserved)
  ));
}

#[tokio::test]
async fn tags_with_commas_are_rejected() {
  let s = store().await;
  create(&s, "page", "page", None).await;
  create(&s, "img", "medium", None).await;

  let mut edge = NewRelation::new("page", "img", "medium");
  edge.tags = vec!["hero".into(), "x,y".into()];
  let err = s.relate(edge).await.unwrap_err();
  assert!(matches!(
    err,
    Error::Core(kusi_core::Error::InvalidTag(ref tag)) if tag == "x,y"
  ));
  assert!(s.relations("page".into(), None).await.unwrap().is_empty());
}

#[tokio::test]
async fn relate_requires_both_entities() {
  let s = store().await;
  create(&s, "page", "page", None).await;
  let err = s
    .relate(NewRelation::new("page", "ghost", "link"))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::NotFound(ref id) if id.as_str() == "ghost"));
}

// ─── Deletion ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn deleted_entities_disappear_from_reads() {
  let s = store().await;
  hierarchy(&s).await;
  s.delete("section".into()).await.unwrap();

  assert!(s.find("section".into()).await.unwrap().is_none());
  let children = s
    .get_children("home".into(), FieldSet::default(), None, None)
    .await
    .unwrap();
  assert!(children.is_empty());
  let all = s.get(ListQuery::default()).await.unwrap();
  assert_eq!(ids(&all), vec!["home", "page"]);

  let err = s.delete("section".into()).await.unwrap_err();
  assert!(matches!(err, Error::NotFound(_)));
}
