//! Demo content: a small website tree.
//!
//! ```text
//! home ─┬─ blog ── hello
//!       └─ media ── logo
//! ```
//!
//! `hello` also points at `logo` through a `medium` relation.

use kusi_core::{
  EntityId,
  entity::{Contents, NewEntity},
  relation::NewRelation,
  store::EntityStore,
};
use serde_json::json;

fn entity(id: &str, model: &str, parent: Option<&str>, contents: Contents) -> NewEntity {
  let mut input = NewEntity::new(model).with_contents(contents);
  input.id = Some(id.into());
  if let Some(parent) = parent {
    input = input.with_parent(parent);
  }
  input
}

/// Write the demo tree and return the created ids, root first.
pub async fn run<S: EntityStore>(store: &S) -> Result<Vec<EntityId>, S::Error> {
  let mut logo = entity(
    "logo",
    "medium",
    Some("media"),
    Contents::new().field("title", "Logo"),
  );
  if let serde_json::Value::Object(data) = json!({ "format": "png", "size": 2048 }) {
    logo = logo.with_data(data);
  }

  let inputs = [
    entity(
      "home",
      "home",
      None,
      Contents::new()
        .localized("en", "title", "Welcome")
        .localized("es", "title", "Bienvenidos")
        .field("footer", "Contact"),
    ),
    entity(
      "blog",
      "section",
      Some("home"),
      Contents::new().field("title", "Blog"),
    ),
    entity(
      "hello",
      "page",
      Some("blog"),
      Contents::new()
        .field("title", "Hello world")
        .field("summary", "The first page"),
    ),
    entity(
      "media",
      "media",
      Some("home"),
      Contents::new().field("title", "Media"),
    ),
    logo,
  ];

  let mut ids = Vec::with_capacity(inputs.len());
  for input in inputs {
    ids.push(store.create(input).await?.id);
  }

  let mut hero = NewRelation::new("hello", "logo", "medium");
  hero.position = Some(1);
  hero.tags = vec!["hero".into()];
  store.relate(hero).await?;

  Ok(ids)
}
