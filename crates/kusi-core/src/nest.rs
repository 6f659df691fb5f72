//! Reshaping flat query rows into nested entities.
//!
//! The query layer aliases every selected column with its dotted path
//! (`contents.title`, `data.size`, `relation.kind`). A row becomes a sparse
//! tree: null columns are left out instead of being filled with nulls.

use serde_json::{Map, Value};

use crate::{entity::NestedEntity, relation::split_tags};

/// Build a nested entity from `(alias, value)` pairs.
///
/// `tags` and `relation.tags` are split on `,` and stored under
/// `relation.tags`; every other non-null column is assigned at its path.
pub fn nest_row<I>(columns: I) -> NestedEntity
where
  I: IntoIterator<Item = (String, Value)>,
{
  let mut nested = Map::new();
  for (alias, value) in columns {
    if alias == "tags" || alias == "relation.tags" {
      if let Value::String(raw) = &value {
        let tags = split_tags(raw).into_iter().map(Value::String).collect();
        assign(&mut nested, "relation.tags", Value::Array(tags));
      }
      continue;
    }
    if !value.is_null() {
      assign(&mut nested, &alias, value);
    }
  }
  nested
}

/// Set `value` at a dotted path, creating intermediate objects. A scalar in
/// the way of a deeper path is replaced by an object.
pub fn assign(target: &mut Map<String, Value>, path: &str, value: Value) {
  let mut segments = path.split('.').peekable();
  let mut node = target;
  while let Some(segment) = segments.next() {
    if segments.peek().is_none() {
      node.insert(segment.to_owned(), value);
      return;
    }
    let child = node
      .entry(segment.to_owned())
      .or_insert_with(|| Value::Object(Map::new()));
    if !child.is_object() {
      *child = Value::Object(Map::new());
    }
    let Value::Object(map) = child else {
      return;
    };
    node = map;
  }
}
