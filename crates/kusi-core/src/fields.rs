//! Field and order specifiers.
//!
//! Callers name what they want with loosely-typed dotted strings:
//! `entities.model`, `contents.title`, `data.size`, `media.format`,
//! `relations.tags`. This module turns those strings into validated,
//! grouped requests so the query layer never sees raw text.

use std::{fmt, str::FromStr};

use crate::{
  Error, Result,
  entity::is_entity_column,
  relation::is_relation_column,
};

// ─── Groups ──────────────────────────────────────────────────────────────────

/// Which extension table(s) a data field was requested from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataSource {
  /// `data.*` / `d.*`: every variant with extension fields.
  All,
  /// A group named after a variant or its table, e.g. `media.format`.
  Variant(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Group {
  Entity,
  Content,
  Relation,
  Data(DataSource),
}

impl Group {
  /// Normalise a group alias. Anything unrecognised is a data group.
  pub fn parse(raw: &str) -> Self {
    match raw {
      "e" | "entity" | "entities" => Self::Entity,
      "c" | "content" | "contents" => Self::Content,
      "r" | "relation" | "relations" => Self::Relation,
      "d" | "data" => Self::Data(DataSource::All),
      other => Self::Data(DataSource::Variant(other.to_owned())),
    }
  }

  /// Canonical prefix used for fully-qualified field names.
  pub fn prefix(&self) -> &'static str {
    match self {
      Self::Entity => "entities",
      Self::Content => "contents",
      Self::Relation => "relations",
      Self::Data(_) => "data",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldName {
  Wildcard,
  Named(String),
}

impl FieldName {
  fn parse(raw: &str) -> Self {
    match raw {
      "*" => Self::Wildcard,
      name => Self::Named(name.to_owned()),
    }
  }

  pub fn is_wildcard(&self) -> bool { matches!(self, Self::Wildcard) }

  pub fn as_named(&self) -> Option<&str> {
    match self {
      Self::Named(name) => Some(name),
      Self::Wildcard => None,
    }
  }
}

impl fmt::Display for FieldName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Wildcard => f.write_str("*"),
      Self::Named(name) => f.write_str(name),
    }
  }
}

/// One parsed `<group>.<field>` specifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldSpec {
  pub group: Group,
  pub field: FieldName,
}

impl FieldSpec {
  pub fn new(group: Group, field: FieldName) -> Self { Self { group, field } }

  pub fn wildcard(group: Group) -> Self { Self::new(group, FieldName::Wildcard) }
}

impl FromStr for FieldSpec {
  type Err = Error;

  fn from_str(raw: &str) -> Result<Self> {
    let raw = raw.trim();
    let mut parts = raw.split('.').map(str::trim);
    let (Some(group), Some(field), None) =
      (parts.next(), parts.next(), parts.next())
    else {
      return Err(Error::MalformedField(raw.to_owned()));
    };
    if group.is_empty() || field.is_empty() {
      return Err(Error::MalformedField(raw.to_owned()));
    }

    let group = Group::parse(group);
    let field = FieldName::parse(field);
    if let FieldName::Named(name) = &field {
      match group {
        Group::Entity if !is_entity_column(name) => {
          return Err(Error::UnknownEntityField(name.clone()));
        }
        Group::Relation if !is_relation_column(name) => {
          return Err(Error::UnknownRelationField(name.clone()));
        }
        _ => {}
      }
    }
    Ok(Self { group, field })
  }
}

// ─── FieldSet ────────────────────────────────────────────────────────────────

/// An ordered, validated collection of field specifiers.
///
/// Specifiers keep their input order: the query layer emits joins and
/// selects in that order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSet {
  specs:     Vec<FieldSpec>,
  defaulted: bool,
}

impl Default for FieldSet {
  fn default() -> Self { Self::everything() }
}

impl FieldSet {
  /// `entities.*`, `data.*`, `contents.*`: what an empty request means.
  pub fn everything() -> Self {
    Self {
      specs:     vec![
        FieldSpec::wildcard(Group::Entity),
        FieldSpec::wildcard(Group::Data(DataSource::All)),
        FieldSpec::wildcard(Group::Content),
      ],
      defaulted: true,
    }
  }

  /// Parse specifiers. An empty input, or a bare `*`, selects everything.
  pub fn parse<I, S>(specs: I) -> Result<Self>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let mut parsed = Vec::new();
    for raw in specs {
      let raw = raw.as_ref().trim();
      if raw.is_empty() {
        continue;
      }
      if raw == "*" {
        return Ok(Self::everything());
      }
      parsed.push(raw.parse()?);
    }
    if parsed.is_empty() {
      return Ok(Self::everything());
    }
    Ok(Self {
      specs:     parsed,
      defaulted: false,
    })
  }

  /// Parse a comma-separated list.
  pub fn from_csv(specs: &str) -> Result<Self> { Self::parse(specs.split(',')) }

  /// True when the caller supplied no fields and the default applies.
  pub fn is_defaulted(&self) -> bool { self.defaulted }

  pub fn specs(&self) -> &[FieldSpec] { &self.specs }

  pub fn push(&mut self, spec: FieldSpec) {
    if !self.specs.contains(&spec) {
      self.specs.push(spec);
    }
  }

  pub fn entity(&self) -> impl Iterator<Item = &FieldName> {
    self.bucket(|g| matches!(g, Group::Entity))
  }

  pub fn content(&self) -> impl Iterator<Item = &FieldName> {
    self.bucket(|g| matches!(g, Group::Content))
  }

  pub fn relation(&self) -> impl Iterator<Item = &FieldName> {
    self.bucket(|g| matches!(g, Group::Relation))
  }

  pub fn data(&self) -> impl Iterator<Item = (&DataSource, &FieldName)> {
    self.specs.iter().filter_map(|s| match &s.group {
      Group::Data(source) => Some((source, &s.field)),
      _ => None,
    })
  }

  /// Whether the entity bucket selects `name`, directly or by wildcard.
  pub fn selects_entity_field(&self, name: &str) -> bool {
    self
      .entity()
      .any(|f| f.is_wildcard() || f.as_named() == Some(name))
  }

  fn bucket(
    &self,
    pred: impl Fn(&Group) -> bool,
  ) -> impl Iterator<Item = &FieldName> {
    self
      .specs
      .iter()
      .filter(move |s| pred(&s.group))
      .map(|s| &s.field)
  }
}

// ─── Ordering ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
  #[default]
  Asc,
  Desc,
}

impl Direction {
  /// Anything other than `desc` sorts ascending.
  pub fn parse(raw: &str) -> Self {
    if raw.trim().eq_ignore_ascii_case("desc") {
      Self::Desc
    } else {
      Self::Asc
    }
  }

  pub fn sql(self) -> &'static str {
    match self {
      Self::Asc => "ASC",
      Self::Desc => "DESC",
    }
  }
}

/// A sort key: the fully-qualified field (`contents.title`) and direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderKey {
  pub group:     Group,
  pub field:     String,
  pub direction: Direction,
}

impl OrderKey {
  pub fn qualified(&self) -> String {
    format!("{}.{}", self.group.prefix(), self.field)
  }
}

impl FromStr for OrderKey {
  type Err = Error;

  fn from_str(raw: &str) -> Result<Self> {
    let raw = raw.trim();
    let normalised = raw.replace(':', ".");
    let parts: Vec<&str> = normalised.split('.').map(str::trim).collect();
    let (group, field, direction) = match parts.as_slice() {
      [group, field] => (*group, *field, Direction::Asc),
      [group, field, dir] => (*group, *field, Direction::parse(dir)),
      _ => return Err(Error::MalformedOrder(raw.to_owned())),
    };
    if group.is_empty() || field.is_empty() || field == "*" {
      return Err(Error::MalformedOrder(raw.to_owned()));
    }

    let group = Group::parse(group);
    match group {
      Group::Entity if !is_entity_column(field) => {
        return Err(Error::UnknownEntityField(field.to_owned()));
      }
      Group::Relation if !is_relation_column(field) => {
        return Err(Error::UnknownRelationField(field.to_owned()));
      }
      _ => {}
    }
    Ok(Self {
      group,
      field: field.to_owned(),
      direction,
    })
  }
}

/// Sort specifiers collapsed by fully-qualified name, keeping caller order.
/// A repeated key keeps its first position and its last direction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderSpec {
  keys: Vec<OrderKey>,
}

impl OrderSpec {
  pub fn parse<I, S>(specs: I) -> Result<Self>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let mut spec = Self::default();
    for raw in specs {
      let raw = raw.as_ref().trim();
      if raw.is_empty() {
        continue;
      }
      spec.push(raw.parse()?);
    }
    Ok(spec)
  }

  pub fn from_csv(specs: &str) -> Result<Self> { Self::parse(specs.split(',')) }

  pub fn push(&mut self, key: OrderKey) {
    let qualified = key.qualified();
    match self.keys.iter_mut().find(|k| k.qualified() == qualified) {
      Some(existing) => existing.direction = key.direction,
      None => self.keys.push(key),
    }
  }

  pub fn keys(&self) -> &[OrderKey] { &self.keys }

  pub fn is_empty(&self) -> bool { self.keys.is_empty() }

  /// Direction requested for a fully-qualified field name.
  pub fn direction(&self, qualified: &str) -> Option<Direction> {
    self
      .keys
      .iter()
      .find(|k| k.qualified() == qualified)
      .map(|k| k.direction)
  }

  /// Newest first: the default for child listings.
  pub fn newest_first() -> Self {
    Self {
      keys: vec![OrderKey {
        group:     Group::Entity,
        field:     "created_at".into(),
        direction: Direction::Desc,
      }],
    }
  }

  /// Nearest ancestor first: the default for ancestor listings.
  pub fn nearest_first() -> Self {
    Self {
      keys: vec![OrderKey {
        group:     Group::Relation,
        field:     "position".into(),
        direction: Direction::Asc,
      }],
    }
  }
}

// ─── Language selector ───────────────────────────────────────────────────────

/// Which content rows a read returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lang {
  /// Only rows in this language, nested as `field → value`.
  Code(String),
  /// Every row, as a flat list.
  Raw,
  /// Every row, nested as `lang → field → value`.
  Grouped,
}

impl Lang {
  pub fn parse(raw: &str) -> Self {
    match raw {
      "raw" => Self::Raw,
      "grouped" => Self::Grouped,
      code => Self::Code(code.to_owned()),
    }
  }
}

impl fmt::Display for Lang {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Code(code) => f.write_str(code),
      Self::Raw => f.write_str("raw"),
      Self::Grouped => f.write_str("grouped"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn aliases_normalise_into_buckets() {
    let set = FieldSet::parse([
      "e.model",
      "content.title",
      "r.position",
      "d.size",
      "media.format",
      "whatever.thing",
    ])
    .unwrap();

    assert_eq!(set.entity().collect::<Vec<_>>(), [&FieldName::Named(
      "model".into()
    )]);
    assert_eq!(set.content().count(), 1);
    assert_eq!(set.relation().count(), 1);
    let data: Vec<_> = set.data().collect();
    assert_eq!(data.len(), 3);
    assert_eq!(data[0].0, &DataSource::All);
    assert_eq!(data[1].0, &DataSource::Variant("media".into()));
    assert_eq!(data[2].0, &DataSource::Variant("whatever".into()));
    assert!(!set.is_defaulted());
  }

  #[test]
  fn empty_input_selects_everything() {
    let set = FieldSet::parse(Vec::<String>::new()).unwrap();
    assert!(set.is_defaulted());
    assert_eq!(set, FieldSet::everything());
    assert_eq!(FieldSet::from_csv("").unwrap(), FieldSet::everything());
    assert_eq!(FieldSet::parse(["*"]).unwrap(), FieldSet::everything());
  }

  #[test]
  fn csv_is_trimmed() {
    let set = FieldSet::from_csv("entities.id, contents.title ,data.*").unwrap();
    assert_eq!(set.specs().len(), 3);
    assert!(set.selects_entity_field("id"));
    assert!(!set.selects_entity_field("model"));
  }

  #[test]
  fn specifiers_without_a_dot_are_rejected() {
    assert!(matches!(
      FieldSet::parse(["title"]),
      Err(Error::MalformedField(_))
    ));
    assert!(matches!(
      FieldSet::parse(["contents.title.extra"]),
      Err(Error::MalformedField(_))
    ));
    assert!(matches!(
      FieldSet::parse(["contents."]),
      Err(Error::MalformedField(_))
    ));
  }

  #[test]
  fn unknown_entity_and_relation_columns_are_rejected() {
    assert!(matches!(
      FieldSet::parse(["entities.password"]),
      Err(Error::UnknownEntityField(_))
    ));
    assert!(matches!(
      FieldSet::parse(["relations.depth"]),
      Err(Error::UnknownRelationField(_))
    ));
  }

  #[test]
  fn order_directions_default_and_coerce_to_ascending() {
    let order = OrderSpec::parse([
      "contents.title",
      "e.created_at.desc",
      "data.size:sideways",
    ])
    .unwrap();

    assert_eq!(order.direction("contents.title"), Some(Direction::Asc));
    assert_eq!(order.direction("entities.created_at"), Some(Direction::Desc));
    assert_eq!(order.direction("data.size"), Some(Direction::Asc));
    assert_eq!(order.direction("relations.position"), None);
  }

  #[test]
  fn repeated_order_keys_collapse() {
    let order =
      OrderSpec::from_csv("c.title.asc,e.model,contents.title.desc").unwrap();
    assert_eq!(order.keys().len(), 2);
    assert_eq!(order.keys()[0].qualified(), "contents.title");
    assert_eq!(order.keys()[0].direction, Direction::Desc);
  }

  #[test]
  fn named_variant_orders_qualify_as_data() {
    let order = OrderSpec::parse(["media.size.desc"]).unwrap();
    assert_eq!(order.direction("data.size"), Some(Direction::Desc));
  }

  #[test]
  fn malformed_orders_are_rejected() {
    assert!(matches!(
      OrderSpec::parse(["title"]),
      Err(Error::MalformedOrder(_))
    ));
    assert!(matches!(
      OrderSpec::parse(["a.b.c.d"]),
      Err(Error::MalformedOrder(_))
    ));
  }

  #[test]
  fn lang_sentinels() {
    assert_eq!(Lang::parse("raw"), Lang::Raw);
    assert_eq!(Lang::parse("grouped"), Lang::Grouped);
    assert_eq!(Lang::parse("es"), Lang::Code("es".into()));
  }
}
