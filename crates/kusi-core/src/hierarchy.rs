//! Ancestor-chain materialisation.
//!
//! Each entity stores its complete ancestor chain as `ancestor` relations:
//! position 1 is the parent, 2 the grandparent, and so on up to the root.
//! Because a chain never changes after creation, a child's chain is its
//! parent's chain shifted one step further away, prefixed by the parent.

use serde::{Deserialize, Serialize};

use crate::EntityId;

/// One entry of an ancestor chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AncestorLink {
  pub ancestor: EntityId,
  /// Distance from the descendant; 1 is the immediate parent.
  pub position: i64,
}

/// Compute the ancestor chain of a new child of `parent`.
///
/// `parent_chain` is the parent's own chain in any order. The result is
/// ordered nearest-first with contiguous positions `1..=len`.
pub fn inherit_chain(
  parent: &EntityId,
  parent_chain: &[AncestorLink],
) -> Vec<AncestorLink> {
  let mut inherited: Vec<&AncestorLink> = parent_chain.iter().collect();
  inherited.sort_by_key(|link| link.position);

  std::iter::once(parent)
    .chain(inherited.into_iter().map(|link| &link.ancestor))
    .zip(1..)
    .map(|(ancestor, position)| AncestorLink {
      ancestor: ancestor.clone(),
      position,
    })
    .collect()
}

/// True when positions run `1..=len` in order.
pub fn is_contiguous(chain: &[AncestorLink]) -> bool {
  chain
    .iter()
    .zip(1..)
    .all(|(link, expected)| link.position == expected)
}
