//! Core types and trait definitions for the Kusi entity store.
//!
//! An entity is a universal row typed by a model-variant tag. Localised
//! attributes live in a side table of contents, variant-specific typed
//! attributes in one extension table per variant, and a tagged relation graph
//! carries both free associations and the materialised ancestor closure.
//!
//! This crate is deliberately free of database dependencies. Storage backends
//! (e.g. `kusi-store-sqlite`) implement [`store::EntityStore`].

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod entity;
pub mod error;
pub mod fields;
pub mod hierarchy;
pub mod model;
pub mod nest;
pub mod relation;
pub mod settings;
pub mod store;

pub use entity::EntityId;
pub use error::{Error, Result};
pub use settings::Settings;
