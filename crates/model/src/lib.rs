//! Read-only entity schema model.
//!
//! Schemata form a multiple-inheritance graph; we represent them as tagged
//! records with parent pointers and precompute the transitive relations
//! (ancestors, descendants, matchable peers) once at load time. Nothing in
//! here mutates after [`Model::from_json`] returns.

mod entity;
mod schema;
pub mod text;

use std::sync::LazyLock;

pub use entity::Entity;
pub use schema::{
    Model,
    Property,
    PropertyType,
    Schema,
};

/// The built-in schema set. Deployments with bespoke schemata can load
/// their own JSON through [`Model::from_json`] instead.
pub static DEFAULT_MODEL: LazyLock<Model> = LazyLock::new(|| {
    Model::from_json(include_str!("defaults.json")).expect("embedded schema model must parse")
});
