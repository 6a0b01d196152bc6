//! Shared plumbing for the entity search service: environment-driven
//! configuration, index naming, dataset snapshots and the update envelope
//! format produced by the upstream catalog.

pub mod backoff;
pub mod dataset;
pub mod env;
pub mod envelope;
pub mod index_name;
pub mod knobs;

pub use backoff::Backoff;
pub use dataset::Dataset;
pub use envelope::{
    EntityOp,
    UpdateEnvelope,
};
