//! Index lifecycle and query construction against the search backend.
//!
//! Entities stream in from the upstream catalog as ADD/MOD/DEL envelopes,
//! get enriched into search documents, and land in version-addressed
//! indices (`<prefix>-<dataset>-<version>`). A stable alias is switched
//! atomically onto the freshest index of each dataset, so queries never
//! observe a half-built index.

pub mod document;
pub mod elastic;
pub mod index;
pub mod indexer;
pub mod mapping;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
mod metrics;
pub mod pool;
pub mod provider;
pub mod queries;
pub mod source;

pub use elastic::ElasticsearchProvider;
pub use index::{
    get_current_version,
    Index,
};
pub use indexer::Indexer;
pub use pool::ClientPool;
pub use provider::{
    BulkOperation,
    EnvelopeStream,
    SearchProvider,
};
pub use source::UpdateSource;

/// Document fields the enrichment step produces on top of the entity's own
/// property groups.
pub const NAMES_FIELD: &str = "names";
pub const NAME_PART_FIELD: &str = "name_parts";
pub const NAME_KEY_FIELD: &str = "name_keys";
pub const NAME_PHONETIC_FIELD: &str = "name_phonetic";
pub const TEXT_FIELD: &str = "text";
