use std::fmt::Debug;

use anyhow::Context;
use async_trait::async_trait;
use common::{
    envelope::EntityOp,
    UpdateEnvelope,
};
use errors::ErrorMetadata;
use futures::stream::BoxStream;
use model::Model;
use serde_json::Value;

use crate::document::make_indexable;

/// Stream of update envelopes as produced by the upstream catalog. Bulk
/// ingestion pulls from this with backpressure: nothing is read beyond the
/// chunk currently in flight.
pub type EnvelopeStream = BoxStream<'static, anyhow::Result<UpdateEnvelope>>;

/// A single document operation submitted to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkOperation {
    /// Full-document write. Modifications are expressed as replacements:
    /// the enrichment step recomputes the entire document anyway, so a
    /// partial update would save nothing.
    Index { doc_id: String, document: Value },
    Delete { doc_id: String },
}

/// Capability set the index lifecycle needs from a search backend. The
/// Elasticsearch implementation is the production one; tests run against
/// the in-memory variant.
#[async_trait]
pub trait SearchProvider: Send + Sync + Debug {
    /// Create an index with the canonical entity mapping. Creating an
    /// index that already exists is a no-op.
    async fn upsert_index(&self, index: &str) -> anyhow::Result<()>;

    /// Server-side copy of `index` to `new_index`, which must not already
    /// exist. The source is write-blocked for the duration of the copy and
    /// writable again afterwards, whether the copy succeeded or not; the
    /// target comes out writable.
    async fn clone_index(&self, index: &str, new_index: &str) -> anyhow::Result<()>;

    async fn index_exists(&self, index: &str) -> anyhow::Result<bool>;

    /// Delete an index. Deleting a missing index is a no-op.
    async fn delete_index(&self, index: &str) -> anyhow::Result<()>;

    /// Make all completed writes visible to search and counts.
    async fn refresh(&self, index: &str) -> anyhow::Result<()>;

    /// Atomically detach every index matching `family_prefix*` from the
    /// alias and attach `new_index` instead.
    async fn rollover(&self, alias: &str, new_index: &str, family_prefix: &str)
        -> anyhow::Result<()>;

    async fn count(&self, index: &str) -> anyhow::Result<u64>;

    /// The concrete indices currently backing an alias. An alias that does
    /// not exist yet backs nothing.
    async fn get_backing_indexes(&self, alias: &str) -> anyhow::Result<Vec<String>>;

    /// All indices whose name starts with `prefix`, attached to the alias
    /// or not.
    async fn list_indices(&self, prefix: &str) -> anyhow::Result<Vec<String>>;

    /// Consume an envelope stream into the index in chunks, returning
    /// `(successful, failed)` operation counts. Any malformed envelope or
    /// per-item backend failure fails the whole call.
    async fn update(&self, entities: EnvelopeStream, index: &str) -> anyhow::Result<(u64, u64)>;

    /// Execute a structured query against an index or alias.
    async fn search(&self, index: &str, body: Value) -> anyhow::Result<Value>;
}

/// Translate one update envelope into a bulk operation, enriching the
/// entity payload for ADD and MOD.
pub fn to_bulk_operation(model: &Model, envelope: UpdateEnvelope) -> anyhow::Result<BulkOperation> {
    let op = envelope.entity_op().context(ErrorMetadata::bad_request(
        "UnknownOperation",
        format!("Unknown operation type: {:?}", envelope.op),
    ))?;
    let entity = envelope.entity.context(ErrorMetadata::bad_request(
        "MalformedEnvelope",
        "Update envelope carries no entity",
    ))?;
    match op {
        EntityOp::Add | EntityOp::Mod => {
            let (doc_id, document) = make_indexable(model, &entity)?;
            Ok(BulkOperation::Index { doc_id, document })
        },
        EntityOp::Del => {
            let doc_id = entity
                .get("id")
                .and_then(|id| id.as_str())
                .filter(|id| !id.is_empty())
                .context(ErrorMetadata::bad_request(
                    "MalformedEnvelope",
                    "Delete envelope carries no entity id",
                ))?;
            Ok(BulkOperation::Delete {
                doc_id: doc_id.to_string(),
            })
        },
    }
}

#[cfg(test)]
mod tests {
    use common::UpdateEnvelope;
    use errors::ErrorMetadataAnyhowExt;
    use model::DEFAULT_MODEL;
    use serde_json::json;

    use crate::provider::{
        to_bulk_operation,
        BulkOperation,
    };

    #[test]
    fn test_add_and_mod_are_full_writes() -> anyhow::Result<()> {
        let entity = json!({"id": "x1", "schema": "Person", "properties": {"name": ["Test"]}});
        for envelope in [
            UpdateEnvelope::add(entity.clone()),
            UpdateEnvelope::modify(entity),
        ] {
            match to_bulk_operation(&DEFAULT_MODEL, envelope)? {
                BulkOperation::Index { doc_id, document } => {
                    assert_eq!(doc_id, "x1");
                    assert!(document.get("id").is_none());
                },
                op => panic!("expected index operation, got {op:?}"),
            }
        }
        Ok(())
    }

    #[test]
    fn test_delete_requires_only_id() -> anyhow::Result<()> {
        let op = to_bulk_operation(&DEFAULT_MODEL, UpdateEnvelope::delete("x1"))?;
        assert_eq!(
            op,
            BulkOperation::Delete {
                doc_id: "x1".to_string()
            }
        );
        Ok(())
    }

    #[test]
    fn test_malformed_envelopes() {
        let envelope = UpdateEnvelope {
            op: "ADD".to_string(),
            entity: None,
        };
        let err = to_bulk_operation(&DEFAULT_MODEL, envelope).unwrap_err();
        assert_eq!(err.short_msg(), "MalformedEnvelope");

        let envelope = UpdateEnvelope {
            op: "UPSERT".to_string(),
            entity: Some(json!({"id": "x1"})),
        };
        let err = to_bulk_operation(&DEFAULT_MODEL, envelope).unwrap_err();
        assert_eq!(err.short_msg(), "UnknownOperation");

        let err = to_bulk_operation(
            &DEFAULT_MODEL,
            UpdateEnvelope::add(json!({"schema": "Person"})),
        )
        .unwrap_err();
        assert!(err.is_bad_request());
    }
}
