//! In-memory [`SearchProvider`] used by tests. Mirrors the backend's
//! observable semantics for index lifecycle operations: alias bookkeeping,
//! write blocks, idempotent create/delete, and per-item bulk accounting.

use std::collections::{
    BTreeMap,
    BTreeSet,
};

use async_trait::async_trait;
use errors::ErrorMetadata;
use futures::StreamExt;
use model::{
    Model,
    DEFAULT_MODEL,
};
use parking_lot::Mutex;
use serde_json::Value;

use crate::provider::{
    to_bulk_operation,
    BulkOperation,
    EnvelopeStream,
    SearchProvider,
};

#[derive(Debug, Default, Clone)]
struct MemoryIndex {
    docs: BTreeMap<String, Value>,
    write_blocked: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    indices: BTreeMap<String, MemoryIndex>,
    aliases: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Debug)]
pub struct MemorySearchProvider {
    model: &'static Model,
    state: Mutex<MemoryState>,
}

impl MemorySearchProvider {
    pub fn new() -> Self {
        Self {
            model: &DEFAULT_MODEL,
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Sorted ids of the documents currently in an index.
    pub fn document_ids(&self, index: &str) -> Vec<String> {
        let state = self.state.lock();
        state
            .indices
            .get(index)
            .map(|idx| idx.docs.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn document(&self, index: &str, doc_id: &str) -> Option<Value> {
        let state = self.state.lock();
        state.indices.get(index)?.docs.get(doc_id).cloned()
    }
}

fn missing_index(index: &str) -> ErrorMetadata {
    ErrorMetadata::not_found("IndexNotFound", format!("no such index [{index}]"))
}

#[async_trait]
impl SearchProvider for MemorySearchProvider {
    async fn upsert_index(&self, index: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        state.indices.entry(index.to_string()).or_default();
        Ok(())
    }

    async fn clone_index(&self, index: &str, new_index: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        anyhow::ensure!(
            !state.indices.contains_key(new_index),
            ErrorMetadata::already_exists(
                "IndexAlreadyExists",
                format!("index [{new_index}] already exists"),
            )
        );
        let source = state
            .indices
            .get(index)
            .ok_or_else(|| missing_index(index))?
            .clone();
        state.indices.insert(
            new_index.to_string(),
            MemoryIndex {
                docs: source.docs,
                write_blocked: false,
            },
        );
        Ok(())
    }

    async fn index_exists(&self, index: &str) -> anyhow::Result<bool> {
        Ok(self.state.lock().indices.contains_key(index))
    }

    async fn delete_index(&self, index: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        state.indices.remove(index);
        for backing in state.aliases.values_mut() {
            backing.remove(index);
        }
        Ok(())
    }

    async fn refresh(&self, index: &str) -> anyhow::Result<()> {
        let state = self.state.lock();
        anyhow::ensure!(state.indices.contains_key(index), missing_index(index));
        Ok(())
    }

    async fn rollover(
        &self,
        alias: &str,
        new_index: &str,
        family_prefix: &str,
    ) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        anyhow::ensure!(
            state.indices.contains_key(new_index),
            missing_index(new_index)
        );
        let backing = state.aliases.entry(alias.to_string()).or_default();
        backing.retain(|index| !index.starts_with(family_prefix));
        backing.insert(new_index.to_string());
        Ok(())
    }

    async fn count(&self, index: &str) -> anyhow::Result<u64> {
        let state = self.state.lock();
        let index = state.indices.get(index).ok_or_else(|| missing_index(index))?;
        Ok(index.docs.len() as u64)
    }

    async fn get_backing_indexes(&self, alias: &str) -> anyhow::Result<Vec<String>> {
        let state = self.state.lock();
        Ok(state
            .aliases
            .get(alias)
            .map(|backing| backing.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_indices(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let state = self.state.lock();
        Ok(state
            .indices
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn update(&self, mut entities: EnvelopeStream, index: &str) -> anyhow::Result<(u64, u64)> {
        let mut ok = 0u64;
        while let Some(envelope) = entities.next().await {
            let operation = to_bulk_operation(self.model, envelope?)?;
            let mut state = self.state.lock();
            let target = state
                .indices
                .get_mut(index)
                .ok_or_else(|| missing_index(index))?;
            anyhow::ensure!(
                !target.write_blocked,
                ErrorMetadata::internal(
                    "IndexWriteBlocked",
                    format!("index [{index}] is write blocked"),
                )
            );
            match operation {
                BulkOperation::Index { doc_id, document } => {
                    target.docs.insert(doc_id, document);
                },
                BulkOperation::Delete { doc_id } => {
                    target.docs.remove(&doc_id);
                },
            }
            ok += 1;
        }
        Ok((ok, 0))
    }

    async fn search(&self, _index: &str, _body: Value) -> anyhow::Result<Value> {
        anyhow::bail!(ErrorMetadata::internal(
            "SearchUnsupported",
            "the in-memory provider does not execute queries",
        ))
    }
}
